use std::sync::Arc;

use tokio::sync::watch;

use crate::error::ViewerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyState {
    Pending,
    Ready,
    Failed,
}

/// One-shot gate awaited before any page-dependent operation. Construction is
/// asynchronous, so everything downstream of document decode parks here. The
/// first transition wins: a gate that became ready can no longer fail and
/// vice versa.
#[derive(Clone)]
pub struct ReadyGate {
    state: Arc<watch::Sender<ReadyState>>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadyState::Pending);
        Self { state: Arc::new(tx) }
    }

    pub fn mark_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Unblocks waiters with a cancellation-flavored error; used when the
    /// load is aborted or the instance is disposed before readiness.
    pub fn fail(&self) {
        self.state.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Failed;
                true
            } else {
                false
            }
        });
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ReadyState::Ready
    }

    pub async fn wait(&self) -> Result<(), ViewerError> {
        let mut rx = self.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed => return Err(ViewerError::Disposed),
                ReadyState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(ViewerError::Disposed);
            }
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
