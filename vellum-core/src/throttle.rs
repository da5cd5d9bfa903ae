use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Trailing-edge throttle: the first submission after an idle period opens a
/// window; submissions within the window are coalesced and the latest value
/// is delivered to the sink when the window closes. Delays, never reorders.
pub struct TrailingThrottle<T> {
    tx: mpsc::UnboundedSender<T>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> TrailingThrottle<T> {
    pub fn new(window: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let worker = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut latest = first;
                let deadline = Instant::now() + window;
                loop {
                    tokio::select! {
                        _ = time::sleep_until(deadline) => break,
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            None => break,
                        },
                    }
                }
                sink(latest);
            }
        });
        Self { tx, worker }
    }

    pub fn submit(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Stops the worker without delivering any pending value.
    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl<T> Drop for TrailingThrottle<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Fires a callback at most once per frame. Scheduling while a frame is
/// already pending coalesces into the pending invocation.
pub struct FrameCoalescer {
    tx: mpsc::UnboundedSender<()>,
    worker: JoinHandle<()>,
}

impl FrameCoalescer {
    pub fn new(frame: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let worker = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                time::sleep(frame).await;
                while rx.try_recv().is_ok() {}
                callback();
            }
        });
        Self { tx, worker }
    }

    pub fn schedule(&self) {
        let _ = self.tx.send(());
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for FrameCoalescer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
