use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// Ordered teardown actions registered as resources are acquired. Disposal
/// runs them exactly once in reverse registration order; the destroyed flag
/// is visible before any action runs so pending async continuations no-op.
/// Registering on an already-disposed bag runs the action immediately.
#[derive(Default)]
pub struct DisposalBag {
    actions: Mutex<Vec<Teardown>>,
    disposed: AtomicBool,
}

impl DisposalBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        if self.disposed.load(Ordering::Acquire) {
            action();
            return;
        }
        let mut actions = self.actions.lock();
        // re-check under the lock so an action can never be stranded
        if self.disposed.load(Ordering::Acquire) {
            drop(actions);
            action();
            return;
        }
        actions.push(Box::new(action));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions.into_iter().rev() {
            action();
        }
    }
}
