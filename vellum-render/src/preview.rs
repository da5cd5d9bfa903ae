use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use vellum_core::RenderSurface;

pub type TouchFn = Arc<dyn Fn(usize, Arc<dyn RenderSurface>) + Send + Sync>;

/// Drives first-time renders for a strip of thumbnail surfaces. The host
/// reports visibility transitions from its intersection observation; each
/// surface is touched at most once for the lifetime of the loader, however
/// often it scrolls in and out of view.
pub struct PreviewLazyLoader {
    surfaces: Vec<Arc<dyn RenderSurface>>,
    touched: Mutex<HashSet<usize>>,
    detached: AtomicBool,
    touch: TouchFn,
}

impl PreviewLazyLoader {
    pub fn new(surfaces: Vec<Arc<dyn RenderSurface>>, touch: TouchFn) -> Self {
        Self {
            surfaces,
            touched: Mutex::new(HashSet::new()),
            detached: AtomicBool::new(false),
            touch,
        }
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Visibility report for the surface at `page_index`. Partial
    /// intersection counts as visible; leaving the viewport is a no-op.
    pub fn report(&self, page_index: usize, visible: bool) {
        if !visible || self.detached.load(Ordering::Acquire) {
            return;
        }
        let Some(surface) = self.surfaces.get(page_index) else {
            debug!(page_index, "visibility report for unknown surface");
            return;
        };
        if !self.touched.lock().insert(page_index) {
            return;
        }
        debug!(page_index, "thumbnail visible for the first time");
        (self.touch)(page_index, surface.clone());
    }

    /// Detaches observation; subsequent reports are ignored.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}
