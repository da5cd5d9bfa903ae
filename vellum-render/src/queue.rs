use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use vellum_core::{
    DocumentSlot, EngineError, PageExtent, ReadyGate, RenderSurface, RenderTask, RenderViewport,
    SurfaceId, ViewerError,
};

struct RenderJob {
    page_number: usize,
    surface: Arc<dyn RenderSurface>,
    scale: f32,
    reply: oneshot::Sender<Result<PageExtent, ViewerError>>,
}

/// Engine tasks currently painting, keyed by target surface. Shared between
/// the lane worker (register/clear) and submitters (cancel).
#[derive(Default)]
struct ActiveTasks {
    inner: Mutex<HashMap<SurfaceId, Arc<dyn RenderTask>>>,
}

impl ActiveTasks {
    fn cancel(&self, surface: SurfaceId) {
        let task = self.inner.lock().remove(&surface);
        if let Some(task) = task {
            debug!(surface = ?surface, "cancelling in-flight render");
            task.cancel();
        }
    }

    fn register(&self, surface: SurfaceId, task: Arc<dyn RenderTask>) {
        self.inner.lock().insert(surface, task);
    }

    fn clear(&self, surface: SurfaceId) {
        self.inner.lock().remove(&surface);
    }

    fn cancel_all(&self) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        for (_, task) in drained {
            task.cancel();
        }
    }
}

struct LaneContext {
    ready: ReadyGate,
    document: DocumentSlot,
    active: Arc<ActiveTasks>,
    density: f32,
}

impl LaneContext {
    async fn execute(
        &self,
        page_number: usize,
        surface: &Arc<dyn RenderSurface>,
        scale: f32,
    ) -> Result<PageExtent, ViewerError> {
        self.ready.wait().await?;
        let document = self
            .document
            .read()
            .clone()
            .ok_or(ViewerError::Disposed)?;

        let count = document.page_count();
        if page_number < 1 || page_number > count {
            return Err(ViewerError::OutOfRange {
                page: page_number,
                count,
            });
        }

        let page = document
            .page(page_number)
            .await
            .map_err(EngineError::into_render)?;
        let extent = page.extent();
        let viewport = RenderViewport::compose(extent, scale, self.density);
        surface.resize_device(viewport.device);

        // A task may still be painting this surface from before the lane was
        // serialized behind us; replace it.
        self.active.cancel(surface.id());
        let task = page.render(surface.clone(), viewport);
        self.active.register(surface.id(), task.clone());
        let outcome = task.completed().await;
        self.active.clear(surface.id());
        outcome.map_err(EngineError::into_render)?;
        Ok(extent)
    }
}

/// Single-lane render serializer. Jobs run strictly one at a time in
/// submission order; submitting a new job for a surface cancels whatever
/// engine task is currently painting that surface, even mid-flight.
pub struct RenderQueue {
    jobs: mpsc::UnboundedSender<RenderJob>,
    active: Arc<ActiveTasks>,
    worker: JoinHandle<()>,
}

impl RenderQueue {
    pub fn new(ready: ReadyGate, document: DocumentSlot, density: f32) -> Self {
        let (jobs, mut jobs_rx) = mpsc::unbounded_channel::<RenderJob>();
        let active = Arc::new(ActiveTasks::default());
        let context = LaneContext {
            ready,
            document,
            active: active.clone(),
            density,
        };
        let worker = tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                let RenderJob {
                    page_number,
                    surface,
                    scale,
                    reply,
                } = job;
                let result = context.execute(page_number, &surface, scale).await;
                let _ = reply.send(result);
            }
        });
        Self {
            jobs,
            active,
            worker,
        }
    }

    pub async fn enqueue(
        &self,
        page_number: usize,
        surface: Arc<dyn RenderSurface>,
        scale: f32,
    ) -> Result<PageExtent, ViewerError> {
        // Newest submission wins for the surface: preempt before queueing so
        // a long-running paint stops promptly even while we wait our turn.
        self.active.cancel(surface.id());
        let (reply, settled) = oneshot::channel();
        let job = RenderJob {
            page_number,
            surface,
            scale,
            reply,
        };
        self.jobs.send(job).map_err(|_| ViewerError::Disposed)?;
        settled.await.map_err(|_| ViewerError::Disposed)?
    }

    pub fn shutdown(&self) {
        self.active.cancel_all();
        self.worker.abort();
    }
}

impl Drop for RenderQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::RwLock;
    use tokio::sync::Notify;

    use vellum_core::{DeviceSize, DocumentHandle, PageHandle, SurfaceTransform};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Started(usize),
        Settled(usize, bool),
    }

    struct FakeTask {
        page_number: usize,
        duration: Duration,
        cancelled: AtomicBool,
        wake: Notify,
        events: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait::async_trait]
    impl RenderTask for FakeTask {
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.wake.notify_waiters();
        }

        async fn completed(&self) -> Result<(), EngineError> {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.duration) => {}
            }
            let cancelled = self.cancelled.load(Ordering::SeqCst);
            self.events
                .lock()
                .push(Event::Settled(self.page_number, cancelled));
            if cancelled {
                Err(EngineError::Cancelled)
            } else {
                Ok(())
            }
        }
    }

    struct FakePage {
        page_number: usize,
        extent: PageExtent,
        duration: Duration,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl PageHandle for FakePage {
        fn extent(&self) -> PageExtent {
            self.extent
        }

        fn render(
            &self,
            _surface: Arc<dyn RenderSurface>,
            _viewport: RenderViewport,
        ) -> Arc<dyn RenderTask> {
            self.events.lock().push(Event::Started(self.page_number));
            Arc::new(FakeTask {
                page_number: self.page_number,
                duration: self.duration,
                cancelled: AtomicBool::new(false),
                wake: Notify::new(),
                events: self.events.clone(),
            })
        }
    }

    struct FakeDocument {
        pages: usize,
        // Pages in this set paint until cancelled; the rest settle quickly.
        slow_pages: Vec<usize>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait::async_trait]
    impl DocumentHandle for FakeDocument {
        fn page_count(&self) -> usize {
            self.pages
        }

        async fn page(&self, page_number: usize) -> Result<Arc<dyn PageHandle>, EngineError> {
            let duration = if self.slow_pages.contains(&page_number) {
                Duration::from_secs(60)
            } else {
                Duration::from_millis(5)
            };
            Ok(Arc::new(FakePage {
                page_number,
                extent: PageExtent::new(600.0, 800.0),
                duration,
                events: self.events.clone(),
            }))
        }
    }

    struct FakeSurface {
        id: SurfaceId,
        device: Mutex<Option<DeviceSize>>,
    }

    impl FakeSurface {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SurfaceId::next(),
                device: Mutex::new(None),
            })
        }
    }

    impl RenderSurface for FakeSurface {
        fn id(&self) -> SurfaceId {
            self.id
        }

        fn resize_device(&self, size: DeviceSize) {
            *self.device.lock() = Some(size);
        }

        fn set_presentation(&self, _transform: SurfaceTransform) {}
    }

    struct Fixture {
        queue: Arc<RenderQueue>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    fn fixture_with(pages: usize, slow_pages: Vec<usize>, density: f32) -> Fixture {
        let events = Arc::new(Mutex::new(Vec::new()));
        let ready = ReadyGate::new();
        let document: DocumentSlot = Arc::new(RwLock::new(None));
        *document.write() = Some(Arc::new(FakeDocument {
            pages,
            slow_pages,
            events: events.clone(),
        }) as Arc<dyn DocumentHandle>);
        ready.mark_ready();
        let queue = Arc::new(RenderQueue::new(ready, document, density));
        Fixture { queue, events }
    }

    fn fixture(pages: usize) -> Fixture {
        fixture_with(pages, Vec::new(), 1.0)
    }

    #[tokio::test]
    async fn jobs_run_one_at_a_time_in_submission_order() {
        let fx = fixture(5);
        let a = FakeSurface::new();
        let b = FakeSurface::new();

        let (first, second) = tokio::join!(
            fx.queue.enqueue(1, a.clone(), 1.0),
            fx.queue.enqueue(2, b.clone(), 1.0),
        );
        first.unwrap();
        second.unwrap();

        let events = fx.events.lock().clone();
        assert_eq!(
            events,
            vec![
                Event::Started(1),
                Event::Settled(1, false),
                Event::Started(2),
                Event::Settled(2, false),
            ]
        );
    }

    #[tokio::test]
    async fn newer_submission_cancels_the_render_painting_that_surface() {
        let fx = fixture_with(5, vec![1], 1.0);
        let surface = FakeSurface::new();

        let slow = {
            let queue = fx.queue.clone();
            let surface = surface.clone();
            tokio::spawn(async move { queue.enqueue(1, surface, 1.0).await })
        };
        // Let the first job start painting before preempting it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.events.lock().first(), Some(&Event::Started(1)));

        fx.queue.enqueue(2, surface.clone(), 1.0).await.unwrap();

        let first = slow.await.unwrap().unwrap_err();
        assert!(first.is_cancellation());

        let events = fx.events.lock().clone();
        assert_eq!(
            events,
            vec![
                Event::Started(1),
                Event::Settled(1, true),
                Event::Started(2),
                Event::Settled(2, false),
            ]
        );
    }

    #[tokio::test]
    async fn renders_for_other_surfaces_are_not_preempted() {
        let fx = fixture_with(5, vec![1], 1.0);
        let slow_surface = FakeSurface::new();
        let other_surface = FakeSurface::new();

        let slow = {
            let queue = fx.queue.clone();
            let surface = slow_surface.clone();
            tokio::spawn(async move { queue.enqueue(1, surface, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pending = {
            let queue = fx.queue.clone();
            let surface = other_surface.clone();
            tokio::spawn(async move { queue.enqueue(2, surface, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The lane is serialized, so the second job has not started, and the
        // first is still painting because it targets a different surface.
        assert_eq!(fx.events.lock().clone(), vec![Event::Started(1)]);

        fx.queue.shutdown();
        assert!(slow.await.unwrap().unwrap_err().is_cancellation());
        assert!(pending.await.unwrap().unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn out_of_range_pages_fail_without_poisoning_the_lane() {
        let fx = fixture(3);
        let surface = FakeSurface::new();

        let err = fx.queue.enqueue(9, surface.clone(), 1.0).await.unwrap_err();
        assert!(matches!(err, ViewerError::OutOfRange { page: 9, count: 3 }));

        fx.queue.enqueue(2, surface, 1.0).await.unwrap();
        assert!(fx.events.lock().contains(&Event::Started(2)));
    }

    #[tokio::test]
    async fn page_zero_is_out_of_range() {
        let fx = fixture(3);
        let surface = FakeSurface::new();
        let err = fx.queue.enqueue(0, surface, 1.0).await.unwrap_err();
        assert!(matches!(err, ViewerError::OutOfRange { page: 0, count: 3 }));
    }

    #[tokio::test]
    async fn jobs_wait_for_document_readiness() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let ready = ReadyGate::new();
        let document: DocumentSlot = Arc::new(RwLock::new(None));
        let queue = Arc::new(RenderQueue::new(ready.clone(), document.clone(), 1.0));
        let surface = FakeSurface::new();

        let pending = {
            let queue = queue.clone();
            let surface = surface.clone();
            tokio::spawn(async move { queue.enqueue(1, surface, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(events.lock().is_empty());

        *document.write() = Some(Arc::new(FakeDocument {
            pages: 3,
            slow_pages: Vec::new(),
            events: events.clone(),
        }) as Arc<dyn DocumentHandle>);
        ready.mark_ready();

        pending.await.unwrap().unwrap();
        assert!(events.lock().contains(&Event::Started(1)));
    }

    #[tokio::test]
    async fn surfaces_are_sized_in_device_pixels_before_painting() {
        let fx = fixture_with(3, Vec::new(), 2.0);
        let surface = FakeSurface::new();

        let extent = fx.queue.enqueue(1, surface.clone(), 1.5).await.unwrap();
        assert_eq!(extent.width, 600.0);

        // 600x800 at scale 1.5 and density 2.0.
        let device = surface.device.lock().unwrap();
        assert_eq!(device, DeviceSize { width: 1800, height: 2400 });
    }

    #[tokio::test]
    async fn shutdown_settles_pending_jobs_as_cancellations() {
        let fx = fixture_with(3, vec![1], 1.0);
        let surface = FakeSurface::new();

        let pending = {
            let queue = fx.queue.clone();
            let surface = surface.clone();
            tokio::spawn(async move { queue.enqueue(1, surface, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.queue.shutdown();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());

        // The lane is gone; later submissions settle the same quiet way.
        let err = fx.queue.enqueue(2, surface, 1.0).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
