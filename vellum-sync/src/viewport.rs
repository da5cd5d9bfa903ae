use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use vellum_core::{
    base_fit_scale, Camera, ContainerSize, FrameCoalescer, PageExtent, PeerId, RecordKey,
    RenderSurface, ReplicaStore, SurfaceTransform, SyncTiming, TrailingThrottle, ViewRecord,
};

struct SyncState {
    peer_id: PeerId,
    store: Arc<dyn ReplicaStore>,
    surface: Arc<dyn RenderSurface>,
    camera: Mutex<Camera>,
    container: Mutex<ContainerSize>,
    extent: Mutex<PageExtent>,
}

impl SyncState {
    /// Pushes the presentation transform derived from the current camera:
    /// scale relative to the base-fit scale, translation in container pixels.
    fn push_transform(&self) {
        let camera = *self.camera.lock();
        let container = *self.container.lock();
        let extent = *self.extent.lock();
        let base = base_fit_scale(extent, container);
        let scale = if base > 0.0 { camera.scale / base } else { 1.0 };
        self.surface.set_presentation(SurfaceTransform {
            translate_x: -camera.x * camera.scale,
            translate_y: -camera.y * camera.scale,
            scale,
        });
    }
}

/// Reconciles the shared camera rectangle across peers. Local changes are
/// published through a trailing-edge throttle, remote records are applied
/// unless they are our own echo, and the primary surface's presentation
/// transform is refreshed at most once per frame.
pub struct ViewportSync {
    state: Arc<SyncState>,
    publisher: TrailingThrottle<ViewRecord>,
    frames: FrameCoalescer,
}

impl ViewportSync {
    pub fn new(
        peer_id: PeerId,
        store: Arc<dyn ReplicaStore>,
        surface: Arc<dyn RenderSurface>,
        container: ContainerSize,
        timing: &SyncTiming,
    ) -> Self {
        let state = Arc::new(SyncState {
            peer_id,
            store,
            surface,
            camera: Mutex::new(Camera::default()),
            container: Mutex::new(container),
            extent: Mutex::new(PageExtent::new(0.0, 0.0)),
        });

        // Permission is re-checked when the throttle fires, not when the
        // camera change was submitted.
        let publisher = TrailingThrottle::new(timing.publish_window, {
            let state = state.clone();
            move |record: ViewRecord| {
                if !state.store.can_write() {
                    debug!("viewport publish dropped: writes not permitted");
                    return;
                }
                let value = match serde_json::to_value(&record) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(error = %err, "view record failed to encode");
                        return;
                    }
                };
                if let Err(err) = state.store.write(RecordKey::View, value) {
                    debug!(error = %err, "viewport publish rejected");
                }
            }
        });

        let frames = FrameCoalescer::new(timing.frame_interval, {
            let state = state.clone();
            move || state.push_transform()
        });

        Self {
            state,
            publisher,
            frames,
        }
    }

    pub fn camera(&self) -> Camera {
        *self.state.camera.lock()
    }

    /// Intrinsic size of the page the camera looks at; refreshed on page
    /// change so the base-fit scale stays correct.
    pub fn set_page_extent(&self, extent: PageExtent) {
        *self.state.extent.lock() = extent;
        self.frames.schedule();
    }

    /// Local camera change from user interaction. Updates the surface on the
    /// next frame and queues a throttled publish of the logical rectangle:
    /// the published size is the container divided by the camera scale, so
    /// peers with different window sizes converge on the same logical
    /// viewport rather than the same pixel rectangle.
    pub fn set_camera(&self, camera: Camera) {
        if !(camera.scale.is_finite() && camera.scale > 0.0) {
            debug!(scale = camera.scale, "degenerate camera ignored");
            return;
        }
        *self.state.camera.lock() = camera;
        self.frames.schedule();

        let container = *self.state.container.lock();
        self.publisher.submit(ViewRecord {
            owner_id: self.state.peer_id.as_str().to_owned(),
            origin_x: camera.x,
            origin_y: camera.y,
            width: container.width / camera.scale,
            height: container.height / camera.scale,
        });
    }

    /// Applies a replicated camera rectangle. Records carrying our own
    /// `owner_id` are self-echo and are dropped unless `force` is set; a peer
    /// that reconnects under the same id is indistinguishable from an echo,
    /// so hosts should mint a fresh peer id per connection. The camera scale
    /// is derived width-fit from the local container.
    pub fn apply_record(&self, record: &ViewRecord, force: bool) {
        if !force && record.owner_id == self.state.peer_id.as_str() {
            debug!(owner = %record.owner_id, "self-echo view record ignored");
            return;
        }
        if !(record.width.is_finite() && record.width > 0.0) {
            debug!(width = record.width, "degenerate view record ignored");
            return;
        }
        let container = *self.state.container.lock();
        *self.state.camera.lock() = Camera {
            x: record.origin_x,
            y: record.origin_y,
            scale: container.width / record.width,
        };
        self.frames.schedule();
    }

    /// One-shot unconditional re-application of the last shared state, used
    /// after a container resize and immediately after mount. With nothing
    /// shared yet, only the local transform is refreshed.
    pub fn reapply(&self) {
        match self.state.store.read(RecordKey::View) {
            Some(value) => match serde_json::from_value::<ViewRecord>(value) {
                Ok(record) => self.apply_record(&record, true),
                Err(err) => debug!(error = %err, "malformed view record ignored"),
            },
            None => self.frames.schedule(),
        }
    }

    pub fn container_resized(&self, size: ContainerSize) {
        *self.state.container.lock() = size;
        self.reapply();
    }

    pub fn shutdown(&self) {
        self.publisher.shutdown();
        self.frames.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::sleep;

    use vellum_core::{DeviceSize, MemoryReplicaStore, SurfaceId};

    struct TransformSurface {
        id: SurfaceId,
        transforms: Mutex<Vec<SurfaceTransform>>,
    }

    impl TransformSurface {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SurfaceId::next(),
                transforms: Mutex::new(Vec::new()),
            })
        }
    }

    impl RenderSurface for TransformSurface {
        fn id(&self) -> SurfaceId {
            self.id
        }

        fn resize_device(&self, _size: DeviceSize) {}

        fn set_presentation(&self, transform: SurfaceTransform) {
            self.transforms.lock().push(transform);
        }
    }

    fn fast_timing() -> SyncTiming {
        SyncTiming {
            publish_window: Duration::from_millis(30),
            frame_interval: Duration::from_millis(5),
        }
    }

    fn sync_for(
        store: &Arc<MemoryReplicaStore>,
        peer: &str,
        writable: bool,
    ) -> (ViewportSync, Arc<TransformSurface>) {
        let surface = TransformSurface::new();
        let sync = ViewportSync::new(
            PeerId::from(peer),
            store.handle(writable),
            surface.clone(),
            ContainerSize::new(1000.0, 800.0),
            &fast_timing(),
        );
        (sync, surface)
    }

    fn last_view_record(store: &Arc<MemoryReplicaStore>) -> Option<ViewRecord> {
        store
            .handle(false)
            .read(RecordKey::View)
            .map(|value| serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn rapid_camera_changes_publish_once_with_the_latest_value() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-a", true);
        let mut updates = store.handle(false).subscribe();

        sync.set_camera(Camera { x: 1.0, y: 0.0, scale: 1.0 });
        sync.set_camera(Camera { x: 5.0, y: 9.0, scale: 2.0 });
        sleep(Duration::from_millis(80)).await;

        let update = updates.try_recv().unwrap();
        assert_eq!(update.key, RecordKey::View);
        assert!(updates.try_recv().is_err());

        let record = last_view_record(&store).unwrap();
        assert_eq!(record.owner_id, "peer-a");
        assert_eq!(record.origin_x, 5.0);
        // 1000x800 container at scale 2.0.
        assert_eq!(record.width, 500.0);
        assert_eq!(record.height, 400.0);
    }

    #[tokio::test]
    async fn self_echo_is_ignored_unless_forced() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-a", true);

        let record = ViewRecord {
            owner_id: "peer-a".into(),
            origin_x: 40.0,
            origin_y: 10.0,
            width: 500.0,
            height: 400.0,
        };
        sync.apply_record(&record, false);
        assert_eq!(sync.camera(), Camera::default());

        sync.apply_record(&record, true);
        let camera = sync.camera();
        assert_eq!(camera.x, 40.0);
        assert_eq!(camera.scale, 2.0);
    }

    #[tokio::test]
    async fn remote_records_derive_the_scale_width_fit() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-b", true);

        sync.apply_record(
            &ViewRecord {
                owner_id: "peer-a".into(),
                origin_x: 12.0,
                origin_y: 30.0,
                width: 250.0,
                height: 200.0,
            },
            false,
        );

        let camera = sync.camera();
        assert_eq!(camera, Camera { x: 12.0, y: 30.0, scale: 4.0 });
    }

    #[tokio::test]
    async fn permission_is_checked_when_the_throttle_fires() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-a", false);

        sync.set_camera(Camera { x: 2.0, y: 2.0, scale: 1.0 });
        sleep(Duration::from_millis(80)).await;

        // The local camera moved, but nothing reached the store.
        assert_eq!(sync.camera().x, 2.0);
        assert!(last_view_record(&store).is_none());
    }

    #[tokio::test]
    async fn container_resize_reapplies_the_shared_state() {
        let store = MemoryReplicaStore::new();
        let writer = store.handle(true);
        writer
            .write(
                RecordKey::View,
                serde_json::to_value(ViewRecord {
                    owner_id: "peer-a".into(),
                    origin_x: 0.0,
                    origin_y: 0.0,
                    width: 500.0,
                    height: 400.0,
                })
                .unwrap(),
            )
            .unwrap();

        // The record is peer-a's own, but resize forces re-application.
        let (sync, _surface) = sync_for(&store, "peer-a", true);
        sync.container_resized(ContainerSize::new(2000.0, 1600.0));
        assert_eq!(sync.camera().scale, 4.0);
    }

    #[tokio::test]
    async fn transform_updates_coalesce_into_one_frame() {
        let store = MemoryReplicaStore::new();
        let (sync, surface) = sync_for(&store, "peer-a", true);
        sync.set_page_extent(PageExtent::new(500.0, 800.0));
        sleep(Duration::from_millis(40)).await;
        surface.transforms.lock().clear();

        sync.set_camera(Camera { x: 0.0, y: 0.0, scale: 1.0 });
        sync.set_camera(Camera { x: 10.0, y: 0.0, scale: 2.0 });
        sync.set_camera(Camera { x: 20.0, y: 5.0, scale: 4.0 });
        sleep(Duration::from_millis(40)).await;

        let transforms = surface.transforms.lock().clone();
        assert_eq!(transforms.len(), 1);
        // Base fit for a 500x800 page in a 1000x800 container is 1.0.
        assert_eq!(transforms[0].scale, 4.0);
        assert_eq!(transforms[0].translate_x, -80.0);
        assert_eq!(transforms[0].translate_y, -20.0);
    }

    #[tokio::test]
    async fn degenerate_records_and_cameras_are_dropped() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-a", true);

        sync.set_camera(Camera { x: 0.0, y: 0.0, scale: 0.0 });
        assert_eq!(sync.camera(), Camera::default());

        sync.apply_record(
            &ViewRecord {
                owner_id: "peer-b".into(),
                origin_x: 0.0,
                origin_y: 0.0,
                width: 0.0,
                height: 0.0,
            },
            false,
        );
        assert_eq!(sync.camera(), Camera::default());
    }

    #[tokio::test]
    async fn separate_windows_publish_separately() {
        let store = MemoryReplicaStore::new();
        let (sync, _surface) = sync_for(&store, "peer-a", true);
        let mut updates = store.handle(false).subscribe();

        sync.set_camera(Camera { x: 1.0, y: 0.0, scale: 1.0 });
        sleep(Duration::from_millis(80)).await;
        sync.set_camera(Camera { x: 2.0, y: 0.0, scale: 1.0 });
        sleep(Duration::from_millis(80)).await;

        assert!(updates.try_recv().is_ok());
        assert!(updates.try_recv().is_ok());
        assert_eq!(last_view_record(&store).unwrap().origin_x, 2.0);
    }
}
