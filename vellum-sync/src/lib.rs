mod viewport;

pub use viewport::ViewportSync;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vellum_core::{
    ContainerSize, EngineSlot, PageRecord, PeerId, RecordKey, RecordUpdate, RenderSurface,
    ReplicaStore, ViewRecord, ViewerConfig, ViewerHooks, WriteGate,
};
use vellum_render::Viewer;
use vellum_transport::HttpBackend;

/// Collaborative viewer: a base viewer wired to a replica store. Both
/// replicated records are read on join and subscribed for live updates;
/// accepted local navigations publish the page record, and the viewport
/// protocol runs against the view record.
pub struct SharedViewer {
    viewer: Arc<Viewer>,
    viewport: Arc<ViewportSync>,
    store: Arc<dyn ReplicaStore>,
    peer_id: PeerId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SharedViewer {
    pub fn launch(
        config: ViewerConfig,
        hooks: ViewerHooks,
        engine: Arc<EngineSlot>,
        backend: Arc<dyn HttpBackend>,
        primary: Arc<dyn RenderSurface>,
        store: Arc<dyn ReplicaStore>,
        peer_id: PeerId,
        container: ContainerSize,
    ) -> Arc<Self> {
        let timing = config.timing.clone();
        let hooks = Self::collaborative_hooks(hooks, &store);
        let viewport = Arc::new(ViewportSync::new(
            peer_id.clone(),
            store.clone(),
            primary.clone(),
            container,
            &timing,
        ));
        let viewer = Viewer::launch(config, hooks, engine, backend, primary);

        let shared = Arc::new(Self {
            viewer,
            viewport,
            store,
            peer_id,
            join: Mutex::new(None),
        });
        let join = tokio::spawn({
            let shared = shared.clone();
            async move { shared.join().await }
        });
        *shared.join.lock() = Some(join);
        shared
    }

    /// Extends the injected hooks with the collaborative concerns: local
    /// writes are additionally gated by the store's permission, re-checked
    /// per request, and accepted navigations publish the page record.
    fn collaborative_hooks(mut hooks: ViewerHooks, store: &Arc<dyn ReplicaStore>) -> ViewerHooks {
        let gate: WriteGate = {
            let store = store.clone();
            let custom = hooks.write_gate.clone();
            Arc::new(move || store.can_write() && custom.as_ref().map(|gate| gate()).unwrap_or(true))
        };
        hooks.write_gate = Some(gate);

        let navigate = {
            let store = store.clone();
            let user = hooks.on_navigate.clone();
            Arc::new(move |index: usize| {
                publish_page(store.as_ref(), index);
                if let Some(hook) = &user {
                    hook(index);
                }
            })
        };
        hooks.on_navigate = Some(navigate);
        hooks
    }

    async fn join(self: Arc<Self>) {
        if self.viewer.ready().await.is_err() {
            return;
        }
        if let Some(extent) = self.viewer.current_extent() {
            self.viewport.set_page_extent(extent);
        }

        // Subscribe before the initial reads so no update can slip between.
        let mut updates = self.store.subscribe();
        if let Some(value) = self.store.read(RecordKey::Page) {
            match serde_json::from_value::<PageRecord>(value) {
                Ok(record) => self.viewer.apply_remote_index(record.index),
                Err(err) => debug!(error = %err, "malformed page record ignored"),
            }
        }
        // Initial mount applies the shared camera unconditionally.
        self.viewport.reapply();

        loop {
            match updates.recv().await {
                Ok(update) => {
                    if self.viewer.is_disposed() {
                        break;
                    }
                    self.dispatch(update);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "replica updates lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn dispatch(&self, update: RecordUpdate) {
        match update.key {
            RecordKey::Page => match serde_json::from_value::<PageRecord>(update.value) {
                Ok(record) => {
                    // Our own publish echoes back here; the controller
                    // de-duplicates it into a no-op.
                    self.viewer.apply_remote_index(record.index);
                    if let Some(extent) = self.viewer.current_extent() {
                        self.viewport.set_page_extent(extent);
                    }
                }
                Err(err) => debug!(error = %err, "malformed page record ignored"),
            },
            RecordKey::View => match serde_json::from_value::<ViewRecord>(update.value) {
                Ok(record) => self.viewport.apply_record(&record, false),
                Err(err) => debug!(error = %err, "malformed view record ignored"),
            },
        }
    }

    pub fn viewer(&self) -> &Arc<Viewer> {
        &self.viewer
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn camera(&self) -> vellum_core::Camera {
        self.viewport.camera()
    }

    /// Local camera change; throttled publish plus frame-scheduled surface
    /// transform.
    pub fn set_camera(&self, camera: vellum_core::Camera) {
        self.viewport.set_camera(camera);
    }

    pub fn container_resized(&self, size: ContainerSize) {
        self.viewport.container_resized(size);
    }

    pub fn dispose(&self) {
        if let Some(handle) = self.join.lock().take() {
            handle.abort();
        }
        self.viewport.shutdown();
        self.viewer.dispose();
    }
}

fn publish_page(store: &dyn ReplicaStore, index: usize) {
    // The permission predicate is consulted at the moment of write.
    if !store.can_write() {
        debug!(index, "page publish dropped: writes not permitted");
        return;
    }
    let value = serde_json::json!({ "index": index as u64 });
    if let Err(err) = store.write(RecordKey::Page, value) {
        debug!(index, error = %err, "page publish rejected");
    }
}
