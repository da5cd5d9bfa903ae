use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use vellum_core::{
    capped_scale, DisposalBag, DocumentSlot, EngineError, EngineSlot, KeyContext, KeyDirection,
    PageChange, PageExtent, PageIndexController, ReadyGate, RenderSurface, ViewerConfig,
    ViewerError, ViewerHooks, WriteGate,
};
use vellum_transport::{AbortFlag, DocumentTransport, HttpBackend};

use crate::preview::{PreviewLazyLoader, TouchFn};
use crate::queue::RenderQueue;

/// Base viewer: owns the document lifecycle, the render lane, and the page
/// index. Collaborative behavior is layered on through the injected hooks
/// rather than subclassing; the viewer calls them at the points a
/// collaborative layer cares about.
pub struct Viewer {
    config: ViewerConfig,
    hooks: ViewerHooks,
    primary: Arc<dyn RenderSurface>,
    ready: ReadyGate,
    document: DocumentSlot,
    queue: Arc<RenderQueue>,
    controller: Mutex<PageIndexController>,
    extents: RwLock<Vec<PageExtent>>,
    effective_scale: RwLock<f32>,
    abort: Arc<AbortFlag>,
    bag: DisposalBag,
}

impl Viewer {
    /// Returns immediately; the document load (URL rewrite, transport open,
    /// engine decode) runs as a spawned task and everything page-dependent
    /// parks on the ready gate until it finishes.
    pub fn launch(
        config: ViewerConfig,
        hooks: ViewerHooks,
        engine: Arc<EngineSlot>,
        backend: Arc<dyn HttpBackend>,
        primary: Arc<dyn RenderSurface>,
    ) -> Arc<Self> {
        let ready = ReadyGate::new();
        let document: DocumentSlot = Arc::new(RwLock::new(None));
        let abort = AbortFlag::new();
        let queue = Arc::new(RenderQueue::new(
            ready.clone(),
            document.clone(),
            config.effective_density(),
        ));

        let gate: WriteGate = {
            let readonly = config.readonly;
            let custom = hooks.write_gate.clone();
            Arc::new(move || {
                if readonly {
                    return false;
                }
                custom.as_ref().map(|gate| gate()).unwrap_or(true)
            })
        };

        let scale = config.scale;
        let viewer = Arc::new(Self {
            config,
            hooks,
            primary,
            ready,
            document,
            queue,
            controller: Mutex::new(PageIndexController::new(gate)),
            extents: RwLock::new(Vec::new()),
            effective_scale: RwLock::new(scale),
            abort,
            bag: DisposalBag::new(),
        });

        // Teardown runs in reverse registration order, so register the render
        // cancel first and the load abort second; preview detachment joins
        // the bag later and therefore runs before both.
        {
            let queue = viewer.queue.clone();
            viewer.bag.defer(move || queue.shutdown());
        }
        {
            let abort = viewer.abort.clone();
            let ready = viewer.ready.clone();
            viewer.bag.defer(move || {
                abort.trigger();
                ready.fail();
            });
        }

        tokio::spawn({
            let viewer = viewer.clone();
            async move { viewer.load(engine, backend).await }
        });
        viewer
    }

    #[instrument(skip_all, fields(url = %self.config.url))]
    async fn load(self: Arc<Self>, engine: Arc<EngineSlot>, backend: Arc<dyn HttpBackend>) {
        if let Err(err) = self.try_load(engine, backend).await {
            if err.is_cancellation() {
                debug!("document load cancelled");
                return;
            }
            warn!(error = %err, "document load failed");
            self.hooks.render_error(&err);
            self.dispose();
        }
    }

    async fn try_load(
        self: &Arc<Self>,
        engine: Arc<EngineSlot>,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<(), ViewerError> {
        let url = self.resolve_url();
        let transport = DocumentTransport::new(backend, self.config.transport.clone());
        let source = transport.open(&url, self.abort.clone()).await?;
        if self.bag.is_disposed() {
            return Err(ViewerError::Disposed);
        }

        let document = engine
            .get()
            .decode(source)
            .await
            .map_err(EngineError::into_decode)?;
        if self.bag.is_disposed() {
            return Err(ViewerError::Disposed);
        }

        let count = document.page_count();
        let mut extents = Vec::with_capacity(count);
        for page_number in 1..=count {
            let page = document
                .page(page_number)
                .await
                .map_err(EngineError::into_decode)?;
            extents.push(page.extent());
        }
        let scale = capped_scale(&extents, self.config.scale, self.config.max_page_pixels);
        *self.extents.write() = extents;
        *self.effective_scale.write() = scale;
        *self.document.write() = Some(document);
        info!(pages = count, scale, "document ready");

        let change = self.controller.lock().set_page_count(count);
        self.ready.mark_ready();
        if let Some(change) = change {
            self.hooks.page_change(change);
        }
        self.render_current();
        Ok(())
    }

    /// The rewrite hook runs once, before the first fetch, so a private
    /// locator can be swapped for a temporary public one.
    fn resolve_url(&self) -> Url {
        match &self.config.rewrite_url {
            Some(rewrite) => rewrite(self.config.url.clone()),
            None => self.config.url.clone(),
        }
    }

    /// Resolves once the document is decoded; fails with a cancellation
    /// flavor if the instance is disposed first.
    pub async fn ready(&self) -> Result<(), ViewerError> {
        self.ready.wait().await
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn current_index(&self) -> usize {
        self.controller.lock().current()
    }

    pub fn page_count(&self) -> usize {
        self.controller.lock().page_count()
    }

    pub fn effective_scale(&self) -> f32 {
        *self.effective_scale.read()
    }

    /// Intrinsic extent of the page currently shown on the primary surface.
    pub fn current_extent(&self) -> Option<PageExtent> {
        let index = self.controller.lock().current();
        self.extents.read().get(index).copied()
    }

    pub fn set_page_index(self: &Arc<Self>, index: usize) {
        let change = self.controller.lock().request_index(index);
        self.after_local_change(change);
    }

    pub fn next_page(self: &Arc<Self>) {
        let change = self.controller.lock().request_relative(1);
        self.after_local_change(change);
    }

    pub fn previous_page(self: &Arc<Self>) {
        let change = self.controller.lock().request_relative(-1);
        self.after_local_change(change);
    }

    /// Direct page-number entry, 1-based as displayed to the user.
    pub fn enter_page_number(self: &Arc<Self>, display_number: i64) {
        let change = self.controller.lock().request_entry(display_number);
        self.after_local_change(change);
    }

    pub fn key_navigate(self: &Arc<Self>, direction: KeyDirection, context: KeyContext) {
        let change = self.controller.lock().request_key(direction, context);
        self.after_local_change(change);
    }

    /// Inbound replicated page index. Accepted changes re-render and notify
    /// `on_page_change` but never `on_navigate`, so they are not republished.
    pub fn apply_remote_index(self: &Arc<Self>, index: u64) {
        let Some(change) = self.controller.lock().apply_remote(index) else {
            return;
        };
        self.hooks.page_change(change);
        self.render_current();
    }

    fn after_local_change(self: &Arc<Self>, change: Option<PageChange>) {
        let Some(change) = change else {
            return;
        };
        self.hooks.navigate(change.index);
        self.hooks.page_change(change);
        self.render_current();
    }

    fn render_current(self: &Arc<Self>) {
        let page_number = self.controller.lock().current() + 1;
        let viewer = self.clone();
        tokio::spawn(async move {
            if let Err(err) = viewer.render_page(page_number).await {
                viewer.report_render_error(err);
            }
        });
    }

    /// Renders `page_number` (1-based) on the primary surface at the
    /// effective scale. Out-of-range numbers fail with `OutOfRange`; the
    /// lane stays usable afterwards.
    pub async fn render_page(&self, page_number: usize) -> Result<PageExtent, ViewerError> {
        let scale = *self.effective_scale.read();
        let extent = self
            .queue
            .enqueue(page_number, self.primary.clone(), scale)
            .await?;
        self.hooks.render_end(page_number, extent);
        Ok(extent)
    }

    fn report_render_error(&self, err: ViewerError) {
        if err.is_cancellation() {
            debug!("superseded render settled quietly");
            return;
        }
        warn!(error = %err, "render failed");
        self.hooks.render_error(&err);
    }

    /// Builds the lazy loader over the given thumbnail surfaces, one per
    /// page in strip order. Touched surfaces render at the reduced preview
    /// scale through the shared lane. Returns `None` when previews are
    /// disabled by configuration.
    pub fn preview_loader(
        self: &Arc<Self>,
        surfaces: Vec<Arc<dyn RenderSurface>>,
    ) -> Option<Arc<PreviewLazyLoader>> {
        if !self.config.preview {
            return None;
        }
        let touch: TouchFn = {
            let viewer = Arc::downgrade(self);
            Arc::new(move |page_index, surface| {
                let Some(viewer) = viewer.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    let scale = *viewer.effective_scale.read() * viewer.config.preview_scale;
                    if let Err(err) = viewer.queue.enqueue(page_index + 1, surface, scale).await {
                        viewer.report_render_error(err);
                    }
                });
            })
        };
        let loader = Arc::new(PreviewLazyLoader::new(surfaces, touch));
        {
            let loader = loader.clone();
            self.bag.defer(move || loader.detach());
        }
        Some(loader)
    }

    pub fn is_disposed(&self) -> bool {
        self.bag.is_disposed()
    }

    /// Tears the instance down: destroyed flag first, then preview
    /// detachment, load abort, and render cancellation. Idempotent; never
    /// reports through the error hook.
    pub fn dispose(&self) {
        if !self.bag.is_disposed() {
            debug!(url = %self.config.url, "disposing viewer");
        }
        self.bag.dispose();
    }
}
