use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::EngineError;
use crate::geometry::{device_size, DeviceSize, PageExtent, SurfaceTransform};
use crate::source::DocumentSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bitmap target owned by the host. The engine paints into it at device
/// resolution; the presentation transform positions it on screen without
/// re-rendering.
pub trait RenderSurface: Send + Sync {
    fn id(&self) -> SurfaceId;
    fn resize_device(&self, size: DeviceSize);
    fn set_presentation(&self, transform: SurfaceTransform);
}

#[derive(Debug, Clone, Copy)]
pub struct RenderViewport {
    pub scale: f32,
    pub device: DeviceSize,
}

impl RenderViewport {
    /// `scale` is the logical rendering scale; `density` the device-pixel
    /// multiplier. Both surfaces of a document share the same density.
    pub fn compose(extent: PageExtent, scale: f32, density: f32) -> Self {
        let effective = scale * density;
        Self {
            scale: effective,
            device: device_size(extent, effective),
        }
    }
}

/// Engine-owned in-flight render. Cancellation is cooperative: `cancel` asks
/// the engine to stop painting, and `completed` settles with
/// `EngineError::Cancelled`.
#[async_trait::async_trait]
pub trait RenderTask: Send + Sync {
    fn cancel(&self);
    async fn completed(&self) -> Result<(), EngineError>;
}

pub trait PageHandle: Send + Sync {
    fn extent(&self) -> PageExtent;
    fn render(&self, surface: Arc<dyn RenderSurface>, viewport: RenderViewport) -> Arc<dyn RenderTask>;
}

#[async_trait::async_trait]
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;
    /// 1-based page access, mirroring the render contract.
    async fn page(&self, page_number: usize) -> Result<Arc<dyn PageHandle>, EngineError>;
}

#[async_trait::async_trait]
pub trait DocumentEngine: Send + Sync {
    async fn decode(&self, source: DocumentSource) -> Result<Arc<dyn DocumentHandle>, EngineError>;
}

pub type DocumentSlot = Arc<RwLock<Option<Arc<dyn DocumentHandle>>>>;

type EngineInit = Box<dyn Fn() -> Arc<dyn DocumentEngine> + Send + Sync>;

/// Lazily-initialized engine handle owned by the host process and passed
/// explicitly into each viewer, so independent instances never share ambient
/// global state.
pub struct EngineSlot {
    cell: OnceCell<Arc<dyn DocumentEngine>>,
    init: EngineInit,
}

impl EngineSlot {
    pub fn new(init: impl Fn() -> Arc<dyn DocumentEngine> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        })
    }

    pub fn with_engine(engine: Arc<dyn DocumentEngine>) -> Arc<Self> {
        Self::new(move || engine.clone())
    }

    pub fn get(&self) -> Arc<dyn DocumentEngine> {
        self.cell.get_or_init(|| (self.init)()).clone()
    }

    pub fn initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
