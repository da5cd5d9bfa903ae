pub mod config;
pub mod controller;
pub mod dispose;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod ready;
pub mod source;
pub mod store;
pub mod throttle;

pub use config::{
    NavigateHook, PageChangeHook, RenderEndHook, RenderErrorHook, SyncTiming, TransportPolicy,
    UrlRewriter, ViewerConfig, ViewerHooks, WriteGate, DEFAULT_CHUNK_SIZE,
    DEFAULT_WHOLE_FILE_THRESHOLD,
};
pub use controller::{KeyContext, KeyDirection, PageChange, PageIndexController, RequestOrigin};
pub use dispose::DisposalBag;
pub use engine::{
    DocumentEngine, DocumentHandle, DocumentSlot, EngineSlot, PageHandle, RenderSurface,
    RenderTask, RenderViewport, SurfaceId,
};
pub use error::{EngineError, TransportError, ViewerError};
pub use geometry::{
    base_fit_scale, capped_scale, device_size, Camera, ContainerSize, DeviceSize, PageExtent,
    SurfaceTransform,
};
pub use ready::ReadyGate;
pub use source::{ByteSource, DocumentSource, RangeChunk};
pub use store::{
    MemoryReplicaStore, PageRecord, PeerId, RecordKey, RecordUpdate, ReplicaStore, ViewRecord,
};
pub use throttle::{FrameCoalescer, TrailingThrottle};
