mod preview;
mod queue;
mod viewer;

pub use preview::{PreviewLazyLoader, TouchFn};
pub use queue::RenderQueue;
pub use viewer::Viewer;
