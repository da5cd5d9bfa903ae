use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{url}: HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("{url}: {message}")]
    Network { url: String, message: String },
    #[error("transfer aborted")]
    Aborted,
}

/// Failures reported by the external rendering engine. Cancellation stays a
/// distinct variant so superseded work can be told apart from real failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn into_decode(self) -> ViewerError {
        match self {
            Self::Cancelled => ViewerError::Cancelled,
            Self::Other(err) => ViewerError::Decode(err),
        }
    }

    pub fn into_render(self) -> ViewerError {
        match self {
            Self::Cancelled => ViewerError::Cancelled,
            Self::Other(err) => ViewerError::Render(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("page {page} out of range 1..={count}")]
    OutOfRange { page: usize, count: usize },
    #[error("document decode failed: {0}")]
    Decode(#[source] anyhow::Error),
    #[error("render failed: {0}")]
    Render(#[source] anyhow::Error),
    #[error("write not permitted")]
    Permission,
    #[error("viewer disposed")]
    Disposed,
}

impl ViewerError {
    /// Cancellation-flavored errors are an expected consequence of rapid
    /// navigation or disposal and are suppressed rather than surfaced.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Disposed | Self::Transport(TransportError::Aborted)
        )
    }
}
