use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;

/// One fulfilled range read. `is_final` marks the chunk whose `end` reaches
/// the document length; the engine uses it instead of probing for an empty
/// trailing response.
#[derive(Debug, Clone)]
pub struct RangeChunk {
    pub bytes: Bytes,
    pub begin: u64,
    pub end: u64,
    pub is_final: bool,
}

/// Demand-driven byte access handed to the decoding engine. The engine pulls
/// exactly the ranges it needs at `chunk_size` granularity; the source never
/// guesses offsets.
#[async_trait::async_trait]
pub trait ByteSource: Send + Sync {
    fn length(&self) -> u64;
    fn chunk_size(&self) -> usize;
    async fn read_range(&self, begin: u64, end: u64) -> Result<RangeChunk, TransportError>;
    fn abort(&self);
}

#[derive(Clone)]
pub enum DocumentSource {
    Whole(Bytes),
    Ranged(Arc<dyn ByteSource>),
}

impl DocumentSource {
    pub fn len(&self) -> u64 {
        match self {
            Self::Whole(bytes) => bytes.len() as u64,
            Self::Ranged(source) => source.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(bytes) => f.debug_tuple("Whole").field(&bytes.len()).finish(),
            Self::Ranged(source) => f
                .debug_struct("Ranged")
                .field("length", &source.length())
                .field("chunk_size", &source.chunk_size())
                .finish(),
        }
    }
}
