use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ViewerError;

/// Keys of the two replicated records a document shares between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Page,
    View,
}

impl RecordKey {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKey::Page => "page",
            RecordKey::View => "view",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    pub owner_id: String,
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewRecord {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            origin_x: 0.0,
            origin_y: 0.0,
            width: 0.0,
            height: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub key: RecordKey,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Last-writer-wins record store replicated between peers. Updates fan out to
/// every subscriber, the writer included, which is why consumers suppress
/// their own echoes by owner id rather than by subscription.
pub trait ReplicaStore: Send + Sync {
    fn read(&self, key: RecordKey) -> Option<serde_json::Value>;
    fn write(&self, key: RecordKey, value: serde_json::Value) -> Result<(), ViewerError>;
    fn can_write(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<RecordUpdate>;
}

/// In-process store shared by every peer handle, standing in for a remote
/// replication fabric.
pub struct MemoryReplicaStore {
    records: Mutex<HashMap<RecordKey, serde_json::Value>>,
    changes: broadcast::Sender<RecordUpdate>,
}

impl MemoryReplicaStore {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            changes,
        })
    }

    /// A peer's view of the store. Read-only handles observe every update but
    /// are refused writes.
    pub fn handle(self: &Arc<Self>, writable: bool) -> Arc<dyn ReplicaStore> {
        Arc::new(ReplicaHandle {
            store: self.clone(),
            writable,
        })
    }
}

struct ReplicaHandle {
    store: Arc<MemoryReplicaStore>,
    writable: bool,
}

impl ReplicaStore for ReplicaHandle {
    fn read(&self, key: RecordKey) -> Option<serde_json::Value> {
        self.store.records.lock().get(&key).cloned()
    }

    fn write(&self, key: RecordKey, value: serde_json::Value) -> Result<(), ViewerError> {
        if !self.writable {
            return Err(ViewerError::Permission);
        }
        self.store.records.lock().insert(key, value.clone());
        // No receivers is fine; nobody has joined yet.
        let _ = self.store.changes.send(RecordUpdate { key, value });
        Ok(())
    }

    fn can_write(&self) -> bool {
        self.writable
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordUpdate> {
        self.store.changes.subscribe()
    }
}
