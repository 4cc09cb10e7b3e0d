//! In-memory host store
//!
//! Keeps objects and states in sorted maps and publishes every change on a
//! broadcast channel. Optionally persisted as a JSON snapshot.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::models::{HostObject, StateValue, StoreEvent, ViewRow};
use crate::store::HostStore;

/// Capacity of the change notification channel
const EVENT_CAPACITY: usize = 1024;

/// Serialized form of a [`MemoryStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub objects: BTreeMap<String, HostObject>,
    #[serde(default)]
    pub states: BTreeMap<String, StateValue>,
}

/// Thread-safe in-memory [`HostStore`]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, HostObject>>,
    states: RwLock<BTreeMap<String, StateValue>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            states: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Create a store from a snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        *store.objects.write() = snapshot.objects;
        *store.states.write() = snapshot.states;
        store
    }

    /// Load a snapshot file; a missing file yields an empty store
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        debug!(
            path = %path.display(),
            objects = snapshot.objects.len(),
            states = snapshot.states.len(),
            "Loaded store snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the current content as a snapshot file
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let snapshot = self.snapshot();
        let content = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Copy of the current content
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            objects: self.objects.read().clone(),
            states: self.states.read().clone(),
        }
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is not an error
        if self.events.send(event).is_err() {
            debug!("Store event dropped, no subscribers");
        }
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn get_object(&self, id: &str) -> StoreResult<Option<HostObject>> {
        Ok(self.objects.read().get(id).cloned())
    }

    async fn set_object(&self, id: &str, object: HostObject) -> StoreResult<()> {
        self.objects.write().insert(id.to_string(), object.clone());
        self.publish(StoreEvent::ObjectChanged {
            id: id.to_string(),
            object: Some(object),
        });
        Ok(())
    }

    async fn set_object_not_exists(&self, id: &str, object: HostObject) -> StoreResult<bool> {
        {
            let mut objects = self.objects.write();
            if objects.contains_key(id) {
                return Ok(false);
            }
            objects.insert(id.to_string(), object.clone());
        }
        self.publish(StoreEvent::ObjectChanged {
            id: id.to_string(),
            object: Some(object),
        });
        Ok(true)
    }

    async fn del_object(&self, id: &str) -> StoreResult<()> {
        let removed = self.objects.write().remove(id).is_some();
        let had_state = self.states.write().remove(id).is_some();
        if removed {
            self.publish(StoreEvent::ObjectChanged {
                id: id.to_string(),
                object: None,
            });
        } else {
            warn!(id, "Delete of unknown object");
        }
        if had_state {
            self.publish(StoreEvent::StateChanged {
                id: id.to_string(),
                state: None,
            });
        }
        Ok(())
    }

    async fn object_view(&self, start: &str, end: &str) -> StoreResult<Vec<ViewRow>> {
        if start > end {
            return Ok(Vec::new());
        }
        let objects = self.objects.read();
        Ok(objects
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .map(|(id, value)| ViewRow {
                id: id.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<StateValue>> {
        Ok(self.states.read().get(id).cloned())
    }

    async fn set_state(&self, id: &str, val: Value, ack: bool) -> StoreResult<()> {
        let state = StateValue::new(val, ack);
        self.states.write().insert(id.to_string(), state.clone());
        self.publish(StoreEvent::StateChanged {
            id: id.to_string(),
            state: Some(state),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
