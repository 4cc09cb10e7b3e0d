//! State values and store events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::HostObject;

/// A state value with its acknowledgement flag
///
/// `ack == false` marks a value requested by a user that has not yet been
/// confirmed by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub val: Value,
    pub ack: bool,
    /// When this value was written
    pub ts: DateTime<Utc>,
}

impl StateValue {
    /// Create a new StateValue with the current timestamp
    pub fn new(val: Value, ack: bool) -> Self {
        Self {
            val,
            ack,
            ts: Utc::now(),
        }
    }
}

/// Change notification published by a host store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Object written (`Some`) or deleted (`None`)
    ObjectChanged {
        id: String,
        object: Option<HostObject>,
    },
    /// State written (`Some`) or deleted (`None`)
    StateChanged {
        id: String,
        state: Option<StateValue>,
    },
}

impl StoreEvent {
    pub fn id(&self) -> &str {
        match self {
            StoreEvent::ObjectChanged { id, .. } | StoreEvent::StateChanged { id, .. } => id,
        }
    }
}
