//! HostStore trait - the boundary to the home-automation host
//!
//! The host keeps a tree of structured objects addressed by dotted ids
//! (`windhager.0.60.1-1.0.00-001`) and a value+ack state per id. Queries over
//! the tree are range views sorted by id.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};
use crate::models::{HostObject, StateValue, StoreEvent, ViewRow};

/// Upper sentinel for range views (`prefix` .. `prefix.\u{9999}`)
pub const VIEW_END: char = '\u{9999}';

/// Bounds of the range view covering `prefix` and everything below it
pub fn subtree_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), format!("{}.{}", prefix, VIEW_END))
}

/// Whether `id` is `prefix` itself or lies strictly below it
pub fn is_in_subtree(id: &str, prefix: &str) -> bool {
    id == prefix
        || (id.len() > prefix.len()
            && id.starts_with(prefix)
            && id.as_bytes()[prefix.len()] == b'.')
}

/// Object/state store of the host platform
///
/// Implementations must be safe to share between the bridge worker, the
/// interval loop and the HTTP API.
#[async_trait]
pub trait HostStore: Send + Sync {
    // =========================================================================
    // Objects
    // =========================================================================

    /// Get an object by id
    async fn get_object(&self, id: &str) -> StoreResult<Option<HostObject>>;

    /// Create or replace an object
    async fn set_object(&self, id: &str, object: HostObject) -> StoreResult<()>;

    /// Create an object only if the id is free
    ///
    /// Returns `true` if the object was created.
    async fn set_object_not_exists(&self, id: &str, object: HostObject) -> StoreResult<bool> {
        if self.get_object(id).await?.is_some() {
            return Ok(false);
        }
        self.set_object(id, object).await?;
        Ok(true)
    }

    /// Deep-merge `patch` into an existing object
    async fn extend_object(&self, id: &str, patch: Value) -> StoreResult<HostObject> {
        let current = self
            .get_object(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut merged = serde_json::to_value(&current)?;
        merge_json(&mut merged, patch);
        let object: HostObject =
            serde_json::from_value(merged).map_err(|e| StoreError::InvalidObject {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        self.set_object(id, object.clone()).await?;
        Ok(object)
    }

    /// Delete an object and its state
    async fn del_object(&self, id: &str) -> StoreResult<()>;

    /// Range view over object ids in `[start, end]`, sorted by id
    async fn object_view(&self, start: &str, end: &str) -> StoreResult<Vec<ViewRow>>;

    // =========================================================================
    // States
    // =========================================================================

    /// Get the state of an id
    async fn get_state(&self, id: &str) -> StoreResult<Option<StateValue>>;

    /// Write a state value
    async fn set_state(&self, id: &str, val: Value, ack: bool) -> StoreResult<()>;

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Subscribe to object and state changes
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Recursively merge `patch` into `target`; objects merge, everything else
/// replaces.
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(&key) {
                        merge_json(existing, value);
                    }
                } else {
                    target.insert(key, value);
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subtree_membership() {
        assert!(is_in_subtree("windhager.0.60", "windhager.0.60"));
        assert!(is_in_subtree("windhager.0.60.1-1", "windhager.0.60"));
        assert!(!is_in_subtree("windhager.0.601", "windhager.0.60"));
        assert!(!is_in_subtree("windhager.0.60-x", "windhager.0.60"));
        assert!(!is_in_subtree("windhager.0", "windhager.0.60"));
    }

    #[test]
    fn test_subtree_range() {
        let (start, end) = subtree_range("a.b");
        assert_eq!(start, "a.b");
        assert!(end.as_str() > "a.b.zzz");
        assert!(end.as_str() > "a.b.60.1-1.0.00-001");
    }

    #[test]
    fn test_merge_json() {
        let mut target = json!({ "common": { "name": "x", "enabled": true }, "native": {} });
        merge_json(
            &mut target,
            json!({ "common": { "enabled": false }, "native": { "knownDPs": { "a": 1 } } }),
        );
        assert_eq!(
            target,
            json!({ "common": { "name": "x", "enabled": false }, "native": { "knownDPs": { "a": 1 } } })
        );
    }
}
