//! whb-core - Host store abstraction for the Windhager bridge
//!
//! This crate provides the boundary to the home-automation host: the object
//! and state model, the [`HostStore`] trait with an in-memory implementation,
//! and the [`AdapterHandler`] lifecycle callbacks.

pub mod adapter;
pub mod error;
pub mod memory;
pub mod models;
pub mod store;

pub use adapter::{dispatch_event, AdapterHandler};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, Snapshot};
pub use models::*;
pub use store::{is_in_subtree, merge_json, subtree_range, HostStore, VIEW_END};
