//! Application state for the bridge API

use std::sync::Arc;

use whb_bridge::{Bridge, Session};
use whb_core::HostStore;

use crate::error::ApiError;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    bridge: Arc<Bridge>,
}

impl AppState {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Host store behind the bridge
    pub fn store(&self) -> &Arc<dyn HostStore> {
        self.bridge.store()
    }

    /// Current session, or 503 while the controller is not connected
    pub fn session(&self) -> Result<Arc<Session>, ApiError> {
        self.bridge
            .session()
            .ok_or_else(|| ApiError::ServiceUnavailable("Not connected to the controller".to_string()))
    }
}
