//! Connection status and function table

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use whb_bridge::{BridgeStatus, FunctionInfo};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct FunctionsResponse {
    pub subnet: u32,
    pub items: Vec<FunctionInfo>,
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<BridgeStatus> {
    Json(state.bridge().status().await)
}

/// GET /functions
/// Usable functions of the connected subnet
pub async fn list_functions(
    State(state): State<AppState>,
) -> Result<Json<FunctionsResponse>, ApiError> {
    let session = state.session()?;
    Ok(Json(FunctionsResponse {
        subnet: session.subnet,
        items: session.functions.values().cloned().collect(),
    }))
}
