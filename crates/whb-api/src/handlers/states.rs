//! Host object and state handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use whb_core::{is_in_subtree, subtree_range, HostObject, StateValue};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Id prefix; defaults to the adapter namespace
    #[serde(default)]
    pub prefix: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
pub struct StateListResponse {
    pub count: usize,
    pub items: Vec<StateResponse>,
}

/// One host object with its current state
#[derive(Serialize)]
pub struct StateResponse {
    pub id: String,
    pub object: HostObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateValue>,
}

/// Request for state writes
#[derive(Deserialize)]
pub struct WriteStateRequest {
    pub val: Value,
}

#[derive(Serialize)]
pub struct WriteStateResponse {
    pub id: String,
    pub val: Value,
    pub ack: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /states?prefix=
/// Objects under a prefix with their current state values
pub async fn list_states(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<StateListResponse>, ApiError> {
    let prefix = query
        .prefix
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.bridge().namespace().to_string());
    let prefix = prefix.trim_end_matches('.');

    let (start, end) = subtree_range(prefix);
    let rows = state.store().object_view(&start, &end).await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows.into_iter().filter(|row| is_in_subtree(&row.id, prefix)) {
        let value = state.store().get_state(&row.id).await?;
        items.push(StateResponse {
            id: row.id,
            object: row.value,
            state: value,
        });
    }

    Ok(Json(StateListResponse {
        count: items.len(),
        items,
    }))
}

/// GET /states/{id}
pub async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    let object = state
        .store()
        .get_object(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Object not found: {}", id)))?;
    let value = state.store().get_state(&id).await?;

    Ok(Json(StateResponse {
        id,
        object,
        state: value,
    }))
}

/// PUT /states/{id}
///
/// Writes the value unacknowledged. The bridge picks it up and forwards it
/// to the controller, acknowledging the state once the controller accepted
/// it.
pub async fn write_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<WriteStateRequest>,
) -> Result<(StatusCode, Json<WriteStateResponse>), ApiError> {
    if state.store().get_object(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Object not found: {}", id)));
    }
    state
        .store()
        .set_state(&id, request.val.clone(), false)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(WriteStateResponse {
            id,
            val: request.val,
            ack: false,
        }),
    ))
}
