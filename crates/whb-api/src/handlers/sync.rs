//! Manual read-back

use axum::extract::State;
use axum::Json;
use whb_bridge::SyncReport;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /sync
/// Run one read-back cycle now
pub async fn run_sync(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    let report = state.bridge().update_now().await?;
    Ok(Json(report))
}
