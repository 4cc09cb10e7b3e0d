//! Structure export and import handlers

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use whb_bridge::{ExportDocument, ExportKind, ImportReport};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// `flat` (default) or `struct`
    #[serde(rename = "type", default)]
    pub kind: ExportKind,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    /// Delete the managed subtree before importing
    #[serde(default)]
    pub delete_first: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /export?type=flat|struct
pub async fn export_structure(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportDocument>, ApiError> {
    let doc = state.bridge().export_document(query.kind).await?;
    Ok(Json(doc))
}

/// POST /import?delete_first=bool
///
/// The body is an export document. Its `model` and `type` are checked before
/// anything is written.
pub async fn import_structure(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    Json(body): Json<Value>,
) -> Result<Json<ImportReport>, ApiError> {
    let doc = ExportDocument::from_value(&body)?;
    info!(kind = doc.kind(), delete_first = query.delete_first, "Importing structure");
    let report = state
        .bridge()
        .import_document(doc, query.delete_first)
        .await?;
    Ok(Json(report))
}

/// POST /export/known
/// Known datapoints per function type, also written to the `export` state
pub async fn export_known(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let doc = state.bridge().export_known().await?;
    Ok(Json(doc))
}
