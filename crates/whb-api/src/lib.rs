//! whb-api - REST API over the Windhager bridge
//!
//! Exposes the connection status, the mirrored host states and the structure
//! import/export of a running [`Bridge`](whb_bridge::Bridge).
//!
//! # Usage
//!
//! ```ignore
//! use whb_api::{create_router, AppState};
//!
//! let bridge = Arc::new(Bridge::new(settings, language, gateway, store, config));
//! let router = create_router(AppState::new(bridge));
//! ```

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the bridge REST API router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Connection
        .route("/status", get(handlers::status::get_status))
        .route("/functions", get(handlers::status::list_functions))
        // Host states
        .route("/states", get(handlers::states::list_states))
        .route(
            "/states/{id}",
            get(handlers::states::get_state).put(handlers::states::write_state),
        )
        // Read-back
        .route("/sync", post(handlers::sync::run_sync))
        // Structure
        .route("/export", get(handlers::structure::export_structure))
        .route("/export/known", post(handlers::structure::export_known))
        .route("/import", post(handlers::structure::import_structure))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
