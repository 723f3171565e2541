//! Route definitions.

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, providers};
use crate::middleware::require_token;
use crate::state::AppState;

/// Create the cache server router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(request_routes(state.clone()))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{request_id}/v1/providers/{hostname}/{namespace}/{type}/versions",
            get(providers::list_versions),
        )
        .route(
            "/{request_id}/v1/providers/{hostname}/{namespace}/{type}/{version}/download/{os}/{arch}",
            get(providers::download),
        )
        .route(
            // Same capture name as above; the segment holds `<os>_<arch>`.
            "/{request_id}/v1/providers/{hostname}/{namespace}/{type}/{version}/download/{os}",
            get(providers::download_platform),
        )
        .route(
            "/{request_id}/archives/{hostname}/{namespace}/{type}/{version}/{platform}",
            get(providers::archive),
        )
        .route_layer(middleware::from_fn_with_state(state, require_token))
}
