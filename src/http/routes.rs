//! Axum router configuration

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{extract, health_check, version_check};
use super::state::AppState;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/extract", post(extract))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(allowed_origins(&state.config.cors_origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}

/// The configured origins; any origin when none are listed.
fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.is_empty() {
        tracing::warn!("CORS enabled without cors_origins, allowing any origin");
        return AllowOrigin::from(Any);
    }
    let values = origins.iter().filter_map(|origin| match HeaderValue::from_str(origin) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
            None
        }
    });
    AllowOrigin::list(values)
}
