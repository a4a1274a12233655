//! HTTP server module
//!
//! - Axum router with health, version and extraction endpoints
//! - Shared state bounding concurrent extractions
//! - CORS middleware

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
