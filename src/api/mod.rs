//! API layer
//!
//! HTTP handlers for:
//! - Portal pages (HTML)
//! - Chat and account API (JSON)
//! - Metrics (Prometheus)

mod chat;
mod dto;
pub mod metrics;
mod pages;

pub use dto::*;

pub use metrics::metrics_router;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// Create portal router
///
/// Routes:
/// - GET / - Home
/// - GET /services, GET /doctors - Static pages
/// - GET /login, GET /signup - Anonymous only
/// - GET /dashboard - Authenticated page
/// - POST /chat - Authenticated API
/// - GET /api/me - Authenticated API
///
/// Access requirements are declared by each handler's extractors.
pub fn portal_router() -> Router<AppState> {
    Router::new()
        .route("/", get(pages::home))
        .route("/services", get(pages::services))
        .route("/doctors", get(pages::doctors))
        .route("/login", get(pages::login))
        .route("/signup", get(pages::signup))
        .route("/dashboard", get(pages::dashboard))
        .route("/chat", post(chat::chat))
        .route("/api/me", get(chat::me))
}
