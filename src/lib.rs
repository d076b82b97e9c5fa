//! CareFlow - a healthcare patient portal with Google sign-in
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Portal pages and chat API                                │
//! │  - Google OAuth login/logout                                │
//! │  - Health and metrics                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Auth and Service Layer                       │
//! │  - Session codec and access guards                          │
//! │  - Identity provider client                                 │
//! │  - Chat backend                                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): accounts and sessions                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for pages, chat and metrics
//! - `auth`: Google OAuth, sessions and access guards
//! - `service`: Chat backend
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Built once at startup and cloned for each request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Session issue/load/rotate/destroy
    pub sessions: Arc<auth::SessionCodec>,

    /// Delegated login provider
    pub identity: Arc<dyn auth::IdentityProvider>,

    /// Chat assistant behind `POST /chat`
    pub chat: Arc<dyn service::ChatBackend>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Build the session codec
    /// 3. Build the HTTP client and Google provider
    /// 4. Install the default chat backend
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect_with_pool_size(
            &config.database.path,
            config.database.max_connections,
        )
        .await?;
        let db = Arc::new(db);

        match db.count_accounts().await {
            Ok(count) => metrics::ACCOUNTS_TOTAL.set(count),
            Err(error) => tracing::warn!(%error, "Failed to count accounts"),
        }

        // 2. Session codec
        let sessions = auth::SessionCodec::new(
            db.clone(),
            config.auth.session_secret.clone(),
            config.auth.session_max_age,
            config.should_use_secure_cookies(),
        );

        // 3. HTTP client for the identity provider
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("CareFlow/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let identity = auth::GoogleProvider::new(http_client, config.auth.google.clone());

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            sessions: Arc::new(sessions),
            identity: Arc::new(identity),
            chat: Arc::new(service::CannedChatBackend::new()),
        })
    }

    /// Replace the chat backend
    pub fn with_chat_backend(mut self, chat: Arc<dyn service::ChatBackend>) -> Self {
        self.chat = chat;
        self
    }

    /// Replace the identity provider
    pub fn with_identity_provider(mut self, identity: Arc<dyn auth::IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Release shared resources after the server has drained
    pub async fn shutdown(&self) {
        self.db.close().await;
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let session_routes = Router::new()
        .merge(api::portal_router())
        .merge(auth::auth_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_layer,
        ));

    Router::new()
        .merge(session_routes)
        .route("/health", axum::routing::get(health_check))
        .merge(api::metrics_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Expired session sweeper
///
/// Runs until the returned handle is aborted. An interval of zero
/// disables the sweeper and returns `None`.
pub fn spawn_session_sweeper(state: AppState) -> Option<tokio::task::JoinHandle<()>> {
    let interval_secs = state.config.auth.session_sweep_interval_seconds;
    if interval_secs == 0 {
        tracing::info!("Session sweeper disabled");
        return None;
    }

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match state.sessions.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Purged expired sessions"),
                Err(error) => tracing::error!(%error, "Session sweep failed"),
            }
        }
    });

    tracing::info!(interval_secs, "Session sweeper spawned");
    Some(handle)
}

async fn health_check() -> &'static str {
    "OK"
}
