//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use careflow::data::Account;
use careflow::error::AppError;
use careflow::service::ChatBackend;
use careflow::{AppState, config};
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const SESSION_SECRET: &str = "test-secret-key-32-bytes-long!!!";

// =============================================================================
// Fake identity provider
// =============================================================================

#[derive(Default)]
struct FakeProviderState {
    /// Authorization code -> profile, removed on first exchange
    codes: Mutex<HashMap<String, Value>>,
    /// Access token -> profile
    tokens: Mutex<HashMap<String, Value>>,
    token_requests: AtomicUsize,
    issued: AtomicUsize,
}

/// Minimal OAuth 2.0 provider speaking the token and userinfo endpoints
pub struct FakeProvider {
    pub addr: String,
    state: Arc<FakeProviderState>,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: String,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let state = Arc::new(FakeProviderState::default());

        let app = Router::new()
            .route("/token", post(fake_token))
            .route("/userinfo", get(fake_userinfo))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Register a single-use authorization code for `profile`
    pub fn issue_code(&self, profile: Value) -> String {
        let n = self.state.issued.fetch_add(1, Ordering::SeqCst);
        let code = format!("code-{n}");
        self.state
            .codes
            .lock()
            .unwrap()
            .insert(code.clone(), profile);
        code
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }
}

async fn fake_token(
    State(state): State<Arc<FakeProviderState>>,
    Form(form): Form<TokenForm>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);

    if form.grant_type != "authorization_code" {
        return invalid_grant();
    }

    let Some(profile) = state.codes.lock().unwrap().remove(&form.code) else {
        return invalid_grant();
    };

    let access_token = format!("access-{}", form.code);
    state
        .tokens
        .lock()
        .unwrap()
        .insert(access_token.clone(), profile);

    Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3599,
        "scope": "profile email"
    }))
    .into_response()
}

async fn fake_userinfo(State(state): State<Arc<FakeProviderState>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    match state.tokens.lock().unwrap().get(token) {
        Some(profile) => Json(profile.clone()).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

fn invalid_grant() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant" })),
    )
        .into_response()
}

/// Userinfo document for a Google account
pub fn google_profile(external_id: &str) -> Value {
    json!({
        "id": external_id,
        "email": format!("{external_id}@example.com"),
        "verified_email": true,
        "name": "Ada Lovelace",
        "given_name": "Ada",
        "family_name": "Lovelace",
        "picture": "https://example.com/ada.png"
    })
}

// =============================================================================
// Chat backend
// =============================================================================

/// Chat backend that echoes and counts calls
#[derive(Default)]
pub struct RecordingChatBackend {
    calls: AtomicUsize,
}

impl RecordingChatBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for RecordingChatBackend {
    async fn reply(&self, account: &Account, message: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}: {}", account.first_name, message))
    }
}

// =============================================================================
// Test server
// =============================================================================

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: FakeProvider,
    pub chat: Arc<RecordingChatBackend>,
    pub _temp_dir: TempDir,
    /// Client that never follows redirects; cookies are handled by hand
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        careflow::metrics::init_metrics();

        let provider = FakeProvider::start().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "localhost:3000".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path,
                max_connections: 5,
            },
            auth: config::AuthConfig {
                session_secret: SESSION_SECRET.to_string(),
                session_max_age: 86_400,
                session_sweep_interval_seconds: 0,
                google: config::GoogleOAuthConfig {
                    client_id: "test-client-id".to_string(),
                    client_secret: "test-client-secret".to_string(),
                    callback_url: "http://localhost:3000/auth/google/callback".to_string(),
                    authorize_url: provider.url("/authorize"),
                    token_url: provider.url("/token"),
                    userinfo_url: provider.url("/userinfo"),
                },
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        config.validate().unwrap();

        let chat = Arc::new(RecordingChatBackend::default());
        let state = AppState::new(config)
            .await
            .unwrap()
            .with_chat_backend(chat.clone());

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = careflow::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            provider,
            chat,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// GET `path`, sending `session` as the session cookie when given
    pub async fn get(&self, path: &str, session: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(session) = session {
            request = request.header("Cookie", format!("session={session}"));
        }
        request.send().await.unwrap()
    }

    /// POST a chat message
    pub async fn post_chat(&self, message: &str, session: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/chat"))
            .json(&json!({ "message": message }));
        if let Some(session) = session {
            request = request.header("Cookie", format!("session={session}"));
        }
        request.send().await.unwrap()
    }

    /// Obtain a fresh anonymous session token
    pub async fn anonymous_session(&self) -> String {
        let response = self.get("/", None).await;
        assert_eq!(response.status(), 200);
        cookie_value(&response, "session").expect("anonymous session cookie")
    }

    /// Start a login: returns the CSRF state and the oauth_state cookie value
    pub async fn begin_login(&self, session: &str) -> (String, String) {
        let response = self.get("/auth/google", Some(session)).await;
        assert!(response.status().is_redirection());

        let location = location(&response);
        let url = url::Url::parse(&location).unwrap();
        let csrf_state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("state parameter");
        let cookie = cookie_value(&response, "oauth_state").expect("oauth_state cookie");

        (csrf_state, cookie)
    }

    /// Hit the callback with the given query and cookies
    pub async fn callback(
        &self,
        query: &str,
        session: &str,
        oauth_state: Option<&str>,
    ) -> reqwest::Response {
        let mut cookies = format!("session={session}");
        if let Some(oauth_state) = oauth_state {
            cookies.push_str(&format!("; oauth_state={oauth_state}"));
        }

        self.client
            .get(self.url(&format!("/auth/google/callback?{query}")))
            .header("Cookie", cookies)
            .send()
            .await
            .unwrap()
    }

    /// Delete an account row behind the portal's back
    ///
    /// The portal never removes accounts, so this goes through its own
    /// connection to the database file.
    pub async fn delete_account_row(&self, account_id: &str) {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&self.state.config.database.path);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&pool)
            .await
            .unwrap()
            .rows_affected();
        pool.close().await;
        assert_eq!(deleted, 1, "account {account_id} should exist");
    }

    /// Run a full login for `external_id` and return the authenticated session token
    pub async fn login_as(&self, external_id: &str) -> String {
        let session = self.anonymous_session().await;
        let (csrf_state, oauth_state) = self.begin_login(&session).await;
        let code = self.provider.issue_code(google_profile(external_id));

        let response = self
            .callback(
                &format!("code={code}&state={csrf_state}"),
                &session,
                Some(oauth_state.as_str()),
            )
            .await;
        assert!(response.status().is_redirection());
        assert_eq!(location(&response), "/dashboard");

        cookie_value(&response, "session").expect("rotated session cookie")
    }
}

/// Value of the named cookie set by the response, if any
pub fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.strip_prefix(&prefix))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .next()
}

/// Full Set-Cookie header for the named cookie, if any
pub fn set_cookie_header(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(ToString::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}
