//! Google OAuth flow
//!
//! Implements the OAuth 2.0 authorization code flow:
//! initiate, callback (exchange, profile fetch and validation, account
//! resolution, session commit) and logout.

use std::fmt;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use serde::Deserialize;

use super::middleware::CurrentSession;
use super::provider::{IdentityProvider, ProviderProfile};
use super::session::SessionCodec;
use crate::AppState;
use crate::data::{Account, Database, NewAccount};
use crate::error::AppError;
use crate::metrics::{ACCOUNTS_CREATED_TOTAL, ACCOUNTS_TOTAL, observe_login};

/// Cookie holding the CSRF `state` between initiate and callback
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

const OAUTH_STATE_COOKIE_PATH: &str = "/auth";

/// Where a successful login lands
pub const LOGIN_SUCCESS_REDIRECT: &str = "/dashboard";

/// Where every failed login lands
pub const LOGIN_FAILURE_REDIRECT: &str = "/login";

/// Create authentication router
///
/// Routes:
/// - GET /auth/:provider - Redirect to the identity provider
/// - GET /auth/:provider/callback - OAuth callback
/// - GET|POST /logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/:provider", get(initiate_login))
        .route("/auth/:provider/callback", get(login_callback))
        .route("/logout", get(logout).post(logout))
}

// =============================================================================
// Login flow
// =============================================================================

/// Step of the delegated login that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    /// Provider redirected back with an error, no code, or a bad `state`
    Authorization,
    CodeExchange,
    ProfileFetch,
    /// User-info document lacks a required field
    ProfileValidation,
    AccountResolution,
    SessionCommit,
}

impl LoginStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStage::Authorization => "authorization",
            LoginStage::CodeExchange => "code_exchange",
            LoginStage::ProfileFetch => "profile_fetch",
            LoginStage::ProfileValidation => "profile_validation",
            LoginStage::AccountResolution => "account_resolution",
            LoginStage::SessionCommit => "session_commit",
        }
    }
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed login, tagged with the stage it failed in
#[derive(Debug, thiserror::Error)]
#[error("login failed during {stage}: {source}")]
pub struct LoginError {
    pub stage: LoginStage,
    #[source]
    pub source: AppError,
}

impl LoginError {
    fn at(stage: LoginStage) -> impl FnOnce(AppError) -> LoginError {
        move |source| LoginError { stage, source }
    }
}

/// Runs the server-side half of the callback: exchange, profile, account.
pub struct LoginFlow<'a> {
    provider: &'a dyn IdentityProvider,
    db: &'a Database,
}

impl<'a> LoginFlow<'a> {
    pub fn new(provider: &'a dyn IdentityProvider, db: &'a Database) -> Self {
        Self { provider, db }
    }

    /// Turn an authorization code into a local account.
    ///
    /// The provider tokens are dropped as soon as the profile is fetched.
    pub async fn complete(&self, code: &str) -> Result<Account, LoginError> {
        let tokens = self
            .provider
            .exchange_code(code)
            .await
            .map_err(LoginError::at(LoginStage::CodeExchange))?;

        let userinfo = self
            .provider
            .fetch_profile(&tokens.access_token)
            .await
            .map_err(LoginError::at(LoginStage::ProfileFetch))?;

        let profile = ProviderProfile::from_userinfo(&userinfo)
            .map_err(LoginError::at(LoginStage::ProfileValidation))?;

        resolve_account(self.db, &profile)
            .await
            .map_err(LoginError::at(LoginStage::AccountResolution))
    }
}

/// Find the account for a profile, creating it on first sight.
///
/// A `Conflict` from the insert means another request created the account
/// first; the existing row is looked up and returned. Profile data on an
/// existing account is left untouched.
pub async fn resolve_account(db: &Database, profile: &ProviderProfile) -> Result<Account, AppError> {
    if let Some(account) = db.find_account_by_google_id(&profile.external_id).await? {
        tracing::debug!(account_id = %account.id, "Existing account signed in");
        return Ok(account);
    }

    match db.create_account(&NewAccount::from(profile)).await {
        Ok(account) => {
            ACCOUNTS_CREATED_TOTAL.inc();
            ACCOUNTS_TOTAL.inc();
            tracing::info!(
                account_id = %account.id,
                google_id = %account.google_id,
                "Account created on first sign-in"
            );
            Ok(account)
        }
        Err(AppError::Conflict(reason)) => {
            tracing::debug!(%reason, "Concurrent account creation; re-reading existing row");
            db.find_account_by_google_id(&profile.external_id)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "account for {} vanished after conflict",
                        profile.external_id
                    ))
                })
        }
        Err(error) => Err(error),
    }
}

// =============================================================================
// Initiate
// =============================================================================

/// GET /auth/:provider
///
/// Redirects the visitor to the provider's authorization page.
///
/// # Steps
/// 1. Generate CSRF state token
/// 2. Store state in cookie
/// 3. Redirect with client_id, redirect_uri, scope, state
async fn initiate_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    ensure_provider(&state, &provider)?;

    let csrf_state = generate_csrf_state();
    let authorization_url = state.identity.authorization_url(&csrf_state)?;
    let cookie = build_state_cookie(csrf_state, state.config.should_use_secure_cookies());

    tracing::debug!(provider = %provider, "Redirecting to identity provider");
    Ok((jar.add(cookie), Redirect::to(&authorization_url)))
}

// =============================================================================
// Callback
// =============================================================================

/// Query parameters on the provider redirect
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackQuery {
    /// Check the redirect itself before any network call is made.
    ///
    /// # Returns
    /// The authorization code
    pub fn authorization_code(&self, expected_state: Option<&str>) -> Result<&str, AppError> {
        if let Some(error) = &self.error {
            let description = self.error_description.as_deref().unwrap_or("no description");
            return Err(AppError::AuthProvider(format!(
                "provider returned error {error}: {description}"
            )));
        }

        let code = self
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AppError::AuthProvider("callback is missing the code".to_string()))?;

        match (self.state.as_deref(), expected_state) {
            (Some(received), Some(expected)) if states_match(received, expected) => Ok(code),
            _ => Err(AppError::AuthProvider(
                "callback state does not match the state cookie".to_string(),
            )),
        }
    }
}

/// GET /auth/:provider/callback
///
/// # Steps
/// 1. Verify the provider did not report an error and CSRF state matches
/// 2. Exchange code for access token
/// 3. Fetch profile
/// 4. Find or create the local account
/// 5. Rotate the session to carry the account and set the cookie
/// 6. Redirect to the dashboard
///
/// Any failure redirects to the login page without touching the session.
async fn login_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    ensure_provider(&state, &provider)?;

    let expected_state = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_owned());
    let jar = jar.add(clear_state_cookie());

    let result = async {
        let code = query
            .authorization_code(expected_state.as_deref())
            .map_err(LoginError::at(LoginStage::Authorization))?;

        let account = LoginFlow::new(state.identity.as_ref(), &state.db)
            .complete(code)
            .await?;

        let (_, token) = state
            .sessions
            .attach_account(session.as_ref(), &account)
            .await
            .map_err(LoginError::at(LoginStage::SessionCommit))?;

        Ok::<_, LoginError>((account, token))
    }
    .await;

    match result {
        Ok((account, token)) => {
            observe_login("success");
            tracing::info!(account_id = %account.id, "Login succeeded");
            let jar = jar.add(state.sessions.session_cookie(token));
            Ok((jar, Redirect::to(LOGIN_SUCCESS_REDIRECT)))
        }
        Err(error) => {
            observe_login(error.stage.as_str());
            tracing::warn!(
                stage = %error.stage,
                kind = error.source.kind(),
                error = %error.source,
                "Login failed"
            );
            Ok((jar, Redirect::to(LOGIN_FAILURE_REDIRECT)))
        }
    }
}

// =============================================================================
// Logout
// =============================================================================

/// GET|POST /logout
///
/// Destroys the server-side session, clears the cookie and redirects home.
async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(session) = &session {
        state.sessions.destroy(session).await?;
    }

    Ok((jar.add(SessionCodec::removal_cookie()), Redirect::to("/")))
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_provider(state: &AppState, provider: &str) -> Result<(), AppError> {
    if state.identity.name() == provider {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

/// Compare CSRF states without short-circuiting on the first differing byte
fn states_match(received: &str, expected: &str) -> bool {
    let (received, expected) = (received.as_bytes(), expected.as_bytes());
    received.len() == expected.len()
        && received
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Generate a random CSRF state token
fn generate_csrf_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn build_state_cookie(csrf_state: String, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, csrf_state))
        .path(OAUTH_STATE_COOKIE_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(10))
        .build()
}

fn clear_state_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((OAUTH_STATE_COOKIE, ""))
        .path(OAUTH_STATE_COOKIE_PATH)
        .http_only(true)
        .build();
    cookie.make_removal();
    cookie
}
