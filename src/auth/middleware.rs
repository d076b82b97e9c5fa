//! Authentication middleware
//!
//! `session_layer` makes sure every portal request carries a session.
//! The extractors below declare what a route requires of that session.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderValue, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use async_trait::async_trait;
use axum_extra::extract::CookieJar;

use super::oauth::{LOGIN_FAILURE_REDIRECT, LOGIN_SUCCESS_REDIRECT};
use super::session::{Resolution, SESSION_COOKIE_NAME};
use crate::AppState;
use crate::data::{Account, SessionRecord};
use crate::error::AppError;

/// The session attached to the current request by [`session_layer`]
#[derive(Debug, Clone)]
pub struct ActiveSession(pub SessionRecord);

/// Middleware that loads or issues the browser's session
///
/// A missing, tampered, unknown or expired cookie gets a fresh anonymous
/// session. The new cookie is added to the response unless the handler
/// already set one (login rotation and logout do).
///
/// When the session store fails, portal routes answer 500. Routes under
/// `/auth/` run without a session instead, so the login callback can still
/// clear its state cookie and redirect to the login page.
///
/// # Usage
/// ```ignore
/// let portal = Router::new()
///     .route("/dashboard", ...)
///     .layer(middleware::from_fn_with_state(state, session_layer));
/// ```
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (session, issued_token) = match load_or_issue(&state, &jar).await {
        Ok(loaded) => loaded,
        Err(error) if runs_without_session(request.uri().path()) => {
            tracing::warn!(
                path = %request.uri().path(),
                kind = error.kind(),
                %error,
                "Session store unavailable; continuing without a session"
            );
            return Ok(next.run(request).await);
        }
        Err(error) => return Err(error),
    };

    request.extensions_mut().insert(ActiveSession(session));
    let mut response = next.run(request).await;

    if let Some(token) = issued_token {
        if !sets_session_cookie(&response) {
            let cookie = state.sessions.session_cookie(token);
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(error) => {
                    tracing::error!(%error, "Session cookie is not a valid header value");
                }
            }
        }
    }

    Ok(response)
}

/// Existing session for the cookie, or a fresh one with its new token
async fn load_or_issue(
    state: &AppState,
    jar: &CookieJar,
) -> Result<(SessionRecord, Option<String>), AppError> {
    let existing = match jar.get(SESSION_COOKIE_NAME) {
        Some(cookie) => state.sessions.load(cookie.value()).await?,
        None => None,
    };

    match existing {
        Some(session) => Ok((session, None)),
        None => {
            let (session, token) = state.sessions.issue().await?;
            Ok((session, Some(token)))
        }
    }
}

/// Login routes degrade to "no session" when the store is down
fn runs_without_session(path: &str) -> bool {
    path.starts_with("/auth/")
}

fn sets_session_cookie(response: &Response) -> bool {
    let prefix = format!("{SESSION_COOKIE_NAME}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix))
}

// =============================================================================
// Access requirements
// =============================================================================

/// What a route requires of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Login/signup pages; authenticated visitors are sent to the dashboard
    MustBeAnonymous,
    /// Page routes; anonymous visitors are sent to the login page
    MustBeAuthenticated,
    /// API routes; anonymous callers get 401
    MustBeAuthenticatedApi,
}

impl Access {
    /// Decide whether a request with this resolution may proceed.
    pub fn check(self, resolution: &Resolution) -> Result<(), GuardRejection> {
        match (self, resolution.is_authenticated()) {
            (Access::Public, _) => Ok(()),
            (Access::MustBeAnonymous, false) => Ok(()),
            (Access::MustBeAnonymous, true) => Err(GuardRejection::AlreadyAuthenticated),
            (Access::MustBeAuthenticated, true) | (Access::MustBeAuthenticatedApi, true) => Ok(()),
            (Access::MustBeAuthenticated, false) => Err(GuardRejection::LoginRequired),
            (Access::MustBeAuthenticatedApi, false) => Err(GuardRejection::Unauthenticated),
        }
    }
}

/// Why a guarded extractor refused the request
#[derive(Debug)]
pub enum GuardRejection {
    /// Redirect to the login page
    LoginRequired,
    /// 401 JSON response
    Unauthenticated,
    /// Redirect to the dashboard
    AlreadyAuthenticated,
    /// The session could not be resolved (e.g. database down)
    Failed(AppError),
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match self {
            GuardRejection::LoginRequired => Redirect::to(LOGIN_FAILURE_REDIRECT).into_response(),
            GuardRejection::Unauthenticated => AppError::Unauthorized.into_response(),
            GuardRejection::AlreadyAuthenticated => {
                Redirect::to(LOGIN_SUCCESS_REDIRECT).into_response()
            }
            GuardRejection::Failed(error) => error.into_response(),
        }
    }
}

/// Resolve the request's session once and cache the result
async fn resolve_request(parts: &mut Parts, state: &AppState) -> Result<Resolution, AppError> {
    if let Some(resolution) = parts.extensions.get::<Resolution>() {
        return Ok(resolution.clone());
    }

    let resolution = match parts.extensions.get::<ActiveSession>() {
        Some(ActiveSession(session)) => state.sessions.resolve(session).await?,
        None => Resolution::Anonymous,
    };

    parts.extensions.insert(resolution.clone());
    Ok(resolution)
}

async fn guard<S>(parts: &mut Parts, state: &S, access: Access) -> Result<Resolution, GuardRejection>
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    let app_state = AppState::from_ref(state);
    let resolution = resolve_request(parts, &app_state)
        .await
        .map_err(GuardRejection::Failed)?;
    access.check(&resolution)?;
    Ok(resolution)
}

// =============================================================================
// Extractors
// =============================================================================

/// The raw session row, if the session layer ran
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Option<SessionRecord>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentSession(
            parts
                .extensions
                .get::<ActiveSession>()
                .map(|active| active.0.clone()),
        ))
    }
}

/// Optional account for public routes
///
/// Database failures are still errors; they never degrade to anonymous.
#[derive(Debug, Clone)]
pub struct MaybeAccount(pub Option<Account>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAccount
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolution = guard(parts, state, Access::Public).await?;
        Ok(MaybeAccount(resolution.into_account()))
    }
}

/// Account required by a page route
///
/// # Usage
/// ```ignore
/// async fn handler(RequireAccount(account): RequireAccount) -> impl IntoResponse {
///     format!("Hello, {}", account.first_name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAccount(pub Account);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAccount
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolution = guard(parts, state, Access::MustBeAuthenticated).await?;
        resolution
            .into_account()
            .map(RequireAccount)
            .ok_or(GuardRejection::LoginRequired)
    }
}

/// Account required by an API route
#[derive(Debug, Clone)]
pub struct ApiAccount(pub Account);

#[async_trait]
impl<S> FromRequestParts<S> for ApiAccount
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolution = guard(parts, state, Access::MustBeAuthenticatedApi).await?;
        resolution
            .into_account()
            .map(ApiAccount)
            .ok_or(GuardRejection::Unauthenticated)
    }
}

/// Marker for routes only anonymous visitors may see
#[derive(Debug, Clone, Copy)]
pub struct RequireAnonymous;

#[async_trait]
impl<S> FromRequestParts<S> for RequireAnonymous
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        guard(parts, state, Access::MustBeAnonymous).await?;
        Ok(RequireAnonymous)
    }
}
