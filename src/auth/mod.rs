//! Google OAuth authentication
//!
//! Handles:
//! - Google OAuth flow
//! - Session management
//! - Access guards for routes

mod middleware;
mod oauth;
mod provider;
pub mod session;

pub use middleware::{
    Access, ActiveSession, ApiAccount, CurrentSession, GuardRejection, MaybeAccount,
    RequireAccount, RequireAnonymous, session_layer,
};
pub use oauth::{
    LOGIN_FAILURE_REDIRECT, LOGIN_SUCCESS_REDIRECT, LoginError, LoginFlow, LoginStage,
    OAUTH_STATE_COOKIE, auth_router, resolve_account,
};
pub use provider::{GoogleProvider, IdentityProvider, ProviderProfile, TokenResponse};
pub use session::{Resolution, SESSION_COOKIE_NAME, SessionCodec};
