//! Session management
//!
//! Sessions live server-side in the `sessions` table. The browser only holds
//! an HMAC-signed session ID in the `session` cookie. The account behind a
//! session is re-read from the database on every resolution.

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::data::{Account, Database, SessionRecord};
use crate::error::AppError;
use crate::metrics::{SESSIONS_DESTROYED_TOTAL, SESSIONS_ISSUED_TOTAL, SESSIONS_PURGED_TOTAL};

/// Name of the cookie carrying the signed session ID
pub const SESSION_COOKIE_NAME: &str = "session";

type HmacSha256 = Hmac<Sha256>;

/// Outcome of resolving a session to an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authenticated(Account),
    Anonymous,
}

impl Resolution {
    pub fn account(&self) -> Option<&Account> {
        match self {
            Resolution::Authenticated(account) => Some(account),
            Resolution::Anonymous => None,
        }
    }

    pub fn into_account(self) -> Option<Account> {
        match self {
            Resolution::Authenticated(account) => Some(account),
            Resolution::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Resolution::Authenticated(_))
    }
}

/// Sign a session ID for the cookie
///
/// Token format: {session_id}.base64(hmac_sha256(session_id))
///
/// # Arguments
/// * `session_id` - URL-safe session ID (contains no '.')
/// * `secret` - HMAC secret key
pub fn sign_session_id(session_id: &str, secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(session_id.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", session_id, signature_b64))
}

/// Verify a session token and return the session ID it carries
///
/// # Errors
/// Returns `Unauthorized` if the token is malformed or the signature
/// does not match.
pub fn verify_session_token(token: &str, secret: &str) -> Result<String, AppError> {
    let Some((session_id, signature_b64)) = token.split_once('.') else {
        return Err(AppError::Unauthorized);
    };
    if session_id.is_empty() || signature_b64.contains('.') {
        return Err(AppError::Unauthorized);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(session_id.as_bytes());

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;

    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(session_id.to_string())
}

/// Generate a random 256-bit session ID
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Converts between sessions, cookie tokens and accounts.
///
/// Owns the session-to-account mapping but never the account data itself.
pub struct SessionCodec {
    db: Arc<Database>,
    secret: String,
    max_age: Duration,
    secure_cookies: bool,
}

impl SessionCodec {
    pub fn new(db: Arc<Database>, secret: String, max_age_secs: i64, secure_cookies: bool) -> Self {
        Self {
            db,
            secret,
            max_age: Duration::seconds(max_age_secs),
            secure_cookies,
        }
    }

    /// Create a new anonymous session.
    ///
    /// # Returns
    /// The stored record and the signed cookie token
    pub async fn issue(&self) -> Result<(SessionRecord, String), AppError> {
        let record = self.new_record(None);
        self.db.insert_session(&record).await?;
        SESSIONS_ISSUED_TOTAL.with_label_values(&["anonymous"]).inc();

        let token = sign_session_id(&record.id, &self.secret)?;
        Ok((record, token))
    }

    /// Load the session a cookie token points at.
    ///
    /// Bad signatures, unknown IDs and expired sessions all yield `None`.
    /// Expired rows are deleted on the way out.
    pub async fn load(&self, token: &str) -> Result<Option<SessionRecord>, AppError> {
        let session_id = match verify_session_token(token, &self.secret) {
            Ok(session_id) => session_id,
            Err(AppError::Unauthorized) => {
                tracing::debug!("Ignoring session cookie with invalid signature");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let Some(record) = self.db.get_session(&session_id).await? else {
            return Ok(None);
        };

        if record.is_expired() {
            self.db.delete_session(&record.id).await?;
            tracing::debug!(session_id = %record.id, "Dropped expired session");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Commit an account to the browser's session.
    ///
    /// Always issues a new session ID carrying `account.id`, then deletes the
    /// previous session. Nothing from the previous session is carried over.
    ///
    /// # Returns
    /// The new record and its signed cookie token
    pub async fn attach_account(
        &self,
        previous: Option<&SessionRecord>,
        account: &Account,
    ) -> Result<(SessionRecord, String), AppError> {
        let record = self.new_record(Some(account.id.clone()));
        self.db.insert_session(&record).await?;
        SESSIONS_ISSUED_TOTAL
            .with_label_values(&["authenticated"])
            .inc();

        if let Some(previous) = previous {
            if let Err(error) = self.db.delete_session(&previous.id).await {
                tracing::warn!(
                    %error,
                    session_id = %previous.id,
                    "Failed to delete pre-login session; it will expire on its own"
                );
            }
        }

        tracing::info!(account_id = %account.id, "Account attached to new session");

        let token = sign_session_id(&record.id, &self.secret)?;
        Ok((record, token))
    }

    /// Resolve a session to its account.
    ///
    /// A session without an account, or whose account no longer exists,
    /// resolves to `Anonymous`. Database failures propagate.
    pub async fn resolve(&self, session: &SessionRecord) -> Result<Resolution, AppError> {
        let Some(account_id) = session.account_id.as_deref() else {
            return Ok(Resolution::Anonymous);
        };

        match self.db.find_account_by_id(account_id).await? {
            Some(account) => Ok(Resolution::Authenticated(account)),
            None => {
                tracing::warn!(
                    session_id = %session.id,
                    account_id = %account_id,
                    "Session references a missing account; treating as anonymous"
                );
                Ok(Resolution::Anonymous)
            }
        }
    }

    /// Invalidate a session server-side.
    ///
    /// The caller is responsible for clearing the cookie with
    /// [`SessionCodec::removal_cookie`].
    pub async fn destroy(&self, session: &SessionRecord) -> Result<(), AppError> {
        self.db.delete_session(&session.id).await?;
        SESSIONS_DESTROYED_TOTAL.inc();
        tracing::info!(session_id = %session.id, "Session destroyed");
        Ok(())
    }

    /// Remove all expired sessions.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let removed = self.db.delete_expired_sessions(Utc::now()).await?;
        SESSIONS_PURGED_TOTAL.inc_by(removed);
        Ok(removed)
    }

    /// Build the session cookie for a signed token
    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, token))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age.num_seconds()))
            .build()
    }

    /// Cookie that clears the session cookie on the client
    pub fn removal_cookie() -> Cookie<'static> {
        let mut cookie = Cookie::build((SESSION_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .build();
        cookie.make_removal();
        cookie
    }

    fn new_record(&self, account_id: Option<String>) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: generate_session_id(),
            account_id,
            created_at: now,
            expires_at: now + self.max_age,
        }
    }
}
