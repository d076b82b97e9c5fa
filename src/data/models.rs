//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account
// =============================================================================

/// A local account, created on first Google sign-in
///
/// Profile fields are captured once at creation and never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    /// Google's stable subject identifier (unique)
    pub google_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Avatar URL from Google
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// "First Last", or whichever part is present
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Fields for an account that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub google_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_pic: String,
}

// =============================================================================
// Session
// =============================================================================

/// Server-side session row
///
/// `account_id` is `None` until the browser completes a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Fixed-window expiry: measured from creation, never extended by activity
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn is_anonymous(&self) -> bool {
        self.account_id.is_none()
    }
}
