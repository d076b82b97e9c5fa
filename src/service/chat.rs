//! Chat assistant service
//!
//! `POST /chat` hands each message to a [`ChatBackend`]. The default
//! [`CannedChatBackend`] answers from a small keyword table.

use async_trait::async_trait;

use crate::data::Account;
use crate::error::AppError;

/// Produces replies for the portal's chat assistant
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Reply to `message` sent by `account`
    async fn reply(&self, account: &Account, message: &str) -> Result<String, AppError>;
}

/// Keyword-matched replies for "CareFlow Assist"
#[derive(Debug, Default, Clone)]
pub struct CannedChatBackend;

const CANNED_REPLIES: &[(&[&str], &str)] = &[
    (
        &["appointment", "book", "schedule"],
        "You can book an appointment from your dashboard, or call the front desk during opening hours.",
    ),
    (
        &["doctor", "specialist", "physician"],
        "Our doctors and their specialties are listed on the Doctors page.",
    ),
    (
        &["service", "treatment", "clinic"],
        "The Services page lists everything we offer, from general check-ups to diagnostics.",
    ),
    (
        &["hours", "open", "close"],
        "We are open Monday to Saturday, 8am to 8pm.",
    ),
    (
        &["emergency", "urgent"],
        "If this is an emergency, call your local emergency number right away.",
    ),
];

const GREETINGS: &[&str] = &["hello", "hi", "hey"];

const FALLBACK_REPLY: &str =
    "I'm not sure about that yet. A member of our care team can help you during opening hours.";

impl CannedChatBackend {
    pub fn new() -> Self {
        Self
    }

    fn is_greeting(message: &str) -> bool {
        message
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| GREETINGS.contains(&word))
    }

    fn canned_reply(message: &str) -> &'static str {
        CANNED_REPLIES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|keyword| message.contains(keyword)))
            .map(|(_, reply)| *reply)
            .unwrap_or(FALLBACK_REPLY)
    }
}

#[async_trait]
impl ChatBackend for CannedChatBackend {
    async fn reply(&self, account: &Account, message: &str) -> Result<String, AppError> {
        let message = message.to_lowercase();
        if Self::is_greeting(&message) {
            return Ok(format!(
                "Hello {}! How can CareFlow Assist help you today?",
                account.first_name
            ));
        }
        Ok(Self::canned_reply(&message).to_string())
    }
}
