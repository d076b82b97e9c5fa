//! Chat and account API endpoints

use axum::{
    extract::State,
    response::Json,
};

use super::dto::{AccountResponse, ChatRequest, ChatResponse};
use crate::AppState;
use crate::auth::ApiAccount;
use crate::error::AppError;
use crate::metrics::CHAT_MESSAGES_TOTAL;

/// Longest message accepted by the assistant, in characters
const MAX_MESSAGE_CHARS: usize = 2000;

/// POST /chat
///
/// Anonymous callers are rejected before the body is read.
pub async fn chat(
    State(state): State<AppState>,
    ApiAccount(account): ApiAccount,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let message = normalize_message(&request.message)?;

    let reply = state.chat.reply(&account, message).await?;
    CHAT_MESSAGES_TOTAL.inc();
    tracing::debug!(account_id = %account.id, "Chat message answered");

    Ok(Json(ChatResponse { reply }))
}

/// GET /api/me
pub async fn me(ApiAccount(account): ApiAccount) -> Json<AccountResponse> {
    Json(AccountResponse::from(&account))
}

fn normalize_message(message: &str) -> Result<&str, AppError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(message)
}
