//! Service layer
//!
//! Collaborators that sit behind HTTP handlers but own no HTTP concerns.

mod chat;

pub use chat::{CannedChatBackend, ChatBackend};
