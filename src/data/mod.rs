//! Data layer module
//!
//! Handles all data persistence:
//! - Accounts (one per Google identity)
//! - Server-side sessions

mod database;
mod models;

pub use database::Database;
pub use models::*;
