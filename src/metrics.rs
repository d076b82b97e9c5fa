//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Authentication Metrics
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("careflow_logins_total", "Delegated login attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref ACCOUNTS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "careflow_accounts_created_total",
        "Accounts created on first sign-in"
    ).expect("metric can be created");
    pub static ref ACCOUNTS_TOTAL: IntGauge = IntGauge::new(
        "careflow_accounts_total",
        "Number of local accounts"
    ).expect("metric can be created");

    // Session Metrics
    pub static ref SESSIONS_ISSUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("careflow_sessions_issued_total", "Sessions issued by kind"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref SESSIONS_DESTROYED_TOTAL: IntCounter = IntCounter::new(
        "careflow_sessions_destroyed_total",
        "Sessions destroyed by logout"
    ).expect("metric can be created");
    pub static ref SESSIONS_PURGED_TOTAL: IntCounter = IntCounter::new(
        "careflow_sessions_purged_total",
        "Expired sessions removed by the sweeper"
    ).expect("metric can be created");

    // Chat Metrics
    pub static ref CHAT_MESSAGES_TOTAL: IntCounter = IntCounter::new(
        "careflow_chat_messages_total",
        "Chat messages processed"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("careflow_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(LOGINS_TOTAL.clone()))
            .expect("LOGINS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACCOUNTS_CREATED_TOTAL.clone()))
            .expect("ACCOUNTS_CREATED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACCOUNTS_TOTAL.clone()))
            .expect("ACCOUNTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SESSIONS_ISSUED_TOTAL.clone()))
            .expect("SESSIONS_ISSUED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SESSIONS_DESTROYED_TOTAL.clone()))
            .expect("SESSIONS_DESTROYED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SESSIONS_PURGED_TOTAL.clone()))
            .expect("SESSIONS_PURGED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CHAT_MESSAGES_TOTAL.clone()))
            .expect("CHAT_MESSAGES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Record the outcome of a delegated login attempt.
///
/// `outcome` is `"success"` or the name of the stage that failed.
pub fn observe_login(outcome: &str) {
    LOGINS_TOTAL.with_label_values(&[outcome]).inc();
}
