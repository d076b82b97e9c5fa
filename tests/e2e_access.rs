//! E2E tests for route access requirements and the chat API

mod common;

use chrono::{Duration, Utc};
use common::{SESSION_SECRET, TestServer, cookie_value, location};
use serde_json::Value;

#[tokio::test]
async fn test_public_pages_render_for_anonymous_visitors() {
    let server = TestServer::new().await;

    for path in ["/", "/services", "/doctors", "/login", "/signup"] {
        let response = server.get(path, None).await;
        assert_eq!(response.status(), 200, "GET {path}");
        assert!(
            cookie_value(&response, "session").is_some(),
            "GET {path} should issue an anonymous session"
        );
    }
}

#[tokio::test]
async fn test_home_shows_dashboard_link_only_when_logged_in() {
    let server = TestServer::new().await;

    let anonymous = server.get("/", None).await.text().await.unwrap();
    assert!(!anonymous.contains(r#"href="/dashboard""#));

    let session = server.login_as("ext-123").await;
    let logged_in = server
        .get("/", Some(session.as_str()))
        .await
        .text()
        .await
        .unwrap();
    assert!(logged_in.contains(r#"href="/dashboard""#));
}

#[tokio::test]
async fn test_dashboard_redirects_anonymous_to_login() {
    let server = TestServer::new().await;

    let response = server.get("/dashboard", None).await;
    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_dashboard_greets_authenticated_account() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;

    let response = server.get("/dashboard", Some(session.as_str())).await;
    assert_eq!(response.status(), 200);
    assert!(cookie_value(&response, "session").is_none());
    let body = response.text().await.unwrap();
    assert!(body.contains("Welcome, Ada Lovelace"));
}

#[tokio::test]
async fn test_login_and_signup_redirect_authenticated_to_dashboard() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;

    for path in ["/login", "/signup"] {
        let response = server.get(path, Some(session.as_str())).await;
        assert!(response.status().is_redirection(), "GET {path}");
        assert_eq!(location(&response), "/dashboard");
    }
}

#[tokio::test]
async fn test_chat_without_session_is_unauthorized() {
    let server = TestServer::new().await;

    let response = server.post_chat("hello", None).await;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(server.chat.calls(), 0);
}

#[tokio::test]
async fn test_chat_with_anonymous_session_is_unauthorized() {
    let server = TestServer::new().await;
    let anonymous = server.anonymous_session().await;

    let response = server.post_chat("hello", Some(anonymous.as_str())).await;
    assert_eq!(response.status(), 401);
    assert_eq!(server.chat.calls(), 0);
}

#[tokio::test]
async fn test_chat_replies_to_authenticated_account() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;

    let response = server
        .post_chat("  when are you open?  ", Some(session.as_str()))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reply"], "Ada: when are you open?");
    assert_eq!(server.chat.calls(), 1);
}

#[tokio::test]
async fn test_chat_rejects_blank_message() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;

    let response = server.post_chat("   ", Some(session.as_str())).await;
    assert_eq!(response.status(), 400);
    assert_eq!(server.chat.calls(), 0);
}

#[tokio::test]
async fn test_tampered_session_is_replaced_with_anonymous() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;
    let (id, _) = session.split_once('.').unwrap();
    let tampered = format!("{id}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");

    let response = server.get("/api/me", Some(tampered.as_str())).await;
    assert_eq!(response.status(), 401);
    let replacement = cookie_value(&response, "session").expect("fresh session cookie");
    assert_ne!(replacement, tampered);
}

#[tokio::test]
async fn test_expired_session_is_anonymous() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;
    let me: Value = server
        .get("/api/me", Some(session.as_str()))
        .await
        .json()
        .await
        .unwrap();

    let now = Utc::now();
    let expired = careflow::data::SessionRecord {
        id: "expired-session".to_string(),
        account_id: me["id"].as_str().map(ToString::to_string),
        created_at: now - Duration::days(2),
        expires_at: now - Duration::days(1),
    };
    server.state.db.insert_session(&expired).await.unwrap();
    let token = careflow::auth::session::sign_session_id(&expired.id, SESSION_SECRET).unwrap();

    let response = server.get("/api/me", Some(token.as_str())).await;
    assert_eq!(response.status(), 401);
    assert!(server.state.db.get_session("expired-session").await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_for_deleted_account_is_anonymous() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;
    let me: Value = server
        .get("/api/me", Some(session.as_str()))
        .await
        .json()
        .await
        .unwrap();

    server.delete_account_row(me["id"].as_str().unwrap()).await;

    let response = server.get("/dashboard", Some(session.as_str())).await;
    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_protected_routes_fail_closed_during_store_outage() {
    let server = TestServer::new().await;
    let session = server.login_as("ext-123").await;

    server.state.db.close().await;

    let dashboard = server.get("/dashboard", Some(session.as_str())).await;
    assert_eq!(dashboard.status(), 500);
    let body: Value = dashboard.json().await.unwrap();
    assert_eq!(body["error"], "Database error");

    let me = server.get("/api/me", Some(session.as_str())).await;
    assert_eq!(me.status(), 500);

    let chat = server.post_chat("hello", Some(session.as_str())).await;
    assert_eq!(chat.status(), 500);
    assert_eq!(server.chat.calls(), 0);
}
