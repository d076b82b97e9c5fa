//! HTML pages
//!
//! Server-rendered pages of the portal. Account fields are
//! provider-supplied and always escaped before rendering.

use axum::response::Html;

use crate::auth::{MaybeAccount, RequireAccount, RequireAnonymous};
use crate::data::Account;

const SIGN_IN_PATH: &str = "/auth/google";

/// GET /
pub async fn home(MaybeAccount(account): MaybeAccount) -> Html<String> {
    let body = r#"<h1>Care that comes to you</h1>
  <p>CareFlow connects you with our doctors, your appointments and your records in one place.</p>
  <p><a href="/services">Our services</a> | <a href="/doctors">Meet our doctors</a></p>"#;
    Html(render_layout("CareFlow", account.as_ref(), body))
}

/// GET /services
pub async fn services(MaybeAccount(account): MaybeAccount) -> Html<String> {
    let body = r#"<h1>Services</h1>
  <ul>
    <li>General consultations</li>
    <li>Diagnostics and lab tests</li>
    <li>Specialist referrals</li>
    <li>Follow-up care</li>
  </ul>"#;
    Html(render_layout("Services | CareFlow", account.as_ref(), body))
}

/// GET /doctors
pub async fn doctors(MaybeAccount(account): MaybeAccount) -> Html<String> {
    let body = r#"<h1>Our doctors</h1>
  <ul>
    <li>General practice</li>
    <li>Cardiology</li>
    <li>Pediatrics</li>
    <li>Dermatology</li>
  </ul>"#;
    Html(render_layout("Doctors | CareFlow", account.as_ref(), body))
}

/// GET /login
pub async fn login(_: RequireAnonymous) -> Html<String> {
    Html(render_sign_in_page("Log in", "Welcome back"))
}

/// GET /signup
pub async fn signup(_: RequireAnonymous) -> Html<String> {
    Html(render_sign_in_page("Sign up", "Create your CareFlow account"))
}

/// GET /dashboard
pub async fn dashboard(RequireAccount(account): RequireAccount) -> Html<String> {
    let body = format!(
        r#"<h1>Patient portal</h1>
  <img src="{}" alt="" width="64" height="64" />
  <p>Welcome, {}.</p>
  <p>Signed in as {}</p>
  <section id="chat">
    <h2>CareFlow Assist</h2>
    <div id="chat-messages"></div>
    <form id="chat-form">
      <input id="chat-input" name="message" autocomplete="off" />
      <button type="submit">Send</button>
    </form>
  </section>
  <script>{}</script>"#,
        html_escape::encode_double_quoted_attribute(&account.profile_pic),
        html_escape::encode_text(&account.display_name()),
        html_escape::encode_text(&account.email),
        CHAT_SCRIPT,
    );
    Html(render_layout("Dashboard | CareFlow", Some(&account), &body))
}

fn render_sign_in_page(title: &str, heading: &str) -> String {
    let body = format!(
        r#"<h1>{}</h1>
  <p><a class="button" href="{}">Sign in with Google</a></p>"#,
        html_escape::encode_text(heading),
        SIGN_IN_PATH,
    );
    render_layout(&format!("{title} | CareFlow"), None, &body)
}

fn render_nav(account: Option<&Account>) -> &'static str {
    match account {
        Some(_) => r#"<a href="/dashboard">Dashboard</a> <a href="/logout">Log out</a>"#,
        None => r#"<a href="/login">Log in</a> <a href="/signup">Sign up</a>"#,
    }
}

fn render_layout(title: &str, account: Option<&Account>, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{}</title>
</head>
<body>
  <nav><a href="/">CareFlow</a> {}</nav>
  <main>
  {}
  </main>
</body>
</html>"#,
        html_escape::encode_text(title),
        render_nav(account),
        body,
    )
}

const CHAT_SCRIPT: &str = r#"
document.getElementById("chat-form").addEventListener("submit", async (e) => {
  e.preventDefault();
  const input = document.getElementById("chat-input");
  const messages = document.getElementById("chat-messages");
  const message = input.value.trim();
  if (!message) return;
  const add = (text) => {
    const el = document.createElement("div");
    el.textContent = text;
    messages.appendChild(el);
  };
  add(message);
  input.value = "";
  try {
    const res = await fetch("/chat", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ message }),
    });
    if (!res.ok) throw new Error("chat failed");
    add((await res.json()).reply);
  } catch (err) {
    add("You must be logged in to chat.");
  }
});
"#;
