//! Identity provider client
//!
//! The two outbound calls of the authorization code flow (code exchange and
//! profile fetch) sit behind [`IdentityProvider`]. [`GoogleProvider`] talks
//! to Google's OAuth 2.0 endpoints over reqwest.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::GoogleOAuthConfig;
use crate::data::NewAccount;
use crate::error::AppError;

/// Scopes requested at the authorization endpoint
pub const REQUESTED_SCOPES: &[&str] = &["profile", "email"];

/// Token endpoint response
///
/// Only `access_token` is used, once, to fetch the profile.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Validated user profile from the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub external_id: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub avatar_url: String,
}

impl ProviderProfile {
    /// Validate a raw user-info document.
    ///
    /// Accepts `id` (v2 userinfo) or `sub` (OpenID userinfo) as the external ID.
    ///
    /// # Errors
    /// `AuthProvider` naming the first missing or empty field.
    pub fn from_userinfo(json: &serde_json::Value) -> Result<Self, AppError> {
        let external_id = match json.get("id").or_else(|| json.get("sub")) {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };
        if external_id.trim().is_empty() {
            return Err(AppError::AuthProvider(
                "profile is missing required field `id`".to_string(),
            ));
        }

        Ok(Self {
            external_id,
            email: required_field(json, "email")?,
            given_name: required_field(json, "given_name")?,
            family_name: required_field(json, "family_name")?,
            avatar_url: required_field(json, "picture")?,
        })
    }
}

impl From<&ProviderProfile> for NewAccount {
    fn from(profile: &ProviderProfile) -> Self {
        NewAccount {
            google_id: profile.external_id.clone(),
            email: profile.email.clone(),
            first_name: profile.given_name.clone(),
            last_name: profile.family_name.clone(),
            profile_pic: profile.avatar_url.clone(),
        }
    }
}

fn required_field(json: &serde_json::Value, field: &str) -> Result<String, AppError> {
    json.get(field)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            AppError::AuthProvider(format!("profile is missing required field `{field}`"))
        })
}

/// OAuth 2.0 authorization code provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Path segment under `/auth/` (e.g. "google")
    fn name(&self) -> &str;

    /// Authorization endpoint URL carrying client ID, scopes,
    /// callback URL and the CSRF `state`
    fn authorization_url(&self, state: &str) -> Result<String, AppError>;

    /// Exchange an authorization code at the token endpoint
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError>;

    /// Fetch the raw user-info document for an access token
    ///
    /// Validation is left to [`ProviderProfile::from_userinfo`].
    async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, AppError>;
}

/// Google OAuth 2.0 client
pub struct GoogleProvider {
    http_client: reqwest::Client,
    config: GoogleOAuthConfig,
}

impl GoogleProvider {
    pub fn new(http_client: reqwest::Client, config: GoogleOAuthConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, state: &str) -> Result<String, AppError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AppError::Config(format!("invalid authorize URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &REQUESTED_SCOPES.join(" "))
            .append_pair("state", state);

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.callback_url.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::AuthProvider(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthProvider(format!(
                "token exchange failed with status {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AppError::AuthProvider(format!("failed to parse token response: {e}")))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, AppError> {
        let response = self
            .http_client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::AuthProvider(format!("profile request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthProvider(format!(
                "profile request failed with status {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::AuthProvider(format!("failed to parse profile: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn google_config() -> GoogleOAuthConfig {
        GoogleOAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            callback_url: "http://localhost:3000/auth/google/callback".to_string(),
            authorize_url: crate::config::default_google_authorize_url(),
            token_url: crate::config::default_google_token_url(),
            userinfo_url: crate::config::default_google_userinfo_url(),
        }
    }

    fn full_userinfo() -> serde_json::Value {
        json!({
            "id": "ext-123",
            "email": "ada@example.com",
            "verified_email": true,
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "picture": "https://example.com/ada.png"
        })
    }

    #[test]
    fn profile_from_complete_userinfo() {
        let profile = ProviderProfile::from_userinfo(&full_userinfo()).unwrap();
        assert_eq!(profile.external_id, "ext-123");
        assert_eq!(profile.email, "ada@example.com");
        assert_eq!(profile.given_name, "Ada");
        assert_eq!(profile.family_name, "Lovelace");
        assert_eq!(profile.avatar_url, "https://example.com/ada.png");
    }

    #[test]
    fn profile_accepts_openid_subject() {
        let mut userinfo = full_userinfo();
        let object = userinfo.as_object_mut().unwrap();
        object.remove("id");
        object.insert("sub".to_string(), json!("1098765"));

        let profile = ProviderProfile::from_userinfo(&userinfo).unwrap();
        assert_eq!(profile.external_id, "1098765");
    }

    #[test]
    fn profile_missing_field_is_provider_error() {
        for field in ["id", "email", "given_name", "family_name", "picture"] {
            let mut userinfo = full_userinfo();
            userinfo.as_object_mut().unwrap().remove(field);

            let error = ProviderProfile::from_userinfo(&userinfo)
                .expect_err("missing field must be rejected");
            assert!(
                matches!(&error, AppError::AuthProvider(message) if message.contains(field)),
                "unexpected error for {field}: {error:?}"
            );
        }
    }

    #[test]
    fn profile_blank_email_is_provider_error() {
        let mut userinfo = full_userinfo();
        userinfo["email"] = json!("   ");

        assert!(matches!(
            ProviderProfile::from_userinfo(&userinfo),
            Err(AppError::AuthProvider(_))
        ));
    }

    #[test]
    fn new_account_takes_profile_fields() {
        let profile = ProviderProfile::from_userinfo(&full_userinfo()).unwrap();
        let new_account = NewAccount::from(&profile);
        assert_eq!(new_account.google_id, "ext-123");
        assert_eq!(new_account.first_name, "Ada");
        assert_eq!(new_account.profile_pic, "https://example.com/ada.png");
    }

    #[test]
    fn authorization_url_carries_flow_parameters() {
        let provider = GoogleProvider::new(reqwest::Client::new(), google_config());
        let url = Url::parse(&provider.authorization_url("csrf-state").unwrap()).unwrap();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(
            pairs["redirect_uri"],
            "http://localhost:3000/auth/google/callback"
        );
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "profile email");
        assert_eq!(pairs["state"], "csrf-state");
        assert!(!pairs.contains_key("client_secret"));
    }
}
