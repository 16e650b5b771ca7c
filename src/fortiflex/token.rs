//! FortiFlex bearer token acquisition.
//!
//! Tokens are minted with the OAuth password grant using the vendor
//! credentials stored in the session, cached in the session until shortly
//! before expiry, and refreshed at most once at a time per session.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::FortiFlexConfig;
use crate::error::GatewayError;
use crate::session::{AccessToken, KeyedLocks, SessionContext, VendorCredentials};

/// Password grant form body.
#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    username: &'a str,
    password: &'a str,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct TokenManager {
    http_client: reqwest::Client,
    config: FortiFlexConfig,
    refresh_locks: KeyedLocks,
}

impl TokenManager {
    pub fn new(http_client: reqwest::Client, config: FortiFlexConfig) -> Self {
        Self {
            http_client,
            config,
            refresh_locks: KeyedLocks::new(),
        }
    }

    /// Return a token usable right now, exchanging credentials if needed.
    pub async fn get_valid_token(
        &self,
        ctx: &SessionContext,
    ) -> Result<AccessToken, GatewayError> {
        let margin = Duration::seconds(self.config.token_refresh_margin_secs);

        if let Some(token) = self.cached_token(ctx, margin).await? {
            return Ok(token);
        }

        // Single flight: whoever holds the lock exchanges, everyone queued
        // behind it picks up the stored result.
        let _guard = self.refresh_locks.lock(ctx.id()).await?;

        if let Some(token) = self.cached_token(ctx, margin).await? {
            debug!(session_id = %ctx.id(), "Token refreshed by concurrent request");
            return Ok(token);
        }

        let credentials = ctx
            .load()
            .await?
            .vendor_credentials
            .ok_or(GatewayError::CredentialError)?;

        let token = self.exchange(&credentials).await?;

        let minted = token.clone();
        let stored = ctx
            .update(move |session| {
                if session.vendor_credentials.as_ref() != Some(&credentials) {
                    return false;
                }
                session.set_access_token(minted)
            })
            .await?;

        if stored {
            info!(session_id = %ctx.id(), expires_at = %token.expires_at, "FortiFlex token refreshed");
        } else {
            warn!(session_id = %ctx.id(), "Credentials changed during token exchange, token not cached");
        }

        Ok(token)
    }

    /// Cached token still outside the refresh margin.
    ///
    /// Fails with `CredentialError` when the session holds no credentials.
    async fn cached_token(
        &self,
        ctx: &SessionContext,
        margin: Duration,
    ) -> Result<Option<AccessToken>, GatewayError> {
        let session = ctx.load().await?;
        if session.vendor_credentials.is_none() {
            return Err(GatewayError::CredentialError);
        }
        Ok(session
            .access_token
            .filter(|t| t.is_usable_at(Utc::now(), margin)))
    }

    async fn exchange(&self, credentials: &VendorCredentials) -> Result<AccessToken, GatewayError> {
        let form = serde_urlencoded::to_string(TokenRequest {
            grant_type: "password",
            client_id: &self.config.client_id,
            username: &credentials.username,
            password: &credentials.api_key,
        })
        .map_err(|e| GatewayError::Internal(format!("Failed to encode token request: {}", e)))?;

        let response = self
            .http_client
            .post(self.config.token_url())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .timeout(std::time::Duration::from_secs(self.config.request_timeout_secs))
            .body(form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e.without_url(), "FortiFlex token request failed");
                GatewayError::TokenError("Token request failed".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "FortiFlex token endpoint rejected credentials");
            return Err(GatewayError::TokenError(format!(
                "Failed to get access token: {}",
                body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            warn!(error = %e.without_url(), "FortiFlex token response unreadable");
            GatewayError::TokenError("Invalid token response".to_string())
        })?;

        let expires_in = token
            .expires_in
            .unwrap_or(self.config.default_expires_in_secs);

        AccessToken::new(token.access_token, expires_in).ok_or_else(|| {
            warn!(expires_in, "FortiFlex token lifetime out of range");
            GatewayError::TokenError("Invalid token response".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionConfig, SessionId, SessionManager};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> VendorCredentials {
        VendorCredentials {
            username: "api-user".to_string(),
            api_key: "secret-key".to_string(),
            serial_number: "ELAVMS0000000001".to_string(),
            account_id: "4242".to_string(),
        }
    }

    fn manager_for(server: &MockServer) -> TokenManager {
        TokenManager::new(
            reqwest::Client::new(),
            FortiFlexConfig {
                auth_base_url: server.uri(),
                api_base_url: server.uri(),
                ..Default::default()
            },
        )
    }

    async fn session_with_credentials() -> SessionContext {
        let ctx = SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::default())
            .context(SessionId::generate());
        ctx.update(|s| s.set_vendor_credentials(credentials()))
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_no_credentials_is_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::default())
            .context(SessionId::generate());
        let err = manager_for(&server).get_valid_token(&ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::CredentialError));
    }

    #[tokio::test]
    async fn test_exchange_sends_password_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("client_id=flexvm"))
            .and(body_string_contains("username=api-user"))
            .and(body_string_contains("password=secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 120
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        let token = manager_for(&server).get_valid_token(&ctx).await.unwrap();
        assert_eq!(token.token, "tok-1");

        let stored = ctx.load().await.unwrap().access_token.unwrap();
        assert_eq!(stored, token);
    }

    #[tokio::test]
    async fn test_cached_token_makes_no_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        ctx.update(|s| s.set_access_token(AccessToken::new("cached".to_string(), 3600).unwrap()))
            .await
            .unwrap();

        let tokens = manager_for(&server);
        for _ in 0..3 {
            assert_eq!(tokens.get_valid_token(&ctx).await.unwrap().token, "cached");
        }
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "fresh"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        // An hour-long token with 10s left.
        let now = Utc::now();
        let stale = AccessToken {
            token: "stale".to_string(),
            issued_at: now - Duration::seconds(3590),
            expires_at: now + Duration::seconds(10),
        };
        ctx.update(move |s| s.set_access_token(stale)).await.unwrap();

        let token = manager_for(&server).get_valid_token(&ctx).await.unwrap();
        assert_eq!(token.token, "fresh");
        // expires_in omitted: one hour
        let remaining = token.expires_at - Utc::now();
        assert!(remaining > Duration::seconds(3500));
    }

    #[tokio::test]
    async fn test_short_lived_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "brief",
                "expires_in": 20
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        let tokens = manager_for(&server);
        for _ in 0..3 {
            assert_eq!(tokens.get_valid_token(&ctx).await.unwrap().token, "brief");
        }
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_token_error() {
        for expires_in in [0_i64, -60, 100_000_000_000_000_000] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/oauth/token/"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "odd",
                    "expires_in": expires_in
                })))
                .expect(1)
                .mount(&server)
                .await;

            let ctx = session_with_credentials().await;
            let err = manager_for(&server).get_valid_token(&ctx).await.unwrap_err();
            match err {
                GatewayError::TokenError(details) => assert_eq!(details, "Invalid token response"),
                other => panic!("unexpected error for {}: {:?}", expires_in, other),
            }
            assert!(ctx.load().await.unwrap().access_token.is_none());
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "shared", "expires_in": 3600}))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        let tokens = Arc::new(manager_for(&server));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ctx = ctx.clone();
            let tokens = Arc::clone(&tokens);
            handles.push(tokio::spawn(async move {
                tokens.get_valid_token(&ctx).await.unwrap().token
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "shared");
        }
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_token_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = session_with_credentials().await;
        let err = manager_for(&server).get_valid_token(&ctx).await.unwrap_err();
        match err {
            GatewayError::TokenError(details) => {
                assert!(details.contains("invalid_grant"));
                assert!(!details.contains("secret-key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(ctx.load().await.unwrap().access_token.is_none());
    }
}
