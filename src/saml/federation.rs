//! Binds SAML outcomes to gateway sessions.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::config::SamlConfig;
use super::provider::{AssertionOutcome, SamlProvider};
use crate::error::GatewayError;
use crate::session::{SessionContext, UserIdentity};

/// Result of a completed login.
#[derive(Debug, Clone)]
pub struct FederatedLogin {
    pub identity: UserIdentity,
    /// The session under its post-login ID. The pre-login ID is gone.
    pub session: SessionContext,
}

pub struct IdentityFederation {
    provider: Arc<dyn SamlProvider>,
    config: SamlConfig,
}

impl IdentityFederation {
    pub fn new(provider: Arc<dyn SamlProvider>, config: SamlConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &SamlConfig {
        &self.config
    }

    /// IdP redirect for a new login. Does not touch any session.
    pub fn initiate_login(&self, return_to: Option<&str>) -> Result<String, GatewayError> {
        self.provider
            .build_login_redirect(return_to)
            .map_err(GatewayError::from)
    }

    /// Validate a posted `SAMLResponse` and bind the identity to the session.
    ///
    /// The session is written only when the assertion is accepted and has not
    /// been consumed before. On success the session moves to a new ID.
    pub async fn consume_assertion(
        &self,
        ctx: &SessionContext,
        saml_response: Option<&str>,
    ) -> Result<FederatedLogin, GatewayError> {
        let saml_response = saml_response
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::SamlValidation(vec!["Missing SAMLResponse form field".to_string()])
            })?;

        let assertion = match self.provider.validate_assertion(saml_response) {
            AssertionOutcome::Authenticated(assertion) => assertion,
            AssertionOutcome::NotAuthenticated(reason) => {
                warn!(session_id = %ctx.id(), reason = %reason, "SAML login rejected by IdP");
                return Err(GatewayError::NotAuthenticated(reason));
            }
            AssertionOutcome::Invalid(errors) => {
                warn!(session_id = %ctx.id(), errors = ?errors, "SAML response failed validation");
                return Err(GatewayError::SamlValidation(errors));
            }
        };

        if assertion.assertion_id.is_empty() {
            return Err(GatewayError::SamlValidation(vec![
                "SAML assertion missing ID".to_string(),
            ]));
        }
        let ttl_secs = ctx.ttl_secs();
        let remember_until = match assertion.valid_until {
            Some(until) => until + Duration::seconds(self.config.clock_skew_secs),
            None => Utc::now() + Duration::seconds(ttl_secs as i64),
        };
        if !ctx.claim_assertion(&assertion.assertion_id, remember_until).await? {
            warn!(
                session_id = %ctx.id(),
                assertion_id = %assertion.assertion_id,
                "SAML assertion replay rejected"
            );
            return Err(GatewayError::SamlValidation(vec![
                "SAML assertion replay detected".to_string(),
            ]));
        }

        let first_value = |claim: &str| {
            assertion
                .attributes
                .get(claim)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_default()
        };

        let identity = UserIdentity {
            display_name: first_value(&self.config.claims.display_name),
            email: first_value(&self.config.claims.email),
            name_id: assertion.name_id,
            session_index: assertion.session_index,
            attributes: assertion.attributes,
        };

        let session = ctx.rotate().await?;
        let stored = identity.clone();
        session
            .update(move |s| {
                s.identity = Some(stored);
                s.renew(ttl_secs);
            })
            .await?;

        info!(session_id = %session.id(), "SAML login completed");
        Ok(FederatedLogin { identity, session })
    }

    /// Build the single-logout redirect and clear the session.
    ///
    /// Falls back to the configured post-logout location when no IdP logout
    /// endpoint is configured or the request cannot be built.
    pub async fn logout(&self, ctx: &SessionContext) -> Result<String, GatewayError> {
        let identity = match ctx.load().await {
            Ok(session) => session.identity,
            Err(e) => {
                warn!(session_id = %ctx.id(), error = %e, "Failed to load session for logout");
                None
            }
        };

        let target = if self.config.idp.slo_url.is_some() {
            let name_id = identity.as_ref().map(|i| i.name_id.as_str());
            let session_index = identity.as_ref().and_then(|i| i.session_index.as_deref());
            match self.provider.build_logout_redirect(name_id, session_index) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "Failed to build SAML logout request");
                    self.config.logout_redirect_url.clone()
                }
            }
        } else {
            self.config.logout_redirect_url.clone()
        };

        ctx.clear().await?;
        info!(session_id = %ctx.id(), "Session cleared on logout");

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::config::{IdpConfig, DISPLAY_NAME_CLAIM};
    use crate::saml::provider::ValidatedAssertion;
    use crate::session::{MemorySessionStore, SessionConfig, SessionId, SessionManager};
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        outcome: AssertionOutcome,
        slo: bool,
        /// Give every accepted response its own assertion ID.
        unique_ids: bool,
        issued: AtomicUsize,
    }

    impl SamlProvider for StubProvider {
        fn build_login_redirect(&self, relay_state: Option<&str>) -> Result<String> {
            Ok(format!("https://idp.test/sso?RelayState={}", relay_state.unwrap_or("")))
        }

        fn validate_assertion(&self, _saml_response: &str) -> AssertionOutcome {
            let mut outcome = self.outcome.clone();
            if let AssertionOutcome::Authenticated(ref mut assertion) = outcome {
                if self.unique_ids {
                    let n = self.issued.fetch_add(1, Ordering::SeqCst);
                    assertion.assertion_id = format!("_assertion{}", n);
                }
            }
            outcome
        }

        fn build_logout_redirect(
            &self,
            name_id: Option<&str>,
            _session_index: Option<&str>,
        ) -> Result<String> {
            if !self.slo {
                return Err(anyhow!("no SLO"));
            }
            Ok(format!("https://idp.test/slo?user={}", name_id.unwrap_or("")))
        }
    }

    fn authenticated() -> AssertionOutcome {
        let mut attributes = HashMap::new();
        attributes.insert(DISPLAY_NAME_CLAIM.to_string(), vec!["Ada Lovelace".to_string()]);
        attributes.insert("email".to_string(), vec!["ada@example.com".to_string()]);
        AssertionOutcome::Authenticated(ValidatedAssertion {
            assertion_id: "_fixed".to_string(),
            valid_until: None,
            name_id: "ada@example.com".to_string(),
            session_index: Some("_idx1".to_string()),
            attributes,
        })
    }

    fn federation(outcome: AssertionOutcome, slo_url: Option<&str>) -> IdentityFederation {
        federation_with_ids(outcome, slo_url, true)
    }

    fn federation_with_ids(
        outcome: AssertionOutcome,
        slo_url: Option<&str>,
        unique_ids: bool,
    ) -> IdentityFederation {
        let config = SamlConfig {
            idp: IdpConfig {
                slo_url: slo_url.map(String::from),
                ..Default::default()
            },
            logout_redirect_url: "https://app.example.com/bye".to_string(),
            ..Default::default()
        };
        IdentityFederation::new(
            Arc::new(StubProvider {
                outcome,
                slo: slo_url.is_some(),
                unique_ids,
                issued: AtomicUsize::new(0),
            }),
            config,
        )
    }

    fn context() -> SessionContext {
        SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::default())
            .context(SessionId::generate())
    }

    #[tokio::test]
    async fn test_consume_assertion_binds_identity() {
        let fed = federation(authenticated(), None);
        let ctx = context();

        let login = fed.consume_assertion(&ctx, Some("PHNhbWw+")).await.unwrap();
        let identity = login.identity;
        assert_eq!(identity.display_name, "Ada Lovelace");
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.session_index.as_deref(), Some("_idx1"));

        let stored = login.session.load().await.unwrap().identity.unwrap();
        assert_eq!(stored, identity);
    }

    #[tokio::test]
    async fn test_login_moves_session_to_new_id() {
        let fed = federation(authenticated(), None);
        let ctx = context();
        ctx.update(|s| s.config_type_cache.clear()).await.unwrap();

        let login = fed.consume_assertion(&ctx, Some("x")).await.unwrap();
        assert_ne!(login.session.id(), ctx.id());
        assert!(ctx.load().await.unwrap().identity.is_none());
        assert!(login.session.load().await.unwrap().identity.is_some());
    }

    #[tokio::test]
    async fn test_replayed_assertion_is_rejected() {
        let fed = federation_with_ids(authenticated(), None, false);
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store, SessionConfig::default());

        fed.consume_assertion(&manager.context(SessionId::generate()), Some("x"))
            .await
            .unwrap();

        let victim = manager.context(SessionId::generate());
        let err = fed.consume_assertion(&victim, Some("x")).await.unwrap_err();
        match err {
            GatewayError::SamlValidation(errors) => {
                assert_eq!(errors, vec!["SAML assertion replay detected".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(victim.load().await.unwrap().identity.is_none());
    }

    #[tokio::test]
    async fn test_missing_claims_fall_back_to_empty() {
        let fed = federation(
            AssertionOutcome::Authenticated(ValidatedAssertion {
                assertion_id: "_nobody".to_string(),
                valid_until: None,
                name_id: "nobody".to_string(),
                session_index: None,
                attributes: HashMap::new(),
            }),
            None,
        );
        let identity = fed.consume_assertion(&context(), Some("x")).await.unwrap().identity;
        assert_eq!(identity.display_name, "");
        assert_eq!(identity.email, "");
    }

    #[tokio::test]
    async fn test_invalid_assertion_leaves_session_untouched() {
        let fed = federation(
            AssertionOutcome::Invalid(vec!["bad signature".to_string(), "expired".to_string()]),
            None,
        );
        let ctx = context();

        let err = fed.consume_assertion(&ctx, Some("x")).await.unwrap_err();
        match err {
            GatewayError::SamlValidation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(ctx.load().await.unwrap().identity.is_none());
    }

    #[tokio::test]
    async fn test_unauthenticated_response() {
        let fed = federation(AssertionOutcome::NotAuthenticated("denied".to_string()), None);
        let err = fed.consume_assertion(&context(), Some("x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated(_)));
    }

    #[tokio::test]
    async fn test_missing_form_field() {
        let fed = federation(authenticated(), None);
        let err = fed.consume_assertion(&context(), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::SamlValidation(_)));
    }

    #[tokio::test]
    async fn test_logout_uses_slo_and_clears() {
        let fed = federation(authenticated(), Some("https://idp.test/slo"));
        let ctx = fed.consume_assertion(&context(), Some("x")).await.unwrap().session;

        let target = fed.logout(&ctx).await.unwrap();
        assert_eq!(target, "https://idp.test/slo?user=ada@example.com");
        assert!(ctx.load().await.unwrap().identity.is_none());
    }

    #[tokio::test]
    async fn test_logout_without_slo_falls_back() {
        let fed = federation(authenticated(), None);
        let ctx = context();
        let target = fed.logout(&ctx).await.unwrap();
        assert_eq!(target, "https://app.example.com/bye");
    }
}
