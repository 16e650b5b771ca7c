//! Explicit session handle passed into every gateway operation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::SessionConfig;
use super::locks::KeyedLocks;
use super::store::SessionStore;
use super::types::{Session, SessionId};

/// Creates [`SessionContext`]s bound to one store.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    locks: Arc<KeyedLocks>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Context for a known session ID.
    pub fn context(&self, id: SessionId) -> SessionContext {
        SessionContext {
            id,
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            ttl_secs: self.config.session_ttl_secs,
        }
    }

    /// Resolve the session from a `Cookie` header.
    ///
    /// Only IDs of live stored sessions are honored. Returns the context and
    /// whether a new ID had to be issued because the cookie was absent,
    /// malformed, or named no live session.
    pub async fn resolve(&self, cookie_header: Option<&str>) -> (SessionContext, bool) {
        let claimed = cookie_header
            .and_then(|h| self.config.parse_session_cookie(h))
            .and_then(|v| SessionId::from_hex(&v));

        if let Some(id) = claimed {
            match self.store.get(id).await {
                Ok(Some(_)) => return (self.context(id), false),
                Ok(None) => debug!("Ignoring cookie for unknown session"),
                Err(e) => warn!(error = %e, "Session lookup failed, issuing a new session"),
            }
        }

        (self.context(SessionId::generate()), true)
    }
}

/// Handle on one session: its ID plus transactional access to the store.
#[derive(Clone)]
pub struct SessionContext {
    id: SessionId,
    store: Arc<dyn SessionStore>,
    locks: Arc<KeyedLocks>,
    ttl_secs: u64,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Snapshot of the session. An absent or expired session reads as empty.
    pub async fn load(&self) -> Result<Session> {
        Ok(self
            .store
            .get(self.id)
            .await?
            .unwrap_or_else(|| Session::new(self.id, self.ttl_secs)))
    }

    /// Read-modify-write transaction. Concurrent updates to the same session
    /// are serialized; the closure always sees the latest committed state.
    pub async fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> R + Send,
        R: Send,
    {
        let _guard = self.locks.lock(self.id).await?;
        let mut session = self.load().await?;
        let result = f(&mut session);
        session.updated_at = Utc::now();
        self.store.put(session).await?;
        Ok(result)
    }

    /// Remove the whole session (identity, credentials, token, cache).
    pub async fn clear(&self) -> Result<bool> {
        let _guard = self.locks.lock(self.id).await?;
        self.store.delete(self.id).await
    }

    /// Move the session's data under a freshly generated ID and delete the
    /// old record. Returns the context for the new ID.
    pub async fn rotate(&self) -> Result<SessionContext> {
        let _guard = self.locks.lock(self.id).await?;
        let mut session = self.load().await?;

        let rotated = SessionContext {
            id: SessionId::generate(),
            ..self.clone()
        };
        session.id = rotated.id;
        session.updated_at = Utc::now();
        self.store.put(session).await?;
        self.store.delete(self.id).await?;
        Ok(rotated)
    }

    /// Record a consumed SAML assertion ID, see
    /// [`SessionStore::claim_assertion`].
    pub async fn claim_assertion(&self, assertion_id: &str, until: DateTime<Utc>) -> Result<bool> {
        self.store.claim_assertion(assertion_id, until).await
    }
}
