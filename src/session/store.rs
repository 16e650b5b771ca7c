//! Session storage backends.
//!
//! [`MemorySessionStore`] keeps sessions in a process-local map and is what
//! tests and single-node development use. [`RedbSessionStore`] writes every
//! session through to an embedded redb file so logins survive a restart.
//!
//! Both also remember consumed SAML assertion IDs until the assertion would
//! have expired anyway, so a captured response cannot be posted twice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{Session, SessionId};

/// Keyed storage for gateway sessions.
///
/// Expired sessions read as absent. Ordering of concurrent read-modify-write
/// cycles is the caller's job, see [`SessionContext`](super::SessionContext).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<Session>>;

    /// Insert or overwrite.
    async fn put(&self, session: Session) -> Result<()>;

    /// Returns whether a session was removed.
    async fn delete(&self, id: SessionId) -> Result<bool>;

    /// Drop every expired session and report how many went. Expired
    /// assertion records are dropped too but not counted.
    async fn evict_expired(&self) -> Result<usize>;

    /// Record a consumed assertion ID until `until`. Returns `false` when the
    /// ID is already recorded and not yet expired. Check and insert are atomic.
    async fn claim_assertion(&self, assertion_id: &str, until: DateTime<Utc>) -> Result<bool>;

    /// Stored sessions, expired ones included until evicted.
    async fn session_count(&self) -> Result<usize>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    assertions: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let map = self.sessions.read().await;
        Ok(map.get(&id).filter(|s| !s.is_expired()).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }

    async fn evict_expired(&self) -> Result<usize> {
        let mut map = self.sessions.write().await;
        let stored = map.len();
        map.retain(|_, s| !s.is_expired());
        let evicted = stored - map.len();
        drop(map);

        let now = Utc::now();
        self.assertions.write().await.retain(|_, until| *until > now);
        Ok(evicted)
    }

    async fn claim_assertion(&self, assertion_id: &str, until: DateTime<Utc>) -> Result<bool> {
        let mut seen = self.assertions.write().await;
        if seen.get(assertion_id).is_some_and(|prev| *prev > Utc::now()) {
            return Ok(false);
        }
        seen.insert(assertion_id.to_string(), until);
        Ok(true)
    }

    async fn session_count(&self) -> Result<usize> {
        Ok(self.sessions.read().await.len())
    }
}

/// Hex session ID → MessagePack-encoded [`Session`].
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("gateway_sessions");

/// Assertion ID → MessagePack-encoded expiry of the replay record.
const ASSERTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("saml_assertions");

fn decode(bytes: &[u8]) -> Result<Session> {
    rmp_serde::from_slice(bytes).context("Corrupt session record")
}

/// redb-backed store. Each operation runs in its own transaction.
pub struct RedbSessionStore {
    db: Database,
}

impl RedbSessionStore {
    /// Open the database at `path`, creating the file and its directory
    /// when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open session database: {:?}", path))?;

        // Materialize the tables so read transactions never see them missing.
        let txn = db.begin_write()?;
        let stored = txn.open_table(SESSIONS)?.len()?;
        txn.open_table(ASSERTIONS)?;
        txn.commit()?;
        debug!(path = ?path, sessions = stored, "Opened session database");

        Ok(Self { db })
    }
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SESSIONS)?;
        let Some(record) = table.get(id.to_hex().as_str())? else {
            return Ok(None);
        };
        let session = decode(record.value())?;
        Ok((!session.is_expired()).then_some(session))
    }

    async fn put(&self, session: Session) -> Result<()> {
        let bytes = rmp_serde::to_vec(&session).context("Failed to encode session")?;
        let txn = self.db.begin_write()?;
        txn.open_table(SESSIONS)?
            .insert(session.id.to_hex().as_str(), bytes.as_slice())?;
        txn.commit()?;
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let existed = txn.open_table(SESSIONS)?.remove(id.to_hex().as_str())?.is_some();
        txn.commit()?;
        Ok(existed)
    }

    async fn evict_expired(&self) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let evicted = {
            let mut table = txn.open_table(SESSIONS)?;

            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (key, record) = entry?;
                match decode(record.value()) {
                    Ok(session) if !session.is_expired() => {}
                    Ok(_) => doomed.push(key.value().to_string()),
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable session record");
                        doomed.push(key.value().to_string());
                    }
                }
            }

            for key in &doomed {
                table.remove(key.as_str())?;
            }
            doomed.len()
        };
        {
            let mut table = txn.open_table(ASSERTIONS)?;
            let now = Utc::now();

            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (key, record) = entry?;
                let until: Option<DateTime<Utc>> = rmp_serde::from_slice(record.value()).ok();
                if until.map_or(true, |u| u <= now) {
                    doomed.push(key.value().to_string());
                }
            }
            for key in &doomed {
                table.remove(key.as_str())?;
            }
            if !doomed.is_empty() {
                debug!(assertions = doomed.len(), "Evicted expired assertion records");
            }
        }
        txn.commit()?;
        Ok(evicted)
    }

    async fn claim_assertion(&self, assertion_id: &str, until: DateTime<Utc>) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let claimed = {
            let mut table = txn.open_table(ASSERTIONS)?;
            let replayed = match table.get(assertion_id)? {
                Some(record) => rmp_serde::from_slice::<DateTime<Utc>>(record.value())
                    .map(|prev| prev > Utc::now())
                    .unwrap_or(false),
                None => false,
            };
            if !replayed {
                let bytes = rmp_serde::to_vec(&until).context("Failed to encode assertion record")?;
                table.insert(assertion_id, bytes.as_slice())?;
            }
            !replayed
        };
        txn.commit()?;
        Ok(claimed)
    }

    async fn session_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let count = txn.open_table(SESSIONS)?.len()?;
        Ok(count as usize)
    }
}
