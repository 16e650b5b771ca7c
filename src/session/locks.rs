//! Per-session async mutexes.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use super::types::SessionId;

/// Entries are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// A registry of async mutexes keyed by session ID.
///
/// Holders of the same key are serialized; different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: SessionId) -> Result<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| anyhow!("Session lock registry poisoned"))?;

            if locks.len() >= PRUNE_THRESHOLD {
                // Only the registry itself holds idle entries.
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }

            Arc::clone(locks.entry(id).or_default())
        };

        Ok(mutex.lock_owned().await)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
