//! Periodic eviction of expired sessions.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::SessionStore;

/// Run one eviction pass and log the outcome.
pub async fn sweep(store: &dyn SessionStore) {
    match store.evict_expired().await {
        Ok(0) => debug!("No expired sessions to evict"),
        Ok(evicted) => info!(evicted, "Evicted expired sessions"),
        Err(e) => warn!(error = %e, "Session eviction failed"),
    }

    if let Ok(remaining) = store.session_count().await {
        debug!(sessions = remaining, "Session store size");
    }
}

/// Sweep `store` every `every_secs` seconds, starting one period from now.
/// Abort the returned handle to stop.
pub fn spawn_cleanup_task(store: Arc<dyn SessionStore>, every_secs: u64) -> JoinHandle<()> {
    let period = Duration::from_secs(every_secs);
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            sweep(store.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemorySessionStore;
    use crate::session::types::{Session, SessionId};
    use chrono::Utc;

    async fn seeded_store() -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        store.put(Session::new(SessionId::generate(), 3600)).await.unwrap();

        let mut stale = Session::new(SessionId::generate(), 3600);
        stale.expires_at = Utc::now() - chrono::Duration::seconds(5);
        store.put(stale).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_sessions() {
        let store = seeded_store().await;
        sweep(store.as_ref()).await;
        assert_eq!(store.session_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_waits_one_period() {
        let store = seeded_store().await;
        let handle = spawn_cleanup_task(store.clone(), 60);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.session_count().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.session_count().await.unwrap(), 1);

        handle.abort();
    }
}
