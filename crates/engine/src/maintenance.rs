//! Background maintenance tasks.
//!
//! The expiry sweep and the in-memory compaction run on recurring timers,
//! fully decoupled from request handling. Both are also callable manually
//! through the session manager (`expire_sweep`, `compact`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::services::SessionManager;

/// Handles to the spawned maintenance tasks. The tasks run until aborted or
/// until the runtime shuts down.
pub struct MaintenanceHandles {
    sweeper: JoinHandle<()>,
    compactor: JoinHandle<()>,
}

impl MaintenanceHandles {
    pub fn abort(&self) {
        self.sweeper.abort();
        self.compactor.abort();
    }
}

/// Spawns the expiry sweeper and the compaction task.
pub fn spawn(session: Arc<SessionManager>, config: &Config) -> MaintenanceHandles {
    let sweep_every = Duration::from_secs(config.sweep_interval_secs.max(1));
    let compact_every = Duration::from_secs(config.compaction_interval_secs.max(1));

    let sweeper = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = session.expire_sweep(Utc::now()).await {
                    tracing::error!(error = %err, "expiry sweep failed");
                }
            }
        })
    };

    let compactor = tokio::spawn(async move {
        let mut ticker = interval(compact_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (events, entries) = session.compact(Utc::now());
            if events > 0 || entries > 0 {
                tracing::debug!(events, entries, "compacted in-memory state");
            }
        }
    });

    MaintenanceHandles { sweeper, compactor }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EphemeralEmail, User};
    use crate::policy::ModePolicy;
    use crate::repos::{MemoryResourceStore, ResourceStore};
    use crate::services::MockEmailProvider;
    use crate::test_utils::test_config;

    #[tokio::test(start_paused = true)]
    async fn sweeper_deactivates_already_expired_emails() {
        let store = Arc::new(MemoryResourceStore::new());
        let now = Utc::now();
        store
            .upsert_user(&User::first_contact(1, now))
            .await
            .unwrap();
        let email = EphemeralEmail::new(
            1,
            "stale@1secmail.com".into(),
            now - chrono::Duration::hours(2),
            chrono::Duration::hours(1),
        );
        store.insert_email(&email).await.unwrap();

        let session = Arc::new(SessionManager::new(
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::new(MockEmailProvider::new()),
            ModePolicy::full(),
            test_config(),
        ));

        let handles = spawn(session, &test_config());

        // Paused time: the sleep yields to the first (immediate) tick.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.count_active_emails(1).await.unwrap(), 0);
        handles.abort();
    }
}
