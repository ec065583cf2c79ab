///! Cache janitor - periodic expiry of ephemeral entries
///!
///! Runs `expire_before(now - ttl)` on a fixed interval until stopped. A failed
///! sweep is logged and the schedule continues.

use super::cache::EphemeralCache;
use super::clock::Clock;
use crate::config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Entries older than this are removed
    pub ttl: chrono::Duration,
    pub interval: Duration,
}

impl From<&CacheConfig> for JanitorConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            interval: config.sweep_interval(),
        }
    }
}

pub struct CacheJanitor {
    cache: EphemeralCache,
    clock: Arc<dyn Clock>,
    config: JanitorConfig,
}

impl CacheJanitor {
    pub fn new(cache: EphemeralCache, clock: Arc<dyn Clock>, config: JanitorConfig) -> Self {
        Self {
            cache,
            clock,
            config,
        }
    }

    /// One sweep. Returns the number of entries removed.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.config.ttl) else {
            tracing::warn!(
                "Cache TTL of {}h reaches before the earliest representable time; nothing expires",
                self.config.ttl.num_hours()
            );
            return Ok(0);
        };
        let removed = self.cache.expire_before(cutoff).await?;
        if removed > 0 {
            tracing::info!("Expired {} cached star maps older than {}", removed, cutoff);
        } else {
            tracing::debug!("No cached star maps older than {}", cutoff);
        }
        Ok(removed)
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(JanitorState::Idle);

        tracing::info!(
            "Starting cache janitor (ttl: {}h, interval: {}s)",
            self.config.ttl.num_hours(),
            self.config.interval.as_secs()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Sender dropped counts as a stop request too
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        state_tx.send_replace(JanitorState::Running);
                        if let Err(e) = self.run_once().await {
                            tracing::error!("Cache sweep failed: {:#}", e);
                        }
                        state_tx.send_replace(JanitorState::Idle);
                    }
                }
            }

            state_tx.send_replace(JanitorState::Stopped);
            tracing::info!("Cache janitor stopped");
        });

        JanitorHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        }
    }
}

pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<JanitorState>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    pub fn state(&self) -> JanitorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JanitorState> {
        self.state.clone()
    }

    /// Signal shutdown and wait for an in-progress sweep to finish
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::error!("Cache janitor task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::cache::test_support::entry;
    use crate::module::cache::{EphemeralEntry, EphemeralStore, MemoryStore};
    use crate::module::clock::ManualClock;
    use crate::model::Fingerprint;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn config() -> JanitorConfig {
        JanitorConfig {
            ttl: chrono::Duration::hours(24),
            interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_ttl_sweep() {
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::default());
        let cache = EphemeralCache::new(store.clone(), clock.clone());

        let stale = entry(10.0, now - chrono::Duration::hours(25));
        let fresh = entry(20.0, now - chrono::Duration::hours(1));
        store.put(Arc::new(stale.clone())).await.unwrap();
        store.put(Arc::new(fresh.clone())).await.unwrap();

        let janitor = CacheJanitor::new(cache.clone(), clock.clone(), config());
        assert_eq!(janitor.run_once().await.unwrap(), 1);
        assert!(cache.get(&stale.fingerprint).await.unwrap().is_none());
        assert!(cache.get(&fresh.fingerprint).await.unwrap().is_some());

        // Nothing more to do until the fresh entry ages out
        assert_eq!(janitor.run_once().await.unwrap(), 0);
        clock.advance(chrono::Duration::hours(24));
        assert_eq!(janitor.run_once().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_reaching_before_earliest_time_expires_nothing() {
        let now = DateTime::<Utc>::MIN_UTC + chrono::Duration::hours(1);
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::default());
        let cache = EphemeralCache::new(store.clone(), clock.clone());
        store.put(Arc::new(entry(10.0, now))).await.unwrap();

        let janitor = CacheJanitor::new(
            cache.clone(),
            clock,
            JanitorConfig {
                ttl: chrono::Duration::hours(crate::config::MAX_TTL_HOURS as i64),
                interval: Duration::from_secs(3600),
            },
        );
        assert_eq!(janitor.run_once().await.unwrap(), 0);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_sweeps_and_stops() {
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::default());
        let cache = EphemeralCache::new(store.clone(), clock.clone());
        store
            .put(Arc::new(entry(10.0, now - chrono::Duration::hours(30))))
            .await
            .unwrap();

        let handle = CacheJanitor::new(cache.clone(), clock, config()).start();
        for _ in 0..100 {
            if cache.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len().await.unwrap(), 0);

        let mut state = handle.subscribe();
        handle.stop().await;
        assert_eq!(*state.borrow_and_update(), JanitorState::Stopped);
    }

    struct BrokenStore;

    #[async_trait]
    impl EphemeralStore for BrokenStore {
        async fn get(&self, _: &Fingerprint) -> anyhow::Result<Option<Arc<EphemeralEntry>>> {
            Ok(None)
        }

        async fn put(&self, _: Arc<EphemeralEntry>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn expire_before(&self, _: DateTime<Utc>) -> anyhow::Result<usize> {
            anyhow::bail!("cache directory vanished")
        }

        async fn len(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failed_sweeps_do_not_end_schedule() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = EphemeralCache::new(Arc::new(BrokenStore), clock.clone());
        let janitor = CacheJanitor::new(
            cache,
            clock,
            JanitorConfig {
                ttl: chrono::Duration::hours(24),
                interval: Duration::from_millis(5),
            },
        );
        assert!(janitor.run_once().await.is_err());

        let handle = janitor.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_ne!(handle.state(), JanitorState::Stopped);
        handle.stop().await;
    }
}
