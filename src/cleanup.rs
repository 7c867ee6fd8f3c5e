//! Background expiry sweep.
//!
//! [`CleanupScheduler`] periodically flips every session with
//! `is_active AND expires_at <= now` to expired in one conditional bulk
//! UPDATE and logs one event per transitioned row. Because the statement
//! carries the same guard as manual invalidation, a logout racing the sweep
//! on the same row leaves exactly one winner and no duplicate events.
//!
//! The scheduler is an explicit service object with a `start()`/`stop()`
//! lifecycle: sweeps run sequentially inside a single task loop, so they can
//! never overlap, and shutdown is deterministic for tests and graceful
//! process exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::CleanupConfig;
use crate::store::SessionStore;

/// Counters describing the scheduler's work so far.
#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub sessions_expired: u64,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Scheduler lifecycle errors.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
}

/// Periodic expiry sweep over an injected session store.
pub struct CleanupScheduler {
    config: CleanupConfig,
    store: Arc<dyn SessionStore>,
    stats: RwLock<CleanupStats>,
    running: AtomicBool,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    #[must_use]
    pub fn new(config: CleanupConfig, store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            stats: RwLock::new(CleanupStats::default()),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the sweep task. Errors if already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), CleanupError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CleanupError::AlreadyRunning);
        }

        let (tx, rx) = broadcast::channel(4);
        *self.shutdown.lock().await = Some(tx);

        info!(interval_secs = self.config.interval_secs, "cleanup scheduler started");
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(rx).await });
        *self.handle.lock().await = Some(task);
        Ok(())
    }

    /// Signal shutdown and wait for the task to drain. Errors if not
    /// running.
    pub async fn stop(&self) -> Result<(), CleanupError> {
        let tx = self
            .shutdown
            .lock()
            .await
            .take()
            .ok_or(CleanupError::NotRunning)?;
        let _ = tx.send(());
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        info!("cleanup scheduler stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> CleanupStats {
        self.stats.read().await.clone()
    }

    async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(std::time::Duration::from_secs(self.config.interval_secs));
        // A slow sweep delays the next tick instead of stacking ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first sweep lands one interval after start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run one sweep immediately. Also used by the task loop; public so an
    /// admin endpoint or a test can force a sweep.
    pub async fn sweep_once(&self) -> u64 {
        match self.store.sweep_expired().await {
            Ok(swept) => {
                for session in &swept {
                    info!(
                        session_id = %session.session_id,
                        user_id = %session.user_id,
                        reason = "session_expired",
                        "session expired"
                    );
                }
                let count = swept.len() as u64;
                if count > 0 {
                    debug!(count, "expiry sweep completed");
                }
                let mut stats = self.stats.write().await;
                stats.total_runs += 1;
                stats.successful_runs += 1;
                stats.sessions_expired += count;
                stats.last_run_at = Some(chrono::Utc::now());
                count
            }
            Err(e) => {
                error!(error = %e, "expiry sweep failed");
                let mut stats = self.stats.write().await;
                stats.total_runs += 1;
                stats.failed_runs += 1;
                stats.last_run_at = Some(chrono::Utc::now());
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::classify_device;
    use crate::models::LocationInfo;
    use crate::store::{MemoryStore, NewSession};
    use chrono::Duration;

    fn new_session(id: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            user_id: "u1".to_string(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "ua".to_string(),
            device_info: classify_device("ua"),
            location_info: LocationInfo::unknown(),
        }
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = CleanupScheduler::new(CleanupConfig { interval_secs: 3600 }, store);

        assert!(!scheduler.is_running());
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(CleanupError::AlreadyRunning)
        ));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.stop().await, Err(CleanupError::NotRunning)));
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_sessions() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_session(new_session("overdue"), Duration::zero())
            .await
            .unwrap();
        store
            .insert_session(new_session("fresh"), Duration::minutes(30))
            .await
            .unwrap();

        let scheduler = CleanupScheduler::new(CleanupConfig::default(), store.clone());
        assert_eq!(scheduler.sweep_once().await, 1);

        let overdue = store.session("overdue").await.unwrap();
        assert!(!overdue.is_active);
        assert_eq!(
            overdue.logout_reason,
            Some(crate::models::LogoutReason::SessionExpired)
        );
        assert!(store.session("fresh").await.unwrap().is_active);

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.sessions_expired, 1);
    }

    #[tokio::test]
    async fn repeated_sweeps_do_not_double_count() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_session(new_session("overdue"), Duration::zero())
            .await
            .unwrap();

        let scheduler = CleanupScheduler::new(CleanupConfig::default(), store);
        assert_eq!(scheduler.sweep_once().await, 1);
        assert_eq!(scheduler.sweep_once().await, 0);
        assert_eq!(scheduler.stats().await.sessions_expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_sweeps_on_the_interval() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_session(new_session("overdue"), Duration::zero())
            .await
            .unwrap();

        let scheduler = CleanupScheduler::new(CleanupConfig { interval_secs: 60 }, store.clone());
        scheduler.start().await.unwrap();

        // Cross the first interval boundary; auto-advance runs the sweep.
        tokio::time::sleep(std::time::Duration::from_secs(61)).await;

        assert!(!store.session("overdue").await.unwrap().is_active);
        scheduler.stop().await.unwrap();
    }
}
