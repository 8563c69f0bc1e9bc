//! # Reconciler
//!
//! Replays the offline queue into the central store once it is reachable
//! again, and purges what has been synced for long enough.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Reconciler Cycle                                │
//! │                                                                         │
//! │  store.probe()                                                         │
//! │       │                                                                 │
//! │       ├── offline ──► phase = failed, compute status, stop              │
//! │       │               (no attempts consumed)                           │
//! │       │                                                                 │
//! │       └── online ───► phase = syncing                                   │
//! │                        │                                                │
//! │                        ▼                                                │
//! │           for kind in [order, sale, invoice]:                          │
//! │             for entry in list_pending(kind):    (attempts < 3)         │
//! │               submit ok  ──► mark_synced + log(synced)                 │
//! │               submit err ──► record_attempt + log(failed)              │
//! │                        │                                                │
//! │                        ▼                                                │
//! │           compute status, phase = idle | failed                        │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Poll interval: 15 seconds (configurable)                            │
//! │  • Purge: every 24 hours, synced rows older than 30 days               │
//! │  • A trigger from the handle runs a cycle immediately                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tavola_core::{QueuedWrite, SyncPhase, SyncStatus, WriteKind};
use tavola_db::{AttemptOutcome, Database, PurgeReport};

use crate::central::CentralStore;
use crate::config::OfflineSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Configuration
// =============================================================================

/// Timing for the reconciler loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    pub purge_interval: Duration,
    pub retention: chrono::Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            poll_interval: Duration::from_secs(15),
            purge_interval: Duration::from_secs(24 * 60 * 60),
            retention: chrono::Duration::days(30),
        }
    }
}

impl From<&OfflineSettings> for ReconcilerConfig {
    fn from(settings: &OfflineSettings) -> Self {
        ReconcilerConfig {
            poll_interval: settings.poll_interval(),
            purge_interval: settings.purge_interval(),
            retention: settings.retention(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub online: bool,
    pub synced: usize,
    pub failed: usize,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Background task draining the offline queue.
pub struct Reconciler {
    db: Arc<Database>,
    store: Arc<dyn CentralStore>,
    config: ReconcilerConfig,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the reconciler.
#[derive(Clone)]
pub struct ReconcilerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcilerHandle {
    /// Asks for a cycle now instead of at the next tick. Coalesces with a
    /// trigger that is already pending.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => {
                Err(SyncError::ChannelError("Trigger channel closed".into()))
            }
        }
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl Reconciler {
    /// Creates a new reconciler and returns a handle.
    pub fn new(
        db: Arc<Database>,
        store: Arc<dyn CentralStore>,
        config: ReconcilerConfig,
    ) -> (Self, ReconcilerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let reconciler = Reconciler {
            db,
            store,
            config,
            trigger_rx,
            shutdown_rx,
        };

        (reconciler, ReconcilerHandle { trigger_tx, shutdown_tx })
    }

    /// Runs the reconciler loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            retention_days = self.config.retention.num_days(),
            "Reconciler starting"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut purge = tokio::time::interval_at(
            Instant::now() + self.config.purge_interval,
            self.config.purge_interval,
        );
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(?e, "Reconcile cycle failed");
                    }
                }

                Some(()) = self.trigger_rx.recv() => {
                    debug!("Reconcile triggered");
                    if let Err(e) = self.run_cycle().await {
                        error!(?e, "Reconcile cycle failed");
                    }
                }

                _ = purge.tick() => {
                    if let Err(e) = self.purge_expired().await {
                        error!(?e, "Offline queue purge failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reconciler shutting down");
                    break;
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Runs one probe-and-replay cycle.
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let status = self.db.sync_status();

        if !self.store.probe().await {
            debug!("Central store unreachable, skipping replay");
            status.set_phase(SyncPhase::Failed).await?;
            status.compute().await?;
            return Ok(CycleReport::default());
        }

        status.set_phase(SyncPhase::Syncing).await?;

        let mut report = CycleReport {
            online: true,
            ..CycleReport::default()
        };

        for kind in WriteKind::ALL {
            let entries = self.db.offline_queue().list_pending(kind).await?;
            if entries.is_empty() {
                continue;
            }

            debug!(kind = %kind, count = entries.len(), "Replaying queued writes");
            for entry in entries {
                if self.replay(&entry).await? {
                    report.synced += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        let phase = if report.failed > 0 {
            SyncPhase::Failed
        } else {
            SyncPhase::Idle
        };
        status.compute().await?;
        status.set_phase(phase).await?;

        if report.synced > 0 || report.failed > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                "Reconcile cycle complete"
            );
        }

        Ok(report)
    }

    /// Submits one entry. Returns whether it synced.
    async fn replay(&self, entry: &QueuedWrite) -> SyncResult<bool> {
        let queue = self.db.offline_queue();

        match self
            .store
            .submit(entry.kind, &entry.business_key, &entry.payload)
            .await
        {
            Ok(()) => {
                queue.mark_synced(&entry.business_key).await?;
                queue.log_attempt(entry, AttemptOutcome::Synced, None).await?;
                Ok(true)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    kind = %entry.kind,
                    business_key = %entry.business_key,
                    attempt = entry.attempts + 1,
                    error = %message,
                    "Replay failed"
                );
                queue.record_attempt(&entry.business_key, &message).await?;
                queue
                    .log_attempt(entry, AttemptOutcome::Failed, Some(&message))
                    .await?;
                Ok(false)
            }
        }
    }

    /// Deletes synced entries and log rows older than the retention window.
    pub async fn purge_expired(&self) -> SyncResult<PurgeReport> {
        let cutoff = Utc::now() - self.config.retention;
        let report = self.db.offline_queue().purge(cutoff).await?;

        if report.queue_rows > 0 || report.log_rows > 0 {
            info!(
                queue_rows = report.queue_rows,
                log_rows = report.log_rows,
                cutoff = %cutoff,
                "Purged synced offline entries"
            );
        }

        Ok(report)
    }

    /// Current persisted status.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(self.db.sync_status().get().await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::testing::FakeCentral;
    use std::sync::atomic::Ordering;
    use tavola_core::MAX_SYNC_ATTEMPTS;
    use tavola_db::DbConfig;

    async fn setup(store: Arc<FakeCentral>) -> (Arc<Database>, Reconciler) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let (reconciler, _handle) = Reconciler::new(db.clone(), store, ReconcilerConfig::default());
        (db, reconciler)
    }

    #[tokio::test]
    async fn test_offline_cycle_consumes_no_attempts() {
        let store = FakeCentral::offline();
        let (db, reconciler) = setup(store).await;
        db.offline_queue()
            .enqueue(WriteKind::Sale, "S-1", "{}")
            .await
            .unwrap();

        let report = reconciler.run_cycle().await.unwrap();

        assert!(!report.online);
        let entry = db.offline_queue().get("S-1").await.unwrap().unwrap();
        assert_eq!(entry.attempts, 0);
        assert_eq!(db.offline_queue().log_count("S-1").await.unwrap(), 0);

        let status = reconciler.status().await.unwrap();
        assert_eq!(status.phase, SyncPhase::Failed);
        assert_eq!(status.pending.sale, 1);
    }

    #[tokio::test]
    async fn test_online_cycle_marks_synced() {
        let store = FakeCentral::online();
        let (db, reconciler) = setup(store.clone()).await;
        let queue = db.offline_queue();
        queue.enqueue(WriteKind::Order, "A-17", r#"{"table":4}"#).await.unwrap();
        queue.enqueue(WriteKind::Invoice, "I-3", "{}").await.unwrap();

        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(report, CycleReport { online: true, synced: 2, failed: 0 });
        assert_eq!(store.received_keys(), vec!["A-17".to_string(), "I-3".to_string()]);
        assert!(queue.get("A-17").await.unwrap().unwrap().synced);
        assert_eq!(queue.log_count("A-17").await.unwrap(), 1);

        let status = reconciler.status().await.unwrap();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert!(status.is_clear());
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_submit_records_attempt() {
        let store = FakeCentral::online();
        store.reject.lock().unwrap().insert("I-9".to_string());
        let (db, reconciler) = setup(store).await;
        db.offline_queue()
            .enqueue(WriteKind::Invoice, "I-9", "{}")
            .await
            .unwrap();

        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(report.failed, 1);
        let entry = db.offline_queue().get("I-9").await.unwrap().unwrap();
        assert_eq!(entry.attempts, 1);
        assert!(entry.last_error.unwrap().contains("422"));
        assert_eq!(reconciler.status().await.unwrap().phase, SyncPhase::Failed);
    }

    #[tokio::test]
    async fn test_exhausted_entry_stops_replaying() {
        let store = FakeCentral::online();
        store.reject.lock().unwrap().insert("I-9".to_string());
        let (db, reconciler) = setup(store).await;
        db.offline_queue()
            .enqueue(WriteKind::Invoice, "I-9", "{}")
            .await
            .unwrap();

        for _ in 0..MAX_SYNC_ATTEMPTS {
            reconciler.run_cycle().await.unwrap();
        }
        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(report.failed, 0);
        let entry = db.offline_queue().get("I-9").await.unwrap().unwrap();
        assert_eq!(entry.attempts, MAX_SYNC_ATTEMPTS);
        assert!(entry.is_exhausted());

        let status = reconciler.status().await.unwrap();
        assert_eq!(status.pending.invoice, 1);
        assert_eq!(status.failed.invoice, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_outage() {
        let store = FakeCentral::offline();
        let (db, reconciler) = setup(store.clone()).await;
        db.offline_queue()
            .enqueue(WriteKind::Sale, "S-2", "{}")
            .await
            .unwrap();

        reconciler.run_cycle().await.unwrap();
        store.offline.store(false, Ordering::SeqCst);
        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(db.offline_queue().get("S-2").await.unwrap().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_entries() {
        let store = FakeCentral::online();
        let (db, reconciler) = setup(store).await;
        db.offline_queue()
            .enqueue(WriteKind::Order, "A-1", "{}")
            .await
            .unwrap();
        reconciler.run_cycle().await.unwrap();

        let report = reconciler.purge_expired().await.unwrap();

        assert_eq!(report.queue_rows, 0);
        assert!(db.offline_queue().get("A-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_handle_shutdown_stops_loop() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let (reconciler, handle) =
            Reconciler::new(db, FakeCentral::offline(), ReconcilerConfig::default());

        let task = tokio::spawn(reconciler.run());
        handle.trigger().unwrap();
        handle.shutdown().await.unwrap();

        task.await.unwrap();
        assert!(handle.trigger().is_err());
    }
}
