//! # Offline Queue Repository
//!
//! Durable queue of writes the register could not deliver to the central
//! store, replayed later by the reconciler.
//!
//! ## Queue Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Offline Queue Lifecycle                              │
//! │                                                                         │
//! │  Register write while central store is unreachable                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(kind, business_key, payload)                                  │
//! │     INSERT ... ON CONFLICT(business_key) DO NOTHING                    │
//! │       │   (a second enqueue of the same key keeps the first snapshot)  │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            RECONCILER (background, when online)                 │   │
//! │  │                                                                 │   │
//! │  │  list_pending(kind)   synced = 0 AND attempts < 3               │   │
//! │  │       │                                                         │   │
//! │  │       ├── submit ok ──► mark_synced(key)      (first call wins) │   │
//! │  │       └── submit err ─► record_attempt(key, error)              │   │
//! │  │                                                                 │   │
//! │  │  log_attempt(...) for every try                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  purge(older_than)  drops synced rows and log rows past retention      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation touches one row and is idempotent, so two reconcilers
//! racing on the same queue cannot corrupt it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tavola_core::{QueuedWrite, WriteKind, MAX_SYNC_ATTEMPTS};

const SELECT_COLUMNS: &str = r#"
    SELECT id, kind, business_key, payload, synced, attempts, last_error,
           created_at, updated_at, synced_at
    FROM offline_queue
"#;

/// Result of a single reconciliation attempt, as recorded in `sync_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Synced,
    Failed,
}

impl AttemptOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Synced => "synced",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// Rows removed by a retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub queue_rows: u64,
    pub log_rows: u64,
}

/// Repository for offline queue operations.
#[derive(Debug, Clone)]
pub struct OfflineQueueRepository {
    pool: SqlitePool,
}

impl OfflineQueueRepository {
    /// Creates a new OfflineQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineQueueRepository { pool }
    }

    /// Persists a write for later replay.
    ///
    /// Insert-if-absent by `business_key`: enqueuing a key that is already
    /// queued leaves the existing row untouched and returns it.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_string(&sale)?;
    /// let entry = repo.enqueue(WriteKind::Sale, &sale.receipt_number, &payload).await?;
    /// assert_eq!(entry.attempts, 0);
    /// ```
    pub async fn enqueue(
        &self,
        kind: WriteKind,
        business_key: &str,
        payload: &str,
    ) -> DbResult<QueuedWrite> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO offline_queue (
                kind, business_key, payload, synced, attempts,
                last_error, created_at, updated_at, synced_at
            ) VALUES (?1, ?2, ?3, 0, 0, NULL, ?4, ?4, NULL)
            ON CONFLICT(business_key) DO NOTHING
            "#,
        )
        .bind(kind)
        .bind(business_key)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(kind = %kind, business_key = %business_key, "Already queued, keeping first snapshot");
        } else {
            info!(kind = %kind, business_key = %business_key, "Write queued for offline sync");
        }

        self.get(business_key)
            .await?
            .ok_or_else(|| DbError::not_found("QueuedWrite", business_key))
    }

    /// Looks up one entry by business key.
    pub async fn get(&self, business_key: &str) -> DbResult<Option<QueuedWrite>> {
        let sql = format!("{} WHERE business_key = ?1", SELECT_COLUMNS);
        let entry = sqlx::query_as::<_, QueuedWrite>(&sql)
            .bind(business_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// Returns replayable entries of one kind, oldest first.
    ///
    /// Entries that reached the attempt ceiling are excluded here but stay in
    /// the table and in the status counts.
    pub async fn list_pending(&self, kind: WriteKind) -> DbResult<Vec<QueuedWrite>> {
        let sql = format!(
            "{} WHERE kind = ?1 AND synced = 0 AND attempts < ?2 ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        );
        let entries = sqlx::query_as::<_, QueuedWrite>(&sql)
            .bind(kind)
            .bind(MAX_SYNC_ATTEMPTS)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Returns exhausted entries of every kind, for operator inspection.
    pub async fn list_failed(&self) -> DbResult<Vec<QueuedWrite>> {
        let sql = format!(
            "{} WHERE synced = 0 AND attempts >= ?1 ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        );
        let entries = sqlx::query_as::<_, QueuedWrite>(&sql)
            .bind(MAX_SYNC_ATTEMPTS)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Marks an entry delivered.
    ///
    /// Only the first call changes anything; later calls leave `synced_at`
    /// as it was. Returns true if this call performed the transition.
    pub async fn mark_synced(&self, business_key: &str) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                synced = 1,
                synced_at = ?2,
                updated_at = ?2
            WHERE business_key = ?1 AND synced = 0
            "#,
        )
        .bind(business_key)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed delivery: `attempts += 1`, `last_error = error`.
    ///
    /// Synced entries are left alone.
    pub async fn record_attempt(&self, business_key: &str, error: &str) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE business_key = ?1 AND synced = 0
            "#,
        )
        .bind(business_key)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get(business_key).await?.is_none() {
            return Err(DbError::not_found("QueuedWrite", business_key));
        }

        Ok(())
    }

    /// Appends one row to `sync_log`.
    pub async fn log_attempt(
        &self,
        entry: &QueuedWrite,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (business_key, kind, outcome, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&entry.business_key)
        .bind(entry.kind)
        .bind(outcome.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts `sync_log` rows for one business key.
    pub async fn log_count(&self, business_key: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_log WHERE business_key = ?1")
            .bind(business_key)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts unsynced entries of one kind, exhausted ones included.
    pub async fn count_pending(&self, kind: WriteKind) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM offline_queue WHERE kind = ?1 AND synced = 0")
                .bind(kind)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes synced entries and log rows older than `older_than`.
    ///
    /// Unsynced entries are never purged, however old.
    pub async fn purge(&self, older_than: DateTime<Utc>) -> DbResult<PurgeReport> {
        let queue = sqlx::query(
            "DELETE FROM offline_queue WHERE synced = 1 AND synced_at IS NOT NULL AND synced_at < ?1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        let log = sqlx::query("DELETE FROM sync_log WHERE created_at < ?1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        let report = PurgeReport {
            queue_rows: queue.rows_affected(),
            log_rows: log.rows_affected(),
        };

        info!(
            queue_rows = report.queue_rows,
            log_rows = report.log_rows,
            cutoff = %older_than,
            "Purged offline queue"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;

    async fn repo() -> OfflineQueueRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.offline_queue()
    }

    #[tokio::test]
    async fn test_enqueue_then_list_pending() {
        let repo = repo().await;
        let entry = repo
            .enqueue(WriteKind::Order, "A-17", r#"{"total":1200}"#)
            .await
            .unwrap();

        assert_eq!(entry.attempts, 0);
        assert!(!entry.synced);
        assert!(entry.synced_at.is_none());

        let pending = repo.list_pending(WriteKind::Order).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].business_key, "A-17");
        assert_eq!(pending[0].attempts, 0);
        assert!(!pending[0].synced);

        assert!(repo.list_pending(WriteKind::Sale).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_same_key_keeps_first_snapshot() {
        let repo = repo().await;
        let first = repo.enqueue(WriteKind::Sale, "S-1", r#"{"v":1}"#).await.unwrap();
        let second = repo.enqueue(WriteKind::Sale, "S-1", r#"{"v":2}"#).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.payload, r#"{"v":1}"#);
        assert_eq!(repo.count_pending(WriteKind::Sale).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_entry_leaves_pending_list() {
        let repo = repo().await;
        repo.enqueue(WriteKind::Invoice, "INV-9", "{}").await.unwrap();

        for attempt in 1..=3 {
            repo.record_attempt("INV-9", &format!("timeout #{}", attempt))
                .await
                .unwrap();
        }

        assert!(repo.list_pending(WriteKind::Invoice).await.unwrap().is_empty());
        assert_eq!(repo.count_pending(WriteKind::Invoice).await.unwrap(), 1);

        let failed = repo.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(failed[0].last_error.as_deref(), Some("timeout #3"));
    }

    #[tokio::test]
    async fn test_mark_synced_is_idempotent() {
        let repo = repo().await;
        repo.enqueue(WriteKind::Order, "A-1", "{}").await.unwrap();

        assert!(repo.mark_synced("A-1").await.unwrap());
        let after_first = repo.get("A-1").await.unwrap().unwrap();

        assert!(!repo.mark_synced("A-1").await.unwrap());
        let after_second = repo.get("A-1").await.unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert!(after_second.synced);
        assert!(after_second.synced_at.is_some());
        assert!(repo.list_pending(WriteKind::Order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_attempt_unknown_key() {
        let repo = repo().await;
        let err = repo.record_attempt("missing", "boom").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_synced_rows() {
        let repo = repo().await;
        repo.enqueue(WriteKind::Order, "old-synced", "{}").await.unwrap();
        repo.enqueue(WriteKind::Order, "still-pending", "{}").await.unwrap();
        repo.mark_synced("old-synced").await.unwrap();

        let entry = repo.get("old-synced").await.unwrap().unwrap();
        repo.log_attempt(&entry, AttemptOutcome::Synced, None).await.unwrap();

        // Cutoff in the past: nothing is old enough yet.
        let report = repo.purge(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(report, PurgeReport::default());

        // Cutoff in the future: the synced row and the log row go.
        let report = repo.purge(Utc::now() + Duration::seconds(5)).await.unwrap();
        assert_eq!(report.queue_rows, 1);
        assert_eq!(report.log_rows, 1);

        assert!(repo.get("old-synced").await.unwrap().is_none());
        assert!(repo.get("still-pending").await.unwrap().is_some());
    }
}
