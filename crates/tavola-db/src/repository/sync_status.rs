//! # Sync Status Repository
//!
//! The singleton `sync_status` row: recomputed from the queue, never patched.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tavola_core::{KindCounts, SyncPhase, SyncStatus, WriteKind, MAX_SYNC_ATTEMPTS};

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    last_synced_at: Option<DateTime<Utc>>,
    phase: SyncPhase,
    pending_orders: i64,
    pending_sales: i64,
    pending_invoices: i64,
    failed_orders: i64,
    failed_sales: i64,
    failed_invoices: i64,
    computed_at: DateTime<Utc>,
}

impl From<StatusRow> for SyncStatus {
    fn from(row: StatusRow) -> Self {
        SyncStatus {
            last_synced_at: row.last_synced_at,
            phase: row.phase,
            pending: KindCounts {
                order: row.pending_orders,
                sale: row.pending_sales,
                invoice: row.pending_invoices,
            },
            failed: KindCounts {
                order: row.failed_orders,
                sale: row.failed_sales,
                invoice: row.failed_invoices,
            },
            computed_at: row.computed_at,
        }
    }
}

/// Repository for the aggregate sync status.
#[derive(Debug, Clone)]
pub struct SyncStatusRepository {
    pool: SqlitePool,
}

impl SyncStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStatusRepository { pool }
    }

    /// Reads the persisted status as of its last computation.
    pub async fn get(&self) -> DbResult<SyncStatus> {
        self.ensure_row().await?;

        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT last_synced_at, phase,
                   pending_orders, pending_sales, pending_invoices,
                   failed_orders, failed_sales, failed_invoices,
                   computed_at
            FROM sync_status
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Recomputes the counts from the queue contents and persists them.
    ///
    /// `last_synced_at` only moves forward: it is the later of the stored
    /// value and the newest `synced_at` still in the queue, so a purge never
    /// rewinds it. The phase is left as the reconciler last set it.
    pub async fn compute(&self) -> DbResult<SyncStatus> {
        self.ensure_row().await?;

        let rows: Vec<(WriteKind, i64, i64)> = sqlx::query_as(
            r#"
            SELECT kind,
                   COUNT(*) AS pending,
                   SUM(CASE WHEN attempts >= ?1 THEN 1 ELSE 0 END) AS failed
            FROM offline_queue
            WHERE synced = 0
            GROUP BY kind
            "#,
        )
        .bind(MAX_SYNC_ATTEMPTS)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = KindCounts::default();
        let mut failed = KindCounts::default();
        for (kind, pending_count, failed_count) in rows {
            pending.set(kind, pending_count);
            failed.set(kind, failed_count);
        }

        let newest_in_queue: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(synced_at) FROM offline_queue WHERE synced = 1")
                .fetch_one(&self.pool)
                .await?;

        let stored: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_synced_at FROM sync_status WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        let last_synced_at = match (stored, newest_in_queue) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE sync_status SET
                last_synced_at = ?1,
                pending_orders = ?2,
                pending_sales = ?3,
                pending_invoices = ?4,
                failed_orders = ?5,
                failed_sales = ?6,
                failed_invoices = ?7,
                computed_at = ?8
            WHERE id = 1
            "#,
        )
        .bind(last_synced_at)
        .bind(pending.order)
        .bind(pending.sale)
        .bind(pending.invoice)
        .bind(failed.order)
        .bind(failed.sale)
        .bind(failed.invoice)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(
            pending = pending.total(),
            failed = failed.total(),
            "Sync status recomputed"
        );

        self.get().await
    }

    /// Records the reconciler phase.
    pub async fn set_phase(&self, phase: SyncPhase) -> DbResult<()> {
        self.ensure_row().await?;

        sqlx::query("UPDATE sync_status SET phase = ?1 WHERE id = 1")
            .bind(phase)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Recreates the singleton if something removed it.
    async fn ensure_row(&self) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (id, phase, computed_at)
            VALUES (1, 'idle', ?1)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_status_is_idle_and_clear() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let status = db.sync_status().get().await.unwrap();

        assert_eq!(status.phase, SyncPhase::Idle);
        assert!(status.is_clear());
        assert!(status.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_compute_counts_pending_and_failed_per_kind() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = db.offline_queue();

        queue.enqueue(WriteKind::Order, "A-1", "{}").await.unwrap();
        queue.enqueue(WriteKind::Order, "A-2", "{}").await.unwrap();
        queue.enqueue(WriteKind::Sale, "S-1", "{}").await.unwrap();
        queue.enqueue(WriteKind::Invoice, "I-1", "{}").await.unwrap();

        for _ in 0..3 {
            queue.record_attempt("A-2", "unreachable").await.unwrap();
        }
        queue.mark_synced("I-1").await.unwrap();

        let status = db.sync_status().compute().await.unwrap();

        // Exhausted entries still count as pending.
        assert_eq!(status.pending.get(WriteKind::Order), 2);
        assert_eq!(status.failed.get(WriteKind::Order), 1);
        assert_eq!(status.pending.get(WriteKind::Sale), 1);
        assert_eq!(status.failed.get(WriteKind::Sale), 0);
        assert_eq!(status.pending.get(WriteKind::Invoice), 0);
        assert!(status.last_synced_at.is_some());

        let persisted = db.sync_status().get().await.unwrap();
        assert_eq!(persisted, status);
    }

    #[tokio::test]
    async fn test_last_synced_survives_purge() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = db.offline_queue();

        queue.enqueue(WriteKind::Sale, "S-1", "{}").await.unwrap();
        queue.mark_synced("S-1").await.unwrap();
        let before = db.sync_status().compute().await.unwrap();

        queue.purge(Utc::now() + chrono::Duration::seconds(5)).await.unwrap();
        let after = db.sync_status().compute().await.unwrap();

        assert_eq!(after.last_synced_at, before.last_synced_at);
        assert!(after.is_clear());
    }

    #[tokio::test]
    async fn test_set_phase() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.sync_status().set_phase(SyncPhase::Failed).await.unwrap();

        let status = db.sync_status().compute().await.unwrap();
        assert_eq!(status.phase, SyncPhase::Failed);
    }
}
