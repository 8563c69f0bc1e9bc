//! # Central Store
//!
//! The register's upstream: where orders, sales and invoices end up. When it
//! cannot be reached, writes go to the offline queue instead.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OfflineGateway::write(kind, key, payload)                             │
//! │       │                                                                 │
//! │       ├── probe() ok ──► submit() ok ──────────────► Delivered          │
//! │       │                     │ err                                       │
//! │       │                     ▼                                           │
//! │       └── probe() fails ──► offline_queue.enqueue() ─► Queued           │
//! │                                                                         │
//! │  HTTP shape:                                                           │
//! │    GET  {base}/health                       liveness (only offline     │
//! │                                             signal)                    │
//! │    POST {base}/sync/{order|sale|invoice}    body = payload snapshot    │
//! │         Idempotency-Key: <business key>     replays are harmless       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use tavola_core::{QueuedWrite, WriteKind};
use tavola_db::{Database, OfflineQueueRepository};

use crate::error::{SyncError, SyncResult};

/// Header carrying the business key so the central store can dedupe replays.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// =============================================================================
// Central Store Trait
// =============================================================================

#[async_trait]
pub trait CentralStore: Send + Sync {
    /// Trivial read. `false` is the only signal that the register is offline.
    async fn probe(&self) -> bool;

    /// Delivers one write. Must be idempotent per `business_key`.
    async fn submit(&self, kind: WriteKind, business_key: &str, payload: &str) -> SyncResult<()>;
}

// =============================================================================
// HTTP Central Store
// =============================================================================

/// `reqwest`-backed central store.
pub struct HttpCentralStore {
    client: reqwest::Client,
    base: String,
}

impl HttpCentralStore {
    pub fn new(base_url: &str, request_timeout: Duration) -> SyncResult<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Central URL must be http(s), got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(HttpCentralStore {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn sync_url(&self, kind: WriteKind) -> String {
        format!("{}/sync/{}", self.base, kind.as_str())
    }
}

#[async_trait]
impl CentralStore for HttpCentralStore {
    async fn probe(&self) -> bool {
        let url = format!("{}/health", self.base);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Central store probe failed");
                false
            }
        }
    }

    async fn submit(&self, kind: WriteKind, business_key: &str, payload: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(self.sync_url(kind))
            .header(IDEMPOTENCY_HEADER, business_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SyncError::CentralStoreRejected {
            status: status.as_u16(),
            message,
        })
    }
}

// =============================================================================
// Offline Gateway
// =============================================================================

/// Where a register write ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Delivered,
    Queued(QueuedWrite),
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued(_))
    }
}

/// The register's write path: central store when reachable, queue otherwise.
#[derive(Clone)]
pub struct OfflineGateway {
    store: Arc<dyn CentralStore>,
    queue: OfflineQueueRepository,
}

impl OfflineGateway {
    pub fn new(store: Arc<dyn CentralStore>, db: &Database) -> Self {
        OfflineGateway {
            store,
            queue: db.offline_queue(),
        }
    }

    /// Writes `payload` upstream, or queues a snapshot of it.
    ///
    /// Outages and 5xx answers queue the write. A 4xx rejection is returned
    /// to the caller and nothing is queued.
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        kind: WriteKind,
        business_key: &str,
        payload: &T,
    ) -> SyncResult<WriteOutcome> {
        let snapshot = serde_json::to_string(payload)?;

        if self.store.probe().await {
            match self.store.submit(kind, business_key, &snapshot).await {
                Ok(()) => {
                    debug!(kind = %kind, business_key, "Write delivered");
                    return Ok(WriteOutcome::Delivered);
                }
                Err(e) if e.is_retryable() => {
                    warn!(kind = %kind, business_key, error = %e, "Submit failed, queueing write");
                }
                Err(e) => {
                    warn!(kind = %kind, business_key, error = %e, "Central store rejected write");
                    return Err(e);
                }
            }
        } else {
            info!(kind = %kind, business_key, "Central store offline, queueing write");
        }

        let entry = self.queue.enqueue(kind, business_key, &snapshot).await?;
        Ok(WriteOutcome::Queued(entry))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCentral;
    use super::*;
    use serde_json::json;
    use tavola_db::DbConfig;

    #[tokio::test]
    async fn test_gateway_delivers_when_online() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = FakeCentral::online();
        let gateway = OfflineGateway::new(store.clone(), &db);

        let outcome = gateway
            .write(WriteKind::Sale, "S-100", &json!({ "total": 1250 }))
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Delivered);
        assert_eq!(store.received_keys(), vec!["S-100".to_string()]);
        assert!(db.offline_queue().get("S-100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gateway_queues_when_probe_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let gateway = OfflineGateway::new(FakeCentral::offline(), &db);

        let outcome = gateway
            .write(WriteKind::Order, "A-17", &json!({ "table": 4 }))
            .await
            .unwrap();

        match outcome {
            WriteOutcome::Queued(entry) => {
                assert_eq!(entry.kind, WriteKind::Order);
                assert_eq!(entry.attempts, 0);
                assert!(!entry.synced);
                assert_eq!(entry.payload_json().unwrap()["table"], 4);
            }
            other => panic!("Expected Queued, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gateway_returns_client_rejection() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = FakeCentral::online();
        store.reject.lock().unwrap().insert("I-9".to_string());
        let gateway = OfflineGateway::new(store, &db);

        let result = gateway.write(WriteKind::Invoice, "I-9", &json!({})).await;

        assert!(matches!(
            result,
            Err(SyncError::CentralStoreRejected { status: 422, .. })
        ));
        assert_eq!(db.offline_queue().count_pending(WriteKind::Invoice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gateway_queues_server_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = FakeCentral::online();
        store.busy.lock().unwrap().insert("I-10".to_string());
        let gateway = OfflineGateway::new(store.clone(), &db);

        let outcome = gateway
            .write(WriteKind::Invoice, "I-10", &json!({ "total": 900 }))
            .await
            .unwrap();

        assert!(outcome.is_queued());
        assert!(store.received_keys().is_empty());
        assert_eq!(db.offline_queue().count_pending(WriteKind::Invoice).await.unwrap(), 1);
    }

    #[test]
    fn test_http_store_urls() {
        let store = HttpCentralStore::new("https://central.example.com/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(store.sync_url(WriteKind::Invoice), "https://central.example.com/api/sync/invoice");

        assert!(HttpCentralStore::new("ftp://central", Duration::from_secs(5)).is_err());
    }
}
