//! # Tavola Hub
//!
//! Register-side process: realtime hub, mDNS advertisement and offline queue
//! reconciliation.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tavola.toml + TAVOLA_* ──► TavolaConfig                                │
//! │                                │                                        │
//! │        ┌───────────────────────┼──────────────────────┐                 │
//! │        ▼                       ▼                      ▼                 │
//! │  offline.db (sqlx)      Hub + HubServer (3001)   Responder (mDNS)       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Reconciler ──► central store   (only when offline.central_url is set) │
//! │                                                                         │
//! │  Ctrl+C / SIGTERM: responder, reconciler, hub, server, database        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tavola_core::HUB_SERVICE_TYPE;
use tavola_db::{Database, DbConfig};
use tavola_sync::{
    CentralStore, HttpCentralStore, Hub, HubConfig, HubServer, Reconciler, ReconcilerConfig,
    Responder, TavolaConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Tavola hub...");

    let config = TavolaConfig::load(None).context("Failed to load configuration")?;
    info!(
        device_id = %config.device_id(),
        device_name = %config.device.name,
        port = config.hub.port,
        mdns = config.discovery.mdns_enabled,
        "Configuration loaded"
    );

    let db = Arc::new(
        Database::new(DbConfig::new(&config.offline.database_path))
            .await
            .context("Failed to open offline database")?,
    );
    let status = db.sync_status().compute().await?;
    info!(
        pending = status.pending.total(),
        failed = status.failed.total(),
        "Offline queue opened"
    );

    let hub = Hub::new(HubConfig::from(&config.hub)).start();
    let server = HubServer::new(config.hub.clone(), hub.clone())
        .start()
        .await
        .context("Failed to start hub server")?;

    let responder = if config.discovery.mdns_enabled {
        let service_type = if config.discovery.service_type.is_empty() {
            HUB_SERVICE_TYPE
        } else {
            config.discovery.service_type.as_str()
        };
        Responder::advertise(service_type, &config.device.name, server.local_addr().port())
    } else {
        info!("mDNS advertisement disabled");
        None
    };

    let reconciler = match config.central_url() {
        Some(url) => {
            let store: Arc<dyn CentralStore> =
                Arc::new(HttpCentralStore::new(url, config.offline.connect_timeout())?);
            let (reconciler, handle) =
                Reconciler::new(db.clone(), store, ReconcilerConfig::from(&config.offline));
            let task = tokio::spawn(reconciler.run());
            info!(central_url = %url, "Reconciler started");
            Some((handle, task))
        }
        None => {
            warn!("No central store configured, offline queue will not be replayed");
            None
        }
    };

    info!(addr = %server.local_addr(), "Tavola hub ready");

    shutdown_signal().await;

    if let Some(responder) = responder {
        if let Err(e) = responder.stop() {
            warn!(?e, "mDNS responder did not stop cleanly");
        }
    }

    if let Some((handle, task)) = reconciler {
        handle.shutdown().await?;
        let _ = task.await;
    }

    hub.shutdown().await?;
    server.shutdown().await?;
    db.close().await;

    info!("Hub shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
