//! # Tavola Configuration
//!
//! Configuration for the hub process, discovery and the offline reconciler.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TAVOLA_HUB_PORT=3001                                               │
//! │     TAVOLA_CENTRAL_URL=https://central.example.com/api                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tavola-hub/tavola.toml (Linux)                           │
//! │     ~/Library/Application Support/com.tavola.hub/tavola.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     port 3001, auto-generated device id, 15 s discovery budget         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Front Register"
//!
//! [hub]
//! port = 3001
//! queue_capacity = 64
//!
//! [discovery]
//! mdns_enabled = true
//! max_concurrent_probes = 32
//!
//! [offline]
//! database_path = "tavola-offline.db"
//! central_url = "https://central.example.com/api"
//! retention_days = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tavola_core::{DEFAULT_HUB_PORT, HUB_SERVICE_TYPE};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of the machine running the hub (or the handheld running discovery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier. Generated on first run if not provided.
    pub id: String,

    /// Human-readable name, also used as the mDNS instance name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Tavola Hub".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Hub Server Settings
// =============================================================================

/// Realtime hub settings.
///
/// ## Liveness Timers
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                                                                         │
/// │  heartbeat_interval_secs (30)   loop publishes `heartbeat` to ALL       │
/// │  ping_interval_secs      (54)   per-socket WebSocket ping               │
/// │  idle_timeout_secs       (60)   no frame read for this long → close     │
/// │                                                                         │
/// │  ping < idle so a healthy peer's pong always lands inside the window.  │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port for HTTP + WebSocket. 0 picks an ephemeral port.
    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Outbound frames buffered per connection before it is evicted.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Largest accepted inbound frame, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_hub_port() -> u16 {
    DEFAULT_HUB_PORT
}

fn default_queue_capacity() -> usize {
    64
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    54
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            bind_addr: default_bind_addr(),
            port: default_hub_port(),
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            idle_timeout_secs: default_idle_timeout(),
            ping_interval_secs: default_ping_interval(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl HubSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

// =============================================================================
// Discovery Settings
// =============================================================================

/// Hub discovery settings (responder and client side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Advertise (hub) and browse (client) over mDNS.
    #[serde(default = "default_true")]
    pub mdns_enabled: bool,

    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Budget for the whole cascade.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_secs: u64,

    /// Budget for the /24 sweep alone.
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_secs: u64,

    /// Per-address liveness probe timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// How long the multicast browse waits for a resolution.
    #[serde(default = "default_mdns_timeout")]
    pub mdns_timeout_secs: u64,

    /// Sweep probes in flight at once.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Where the last verified hub address is kept. Defaults to the
    /// platform cache directory.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_service_type() -> String {
    HUB_SERVICE_TYPE.to_string()
}

fn default_overall_timeout() -> u64 {
    15
}

fn default_sweep_timeout() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    300
}

fn default_mdns_timeout() -> u64 {
    3
}

fn default_max_concurrent_probes() -> usize {
    32
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            mdns_enabled: true,
            service_type: default_service_type(),
            overall_timeout_secs: default_overall_timeout(),
            sweep_timeout_secs: default_sweep_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            mdns_timeout_secs: default_mdns_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
            cache_path: None,
        }
    }
}

impl DiscoverySettings {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn mdns_timeout(&self) -> Duration {
        Duration::from_secs(self.mdns_timeout_secs)
    }
}

// =============================================================================
// Offline Queue Settings
// =============================================================================

/// Offline queue and reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSettings {
    /// SQLite file holding the offline queue.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Base URL of the central store. The reconciler stays off when unset.
    #[serde(default)]
    pub central_url: Option<String>,

    /// Interval between reconciliation cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Central store request timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Synced entries and sync-log rows older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "tavola", "hub")
        .map(|dirs| dirs.data_dir().join("offline.db"))
        .unwrap_or_else(|| PathBuf::from("tavola-offline.db"))
}

fn default_poll_interval() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_purge_interval() -> u64 {
    24 * 60 * 60
}

impl Default for OfflineSettings {
    fn default() -> Self {
        OfflineSettings {
            database_path: default_database_path(),
            central_url: None,
            poll_interval_secs: default_poll_interval(),
            connect_timeout_secs: default_connect_timeout(),
            retention_days: default_retention_days(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl OfflineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

// =============================================================================
// Hub Client Settings
// =============================================================================

/// Settings for handheld devices connecting to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Fixed hub URL (`ws://host:port/ws`). Discovery runs when unset.
    #[serde(default)]
    pub hub_url: Option<String>,

    /// Maximum reconnection attempts before giving up. 0 retries forever.
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            hub_url: None,
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete Tavola configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TavolaConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub offline: OfflineSettings,

    #[serde(default)]
    pub client: ClientSettings,
}

impl TavolaConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tavola.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if self.hub.queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "hub.queue_capacity must be greater than 0".into(),
            ));
        }

        for (name, secs) in [
            ("hub.heartbeat_interval_secs", self.hub.heartbeat_interval_secs),
            ("hub.ping_interval_secs", self.hub.ping_interval_secs),
            ("hub.idle_timeout_secs", self.hub.idle_timeout_secs),
            ("offline.poll_interval_secs", self.offline.poll_interval_secs),
            ("offline.purge_interval_secs", self.offline.purge_interval_secs),
        ] {
            if secs == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.hub.ping_interval_secs >= self.hub.idle_timeout_secs {
            return Err(SyncError::InvalidConfig(format!(
                "hub.ping_interval_secs ({}) must be below hub.idle_timeout_secs ({})",
                self.hub.ping_interval_secs, self.hub.idle_timeout_secs
            )));
        }

        if self.discovery.max_concurrent_probes == 0 {
            return Err(SyncError::InvalidConfig(
                "discovery.max_concurrent_probes must be greater than 0".into(),
            ));
        }

        if self.discovery.sweep_timeout_secs > self.discovery.overall_timeout_secs {
            return Err(SyncError::InvalidConfig(
                "discovery.sweep_timeout_secs cannot exceed overall_timeout_secs".into(),
            ));
        }

        if let Some(ref url) = self.offline.central_url {
            let parsed = url::Url::parse(url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "Central URL must start with http:// or https://, got: {}",
                    url
                )));
            }
        }

        if let Some(ref url) = self.client.hub_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Hub URL must start with ws:// or wss://, got: {}",
                    url
                )));
            }
        }

        if self.offline.retention_days == 0 {
            return Err(SyncError::InvalidConfig(
                "offline.retention_days must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TAVOLA_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("TAVOLA_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(addr) = std::env::var("TAVOLA_BIND_ADDR") {
            self.hub.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("TAVOLA_HUB_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding hub port from environment");
                    self.hub.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring invalid TAVOLA_HUB_PORT"),
            }
        }

        if let Ok(flag) = std::env::var("TAVOLA_MDNS") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "on" => self.discovery.mdns_enabled = true,
                "0" | "false" | "off" => self.discovery.mdns_enabled = false,
                _ => warn!(value = %flag, "Ignoring invalid TAVOLA_MDNS"),
            }
        }

        if let Ok(path) = std::env::var("TAVOLA_DATABASE_PATH") {
            self.offline.database_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("TAVOLA_CENTRAL_URL") {
            debug!(url = %url, "Overriding central URL from environment");
            self.offline.central_url = Some(url);
        }

        if let Ok(url) = std::env::var("TAVOLA_HUB_URL") {
            self.client.hub_url = Some(url);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tavola", "hub")
            .map(|dirs| dirs.config_dir().join("tavola.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn central_url(&self) -> Option<&str> {
        self.offline.central_url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TavolaConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.hub.port, 3001);
        assert_eq!(config.discovery.max_concurrent_probes, 32);
        assert_eq!(config.discovery.overall_timeout(), Duration::from_secs(15));
        assert_eq!(config.discovery.probe_timeout(), Duration::from_millis(300));
        assert_eq!(config.offline.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TavolaConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "test".to_string();
        config.offline.central_url = Some("ftp://central".to_string());
        assert!(config.validate().unwrap_err().is_config_error());

        config.offline.central_url = Some("https://central.example.com/api".to_string());
        assert!(config.validate().is_ok());

        config.hub.ping_interval_secs = 60;
        assert!(config.validate().is_err());

        config.hub.ping_interval_secs = 54;
        config.client.hub_url = Some("http://10.0.0.5:3001/ws".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let zeroed: [(&str, fn(&mut TavolaConfig)); 5] = [
            ("hub.heartbeat_interval_secs", |c| c.hub.heartbeat_interval_secs = 0),
            ("hub.ping_interval_secs", |c| c.hub.ping_interval_secs = 0),
            ("hub.idle_timeout_secs", |c| c.hub.idle_timeout_secs = 0),
            ("offline.poll_interval_secs", |c| c.offline.poll_interval_secs = 0),
            ("offline.purge_interval_secs", |c| c.offline.purge_interval_secs = 0),
        ];

        for (name, zero) in zeroed {
            let mut config = TavolaConfig::default();
            zero(&mut config);
            match config.validate() {
                Err(SyncError::InvalidConfig(message)) => assert!(message.contains(name)),
                other => panic!("{} = 0 accepted: {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_interval_helpers_never_zero() {
        let mut config = TavolaConfig::default();
        config.hub.heartbeat_interval_secs = 0;
        config.hub.ping_interval_secs = 0;
        config.offline.poll_interval_secs = 0;
        config.offline.purge_interval_secs = 0;

        assert_eq!(config.hub.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.hub.ping_interval(), Duration::from_secs(1));
        assert_eq!(config.offline.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.offline.purge_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TavolaConfig = toml::from_str(
            r#"
            [device]
            id = "register-1"

            [hub]
            port = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.device.id, "register-1");
        assert_eq!(config.device.name, "Tavola Hub");
        assert_eq!(config.hub.port, 4000);
        assert_eq!(config.hub.queue_capacity, 64);
        assert_eq!(config.discovery.service_type, HUB_SERVICE_TYPE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tavola.toml");

        let mut config = TavolaConfig::default();
        config.device.id = "kitchen-pc".to_string();
        config.hub.port = 3100;
        config.save(Some(path.clone())).unwrap();

        let loaded = TavolaConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.hub.port, 3100);
        assert_eq!(loaded.offline.retention_days, 30);
    }
}
