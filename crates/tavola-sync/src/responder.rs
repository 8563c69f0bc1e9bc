//! # Discovery Responder
//!
//! Advertises the running hub over mDNS so handhelds can find it without
//! configuration.
//!
//! ## Service Record
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  instance   Front-Register._tavola-hub._tcp.local.                      │
//! │  type       _tavola-hub._tcp.local.                                     │
//! │  host       Front-Register.local.                                       │
//! │  port       3001                                                        │
//! │  TXT        version=0.1.0  path=/ws  health=/health                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multicast is often filtered on restaurant Wi-Fi. A failed registration is
//! logged and the hub keeps serving; clients fall back to probing.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// A registered mDNS service record and the daemon announcing it.
pub struct Responder {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Responder {
    /// Registers the hub under `service_type`.
    pub fn start(service_type: &str, instance: &str, port: u16) -> SyncResult<Self> {
        let instance = instance_label(instance);
        let host = format!("{}.local.", instance);

        let mut properties = HashMap::new();
        properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        properties.insert("path".to_string(), "/ws".to_string());
        properties.insert("health".to_string(), "/health".to_string());

        let daemon = ServiceDaemon::new()
            .map_err(|e| SyncError::RegistrationFailed(format!("mDNS daemon: {}", e)))?;

        let service = ServiceInfo::new(service_type, &instance, &host, "", port, Some(properties))
            .map_err(|e| SyncError::RegistrationFailed(e.to_string()))?
            .enable_addr_auto();
        let fullname = service.get_fullname().to_string();

        if let Err(e) = daemon.register(service) {
            let _ = daemon.shutdown();
            return Err(SyncError::RegistrationFailed(e.to_string()));
        }

        info!(service = %fullname, port, "mDNS service registered");
        Ok(Responder { daemon, fullname })
    }

    /// Like [`Responder::start`], but a failure only degrades discovery.
    pub fn advertise(service_type: &str, instance: &str, port: u16) -> Option<Self> {
        match Self::start(service_type, instance, port) {
            Ok(responder) => Some(responder),
            Err(e) => {
                warn!(error = %e, "mDNS registration failed, running without advertisement");
                None
            }
        }
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Unregisters the record and stops the daemon.
    pub fn stop(self) -> SyncResult<()> {
        match self.daemon.unregister(&self.fullname) {
            Ok(_) => debug!(service = %self.fullname, "mDNS service unregistered"),
            Err(e) => warn!(service = %self.fullname, error = %e, "mDNS unregister failed"),
        }
        self.daemon.shutdown()?;
        info!("mDNS responder stopped");
        Ok(())
    }
}

/// DNS-safe instance label: letters, digits and hyphens only.
fn instance_label(name: &str) -> String {
    let label: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "tavola-hub".to_string()
    } else {
        label.chars().take(63).collect()
    }
}
