//! # Hub Address Cache
//!
//! The last hub address a handheld verified, kept as a small TOML file so the
//! next session can try it before sweeping the network.
//!
//! ```toml
//! addr = "192.168.1.100:3001"
//! verified_at = "2026-03-02T18:04:11Z"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// A persisted hub address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHub {
    pub addr: SocketAddr,
    pub verified_at: DateTime<Utc>,
}

/// File-backed record of the last verified hub.
#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    path: PathBuf,
}

impl DiscoveryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DiscoveryCache { path: path.into() }
    }

    /// `<platform cache dir>/last-hub.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tavola", "hub")
            .map(|dirs| dirs.cache_dir().join("last-hub.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached record. A missing or unreadable file reads as empty.
    pub fn read(&self) -> Option<CachedHub> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?self.path, ?e, "Failed to read hub cache");
                return None;
            }
        };

        match toml::from_str(&contents) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(path = ?self.path, ?e, "Ignoring corrupt hub cache");
                None
            }
        }
    }

    /// Records `addr` as verified now.
    pub fn write(&self, addr: SocketAddr) -> SyncResult<CachedHub> {
        let record = CachedHub {
            addr,
            verified_at: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Internal(format!("Cache dir: {}", e)))?;
        }

        let contents = toml::to_string(&record)?;
        std::fs::write(&self.path, contents)
            .map_err(|e| SyncError::Internal(format!("Cache write: {}", e)))?;

        debug!(addr = %addr, path = ?self.path, "Hub address cached");
        Ok(record)
    }

    /// Forgets the cached address. Clearing an empty cache succeeds.
    pub fn clear(&self) -> SyncResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Internal(format!("Cache clear: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiscoveryCache::new(dir.path().join("sub").join("last-hub.toml"));
        assert!(cache.read().is_none());

        let addr: SocketAddr = "192.168.1.100:3001".parse().unwrap();
        let written = cache.write(addr).unwrap();

        assert_eq!(cache.read(), Some(written));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiscoveryCache::new(dir.path().join("last-hub.toml"));

        cache.write("10.0.0.1:3001".parse().unwrap()).unwrap();
        cache.clear().unwrap();
        cache.clear().unwrap();
        assert!(cache.read().is_none());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-hub.toml");
        std::fs::write(&path, "addr = 12").unwrap();

        assert!(DiscoveryCache::new(path).read().is_none());
    }
}
