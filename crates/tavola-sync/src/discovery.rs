//! # Hub Discovery
//!
//! Finds the hub from a handheld on an unknown local network.
//!
//! ## Discovery Cascade
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 discover()  ─ overall budget 15 s ─                     │
//! │                                                                         │
//! │  local IP in 10.0.2.0/24? ──yes──▶ probe 10.0.2.2 only, return result   │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  1. mDNS browse _tavola-hub._tcp.local. (3 s) ─▶ probe each answer      │
//! │        ▼ miss                                                           │
//! │  2. cached address ─────────────────────────────▶ probe (stale → skip) │
//! │        ▼ miss                                                           │
//! │  3. heuristics: 192.168.1.{1,100,2,10,254} 192.168.0.{1,100}            │
//! │                 10.0.0.{1,100}  own /24 .{1,100,2,10,254}               │
//! │        ▼ miss                                                           │
//! │  4. sweep own /24 hosts 1..=254                                         │
//! │       ┌──────────────────────────────────────────────┐                  │
//! │       │ Semaphore(32) ─▶ probe ─▶ first hit cancels   │  budget 10 s    │
//! │       │ CancellationToken shared by every probe task │                  │
//! │       └──────────────────────────────────────────────┘                  │
//! │                                                                         │
//! │  Any hit is written to the cache. Probe = GET /health, 300 ms, 2xx.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::DiscoveryCache;
use crate::config::DiscoverySettings;
use crate::error::{SyncError, SyncResult};

/// Android emulator guests live in 10.0.2.0/24 and reach the host at .2.
const EMULATOR_HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);

/// Conventional router/server addresses tried before sweeping.
const CONVENTIONAL_HOSTS: [Ipv4Addr; 9] = [
    Ipv4Addr::new(192, 168, 1, 1),
    Ipv4Addr::new(192, 168, 1, 100),
    Ipv4Addr::new(192, 168, 1, 2),
    Ipv4Addr::new(192, 168, 1, 10),
    Ipv4Addr::new(192, 168, 1, 254),
    Ipv4Addr::new(192, 168, 0, 1),
    Ipv4Addr::new(192, 168, 0, 100),
    Ipv4Addr::new(10, 0, 0, 1),
    Ipv4Addr::new(10, 0, 0, 100),
];

/// Host suffixes tried inside the device's own /24.
const LIKELY_SUFFIXES: [u8; 5] = [1, 100, 2, 10, 254];

// =============================================================================
// Pluggable Strategies
// =============================================================================

/// Liveness check for a candidate hub address.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: SocketAddr) -> bool;
}

/// Multicast lookup of advertised hubs.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Addresses resolved within `wait`.
    async fn browse(&self, wait: Duration) -> SyncResult<Vec<SocketAddr>>;
}

/// Source of the device's own IPv4 address.
pub trait NetworkInfo: Send + Sync {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// `GET http://<addr>/health`; any 2xx counts.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(probe_timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .connect_timeout(probe_timeout)
            .no_proxy()
            .build()?;
        Ok(HttpProber { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, addr: SocketAddr) -> bool {
        let url = format!("http://{}/health", addr);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Browses with an `mdns-sd` daemon that lives for one lookup.
pub struct MdnsBrowser {
    service_type: String,
}

impl MdnsBrowser {
    pub fn new(service_type: impl Into<String>) -> Self {
        MdnsBrowser {
            service_type: service_type.into(),
        }
    }
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn browse(&self, wait: Duration) -> SyncResult<Vec<SocketAddr>> {
        let service_type = self.service_type.clone();

        // mdns-sd hands back a blocking channel; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || -> SyncResult<Vec<SocketAddr>> {
            let daemon = ServiceDaemon::new()?;
            let events = daemon.browse(&service_type)?;
            let deadline = std::time::Instant::now() + wait;
            let mut found = Vec::new();

            while found.is_empty() {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match events.recv_timeout(remaining) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let port = info.get_port();
                        for ip in info.get_addresses() {
                            // Normalizes across mdns-sd's v4-only and dual-stack address sets.
                            if let Ok(ip) = ip.to_string().parse::<IpAddr>() {
                                debug!(service = %info.get_fullname(), %ip, port, "mDNS resolved");
                                found.push(SocketAddr::new(ip, port));
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }

            let _ = daemon.stop_browse(&service_type);
            let _ = daemon.shutdown();
            Ok(found)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("mDNS browse task failed: {}", e)))?
    }
}

/// Reads the outbound interface address by connecting a UDP socket.
/// Nothing is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetwork;

impl NetworkInfo for SystemNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
            _ => None,
        }
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// The discovery client.
pub struct Discovery {
    settings: DiscoverySettings,
    port: u16,
    prober: Arc<dyn Prober>,
    browser: Option<Arc<dyn ServiceBrowser>>,
    network: Arc<dyn NetworkInfo>,
    cache: Option<DiscoveryCache>,
}

impl Discovery {
    /// Builds a client with the network-backed strategies.
    pub fn new(settings: DiscoverySettings, port: u16) -> SyncResult<Self> {
        let prober = HttpProber::new(settings.probe_timeout())?;
        let browser: Option<Arc<dyn ServiceBrowser>> = if settings.mdns_enabled {
            Some(Arc::new(MdnsBrowser::new(settings.service_type.clone())))
        } else {
            None
        };
        let cache = settings
            .cache_path
            .clone()
            .or_else(DiscoveryCache::default_path)
            .map(DiscoveryCache::new);

        Ok(Discovery {
            settings,
            port,
            prober: Arc::new(prober),
            browser,
            network: Arc::new(SystemNetwork),
            cache,
        })
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_browser(mut self, browser: Option<Arc<dyn ServiceBrowser>>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = network;
        self
    }

    pub fn with_cache(mut self, cache: Option<DiscoveryCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Runs the cascade under the overall budget.
    pub async fn discover(&self) -> Option<SocketAddr> {
        let budget = self.settings.overall_timeout();
        match timeout(budget, self.cascade()).await {
            Ok(Some(addr)) => {
                info!(addr = %addr, "Hub discovered");
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.write(addr) {
                        warn!(error = %e, "Failed to cache hub address");
                    }
                }
                Some(addr)
            }
            Ok(None) => {
                info!("No hub found");
                None
            }
            Err(_) => {
                warn!(secs = budget.as_secs(), "Discovery timed out");
                None
            }
        }
    }

    /// [`Discovery::discover`] for callers that want an error.
    pub async fn discover_or_err(&self) -> SyncResult<SocketAddr> {
        self.discover().await.ok_or(SyncError::NoServerFound)
    }

    async fn cascade(&self) -> Option<SocketAddr> {
        let local = self.network.local_ipv4();
        debug!(?local, "Starting discovery");

        if let Some(ip) = local {
            if is_emulator(ip) {
                let host = SocketAddr::new(IpAddr::V4(EMULATOR_HOST), self.port);
                debug!("Emulator network detected, probing host gateway only");
                return self.prober.probe(host).await.then_some(host);
            }
        }

        if let Some(addr) = self.try_mdns().await {
            return Some(addr);
        }

        if let Some(addr) = self.try_cache().await {
            return Some(addr);
        }

        if let Some(addr) = self.try_heuristics(local).await {
            return Some(addr);
        }

        match local {
            Some(ip) => self.sweep(ip).await,
            None => {
                debug!("No local IPv4 address, skipping sweep");
                None
            }
        }
    }

    async fn try_mdns(&self) -> Option<SocketAddr> {
        let browser = self.browser.as_ref()?;

        let answers = match browser.browse(self.settings.mdns_timeout()).await {
            Ok(answers) => answers,
            Err(e) => {
                debug!(error = %e, "mDNS browse failed");
                return None;
            }
        };

        for addr in answers {
            if self.prober.probe(addr).await {
                return Some(addr);
            }
            debug!(addr = %addr, "mDNS answer failed liveness probe");
        }
        None
    }

    async fn try_cache(&self) -> Option<SocketAddr> {
        let cached = self.cache.as_ref()?.read()?;
        if self.prober.probe(cached.addr).await {
            return Some(cached.addr);
        }
        debug!(addr = %cached.addr, verified_at = %cached.verified_at, "Cached hub is stale");
        None
    }

    async fn try_heuristics(&self, local: Option<Ipv4Addr>) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = heuristic_hosts(local)
            .into_iter()
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), self.port))
            .collect();

        let results = join_all(candidates.iter().map(|addr| self.prober.probe(*addr))).await;

        // First hit in priority order, not completion order.
        candidates
            .into_iter()
            .zip(results)
            .find_map(|(addr, alive)| alive.then_some(addr))
    }

    /// Probes every host of the local /24 with bounded parallelism.
    async fn sweep(&self, local: Ipv4Addr) -> Option<SocketAddr> {
        let [a, b, c, _] = local.octets();
        let gate = Arc::new(Semaphore::new(self.settings.max_concurrent_probes));
        let cancel = CancellationToken::new();
        // Dropping this future (outer deadline) stops every spawned task.
        let _guard = cancel.clone().drop_guard();
        let (found_tx, mut found_rx) = mpsc::channel::<SocketAddr>(1);

        debug!(subnet = %format!("{}.{}.{}.0/24", a, b, c), "Sweeping subnet");

        for host in 1..=254u8 {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, host)), self.port);
            let gate = gate.clone();
            let cancel = cancel.clone();
            let prober = self.prober.clone();
            let found_tx = found_tx.clone();

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = gate.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let alive = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    alive = prober.probe(addr) => alive,
                };

                if alive {
                    // Capacity 1: later hits are discarded.
                    let _ = found_tx.try_send(addr);
                }
            });
        }
        drop(found_tx);

        let found = match timeout(self.settings.sweep_timeout(), found_rx.recv()).await {
            Ok(found) => found,
            Err(_) => {
                debug!("Sweep timed out");
                None
            }
        };
        cancel.cancel();
        found
    }
}

fn is_emulator(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    (a, b, c) == (10, 0, 2)
}

/// Conventional addresses first, then likely hosts in the device's /24,
/// without duplicates.
fn heuristic_hosts(local: Option<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut hosts: Vec<Ipv4Addr> = CONVENTIONAL_HOSTS.to_vec();

    if let Some(ip) = local {
        let [a, b, c, _] = ip.octets();
        for suffix in LIKELY_SUFFIXES {
            let candidate = Ipv4Addr::new(a, b, c, suffix);
            if !hosts.contains(&candidate) {
                hosts.push(candidate);
            }
        }
    }

    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Answers true for a fixed set of addresses.
    struct FakeProber {
        alive: HashSet<SocketAddr>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        probed: Mutex<Vec<SocketAddr>>,
    }

    impl FakeProber {
        fn new(alive: &[&str]) -> Self {
            FakeProber {
                alive: alive.iter().map(|a| a.parse().unwrap()).collect(),
                delay: Duration::from_millis(5),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, addr: SocketAddr) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.probed.lock().unwrap().push(addr);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.alive.contains(&addr)
        }
    }

    struct FixedNetwork(Option<Ipv4Addr>);

    impl NetworkInfo for FixedNetwork {
        fn local_ipv4(&self) -> Option<Ipv4Addr> {
            self.0
        }
    }

    struct FixedBrowser(Vec<SocketAddr>);

    #[async_trait]
    impl ServiceBrowser for FixedBrowser {
        async fn browse(&self, _wait: Duration) -> SyncResult<Vec<SocketAddr>> {
            Ok(self.0.clone())
        }
    }

    fn discovery(prober: Arc<FakeProber>, local: &str, cache: &DiscoveryCache) -> Discovery {
        let settings = DiscoverySettings {
            mdns_enabled: false,
            ..DiscoverySettings::default()
        };
        Discovery::new(settings, 3001)
            .unwrap()
            .with_prober(prober)
            .with_browser(None)
            .with_network(Arc::new(FixedNetwork(Some(local.parse().unwrap()))))
            .with_cache(Some(cache.clone()))
    }

    fn temp_cache() -> (tempfile::TempDir, DiscoveryCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiscoveryCache::new(dir.path().join("last-hub.toml"));
        (dir, cache)
    }

    #[tokio::test]
    async fn test_sweep_only_hub_is_found_and_cached() {
        let (_dir, cache) = temp_cache();
        let prober = Arc::new(FakeProber::new(&["192.168.77.123:3001"]));
        let client = discovery(prober, "192.168.77.50", &cache);

        let started = Instant::now();
        let found = client.discover().await;

        assert_eq!(found, Some("192.168.77.123:3001".parse().unwrap()));
        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(cache.read().unwrap().addr, found.unwrap());
    }

    #[tokio::test]
    async fn test_stale_cache_is_skipped() {
        let (_dir, cache) = temp_cache();
        cache.write("10.9.9.9:3001".parse().unwrap()).unwrap();

        let prober = Arc::new(FakeProber::new(&["172.16.4.200:3001"]));
        let client = discovery(prober.clone(), "172.16.4.7", &cache);

        let found = client.discover().await;

        assert_eq!(found, Some("172.16.4.200:3001".parse().unwrap()));
        assert!(prober
            .probed
            .lock()
            .unwrap()
            .contains(&"10.9.9.9:3001".parse().unwrap()));
        assert_eq!(cache.read().unwrap().addr, found.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_cache_short_circuits() {
        let (_dir, cache) = temp_cache();
        cache.write("172.16.4.9:3001".parse().unwrap()).unwrap();

        let prober = Arc::new(FakeProber::new(&["172.16.4.9:3001"]));
        let client = discovery(prober.clone(), "172.16.4.7", &cache);

        assert_eq!(client.discover().await, Some("172.16.4.9:3001".parse().unwrap()));
        assert_eq!(prober.probed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_stays_under_probe_limit() {
        let (_dir, cache) = temp_cache();
        let mut fake = FakeProber::new(&[]);
        fake.delay = Duration::from_millis(20);
        let prober = Arc::new(fake);
        let client = discovery(prober.clone(), "192.168.50.20", &cache);

        assert_eq!(client.discover().await, None);

        let max = prober.max_in_flight.load(Ordering::SeqCst);
        assert!(max >= 1);
        assert!(max <= 32, "saw {} probes in flight", max);
        assert!(cache.read().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_stops_sweep_tasks() {
        let mut fake = FakeProber::new(&[]);
        fake.delay = Duration::from_millis(200);
        let prober = Arc::new(fake);
        let settings = DiscoverySettings {
            mdns_enabled: false,
            overall_timeout_secs: 1,
            sweep_timeout_secs: 1,
            ..DiscoverySettings::default()
        };
        let client = Discovery::new(settings, 3001)
            .unwrap()
            .with_prober(prober.clone())
            .with_browser(None)
            .with_network(Arc::new(FixedNetwork(Some(Ipv4Addr::new(192, 168, 50, 20)))))
            .with_cache(None);

        assert_eq!(client.discover().await, None);
        let at_return = prober.probed.lock().unwrap().len();
        assert!(at_return < 14 + 254, "sweep finished before the deadline");

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(prober.probed.lock().unwrap().len(), at_return);
    }

    #[tokio::test]
    async fn test_emulator_probes_host_gateway_only() {
        let (_dir, cache) = temp_cache();
        let prober = Arc::new(FakeProber::new(&["10.0.2.2:3001"]));
        let client = discovery(prober.clone(), "10.0.2.15", &cache);

        assert_eq!(client.discover().await, Some("10.0.2.2:3001".parse().unwrap()));
        assert_eq!(prober.probed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_emulator_miss_does_not_fall_through() {
        let (_dir, cache) = temp_cache();
        let prober = Arc::new(FakeProber::new(&["10.0.2.7:3001"]));
        let client = discovery(prober, "10.0.2.15", &cache);

        assert_eq!(client.discover().await, None);
    }

    #[tokio::test]
    async fn test_mdns_answer_is_verified() {
        let (_dir, cache) = temp_cache();
        let prober = Arc::new(FakeProber::new(&["192.168.3.40:3001"]));
        let client = discovery(prober, "192.168.3.8", &cache).with_browser(Some(Arc::new(
            FixedBrowser(vec![
                "192.168.3.39:3001".parse().unwrap(),
                "192.168.3.40:3001".parse().unwrap(),
            ]),
        )));

        assert_eq!(client.discover().await, Some("192.168.3.40:3001".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_heuristics_prefer_priority_order() {
        let (_dir, cache) = temp_cache();
        let prober = Arc::new(FakeProber::new(&["192.168.1.254:3001", "192.168.1.1:3001"]));
        let client = discovery(prober, "192.168.1.33", &cache);

        assert_eq!(client.discover().await, Some("192.168.1.1:3001".parse().unwrap()));
    }

    #[test]
    fn test_heuristic_hosts_dedupe_own_subnet() {
        let hosts = heuristic_hosts(Some(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(hosts.len(), 9);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));

        let hosts = heuristic_hosts(Some(Ipv4Addr::new(172, 16, 0, 5)));
        assert_eq!(hosts.len(), 14);
        assert_eq!(hosts[9], Ipv4Addr::new(172, 16, 0, 1));
    }
}
