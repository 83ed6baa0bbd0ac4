//! Cached reachability check.
//!
//! A probe runs an ordered list of methods and stops at the first one that
//! succeeds (DNS, then HTTP, then raw TCP by default). The result is cached
//! for `check_interval`; only a forced check or an expired cache probes
//! again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ConnectivityConfig;

/// One way of deciding whether the network is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Short label for logs and metrics ("dns", "http", "tcp")
    fn method(&self) -> &'static str;

    async fn probe(&self) -> bool;
}

/// Resolves a well-known host name.
pub struct DnsProbe {
    host: String,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for DnsProbe {
    fn method(&self) -> &'static str {
        "dns"
    }

    async fn probe(&self) -> bool {
        match timeout(self.timeout, lookup_host((self.host.as_str(), 80))).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!(host = %self.host, error = %e, "DNS probe failed");
                false
            }
            Err(_) => false,
        }
    }
}

/// GETs a well-known URL and expects a 2xx.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    fn method(&self) -> &'static str {
        "http"
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "HTTP probe failed");
                false
            }
        }
    }
}

/// Opens and drops a TCP connection.
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    fn method(&self) -> &'static str {
        "tcp"
    }

    async fn probe(&self) -> bool {
        matches!(
            timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await,
            Ok(Ok(_))
        )
    }
}

/// Last probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySample {
    pub online: bool,
    /// `None` until the first probe
    pub checked_at: Option<Instant>,
    pub consecutive_failures: u64,
}

pub struct ConnectivityMonitor {
    probes: Vec<Box<dyn ConnectivityProbe>>,
    check_interval: Duration,
    online: AtomicBool,
    consecutive_failures: AtomicU64,
    last_check: SyncMutex<Option<Instant>>,
    /// Held while probing so concurrent callers share one probe
    checking: Mutex<()>,
}

impl ConnectivityMonitor {
    /// DNS, HTTP and TCP probes built from configuration.
    pub fn new(config: &ConnectivityConfig) -> Result<Self, reqwest::Error> {
        let probe_timeout = config.probe_timeout();
        let probes: Vec<Box<dyn ConnectivityProbe>> = vec![
            Box::new(DnsProbe::new(&config.dns_host, probe_timeout)),
            Box::new(HttpProbe::new(&config.http_url, probe_timeout)?),
            Box::new(TcpProbe::new(&config.tcp_host, config.tcp_port, probe_timeout)),
        ];
        Ok(Self::with_probes(probes, config.check_interval()))
    }

    pub fn with_probes(probes: Vec<Box<dyn ConnectivityProbe>>, check_interval: Duration) -> Self {
        Self {
            probes,
            check_interval,
            online: AtomicBool::new(false),
            consecutive_failures: AtomicU64::new(0),
            last_check: SyncMutex::new(None),
            checking: Mutex::new(()),
        }
    }

    fn is_fresh(&self) -> bool {
        self.last_check
            .lock()
            .is_some_and(|at| at.elapsed() < self.check_interval)
    }

    /// Whether the network is reachable, from cache unless `force_check` or
    /// the cache has expired.
    pub async fn is_online(&self, force_check: bool) -> bool {
        if !force_check && self.is_fresh() {
            return self.online.load(Ordering::Acquire);
        }

        let _guard = self.checking.lock().await;
        // Someone else may have probed while we waited.
        if !force_check && self.is_fresh() {
            return self.online.load(Ordering::Acquire);
        }

        let online = self.run_probes().await;
        self.record(online);
        online
    }

    async fn run_probes(&self) -> bool {
        for probe in &self.probes {
            let ok = probe.probe().await;
            crate::metrics::record_connectivity_probe(probe.method(), ok);
            if ok {
                debug!(method = probe.method(), "Connectivity probe succeeded");
                return true;
            }
        }
        false
    }

    fn record(&self, online: bool) {
        *self.last_check.lock() = Some(Instant::now());
        let was_online = self.online.swap(online, Ordering::AcqRel);

        if online {
            let streak = self.consecutive_failures.swap(0, Ordering::AcqRel);
            if streak > 0 {
                info!(after_failures = streak, "Network connectivity restored");
            }
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            if was_online || failures == 1 {
                warn!(failures, "Network unreachable");
            } else {
                debug!(failures, "Network still unreachable");
            }
        }
        crate::metrics::set_online(online);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn sample(&self) -> ConnectivitySample {
        ConnectivitySample {
            online: self.online.load(Ordering::Acquire),
            checked_at: *self.last_check.lock(),
            consecutive_failures: self.consecutive_failures(),
        }
    }

    /// Poll with forced checks until online or `wait` has elapsed.
    pub async fn wait_for_connection(&self, wait: Duration, retry_interval: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.is_online(true).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(retry_interval.min(deadline - now)).await;
        }
    }
}
