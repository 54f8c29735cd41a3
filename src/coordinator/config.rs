//! Coordinator Configuration
//!
//! Builder-style parameter surface for embedding the coordinator. Timings
//! default to values suitable for a LAN cluster; tests shrink them to keep
//! scenarios fast.

use std::path::PathBuf;
use std::time::Duration;

/// A one-off setup directive replayed to every newly joined worker
/// (e.g., fetch a dependency before accepting work).
#[derive(Debug, Clone)]
pub struct InitDirective {
    /// Registry handler name to invoke on the worker.
    pub directive: String,
    /// Opaque payload for the handler.
    pub payload: Vec<u8>,
}

/// Periodic cluster-summary sink.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub path: PathBuf,
    pub frequency: Duration,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the coordinator listens on for worker connections.
    pub listen_addr: String,
    /// Silence interval after which a proxy starts pinging its worker.
    pub ping_frequency: Duration,
    /// Connection timeout; a proxy is declared failed after twice this much
    /// silence.
    pub ping_timeout: Duration,
    /// Cadence of the failure-sweep/dispatch loop.
    pub scheduler_tick: Duration,
    /// Bounded wait of each proxy loop when idle.
    pub proxy_tick: Duration,
    /// Optional periodic summary snapshot.
    pub summary: Option<SummaryConfig>,
    /// Directives replayed to each worker on join, in order.
    pub init_directives: Vec<InitDirective>,
}

impl CoordinatorConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ping_frequency: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            scheduler_tick: Duration::from_millis(100),
            proxy_tick: Duration::from_millis(100),
            summary: None,
            init_directives: Vec::new(),
        }
    }

    pub fn ping_frequency(mut self, ping_frequency: Duration) -> Self {
        self.ping_frequency = ping_frequency;
        self
    }

    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.ping_timeout = ping_timeout;
        self
    }

    pub fn scheduler_tick(mut self, scheduler_tick: Duration) -> Self {
        self.scheduler_tick = scheduler_tick;
        self
    }

    pub fn proxy_tick(mut self, proxy_tick: Duration) -> Self {
        self.proxy_tick = proxy_tick;
        self
    }

    pub fn summary(mut self, path: impl Into<PathBuf>, frequency: Duration) -> Self {
        self.summary = Some(SummaryConfig {
            path: path.into(),
            frequency,
        });
        self
    }

    pub fn init_directive(mut self, directive: impl Into<String>, payload: Vec<u8>) -> Self {
        self.init_directives.push(InitDirective {
            directive: directive.into(),
            payload,
        });
        self
    }
}
