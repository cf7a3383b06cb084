//! Library-side configuration for probes and whole runs
//!
//! The binary fills these from flags and environment variables; tests and
//! embedders construct them directly.

use crate::proxy::models::StageKind;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of in-flight probes
pub const DEFAULT_CONCURRENCY: usize = 300;

/// Captive-portal endpoint requested through each candidate
pub const DEFAULT_DIRECT_URL: &str = "http://detectportal.firefox.com/success.txt";

/// Verification service; `{ip}` and `{port}` are substituted per candidate
pub const DEFAULT_VERIFY_URL: &str = "https://lodd.vercel.app/{ip}:{port}";

/// Host the verification service should reach through the candidate
pub const DEFAULT_VERIFY_HOST: &str = "speed.cloudflare.com";

pub const DEFAULT_INPUT: &str = "autoscan/rawProxyList.txt";
pub const DEFAULT_ACTIVE_OUTPUT: &str = "autoscan/active.txt";
pub const DEFAULT_DEAD_OUTPUT: &str = "autoscan/dead.txt";

/// Configuration for the probe policy and its stages
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Deadline for each network attempt
    pub timeout: Duration,
    /// URL fetched through the candidate by the direct stage
    pub direct_url: String,
    /// Verification endpoint, either a `{ip}`/`{port}` template or a base URL
    pub verify_url: String,
    /// Value of the `host` query parameter sent to the verification endpoint
    pub verify_host: String,
    /// Stages to run, in fallback order
    pub stages: Vec<StageKind>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            direct_url: DEFAULT_DIRECT_URL.to_string(),
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            verify_host: DEFAULT_VERIFY_HOST.to_string(),
            stages: vec![StageKind::Direct, StageKind::Verify],
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_direct_url(mut self, url: impl Into<String>) -> Self {
        self.direct_url = url.into();
        self
    }

    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = url.into();
        self
    }

    pub fn with_verify_host(mut self, host: impl Into<String>) -> Self {
        self.verify_host = host.into();
        self
    }

    /// Replace the stage list. Repeated stages are kept only once, in first
    /// position.
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = StageKind>) -> Self {
        self.stages.clear();
        for stage in stages {
            if !self.stages.contains(&stage) {
                self.stages.push(stage);
            }
        }
        self
    }
}

/// Configuration for one sweep over a candidate list
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub active_output: PathBuf,
    pub dead_output: PathBuf,
    /// Upper bound on in-flight probes
    pub concurrency: usize,
    /// Flush outputs after this many recorded results; 0 flushes only at the end
    pub checkpoint_every: usize,
    /// MaxMind City database used to fill unknown countries
    pub mmdb_path: Option<PathBuf>,
    /// Replace the input list with the active set once the run completes
    pub promote_active: bool,
    /// Where to write the JSON run summary
    pub summary_path: Option<PathBuf>,
    pub probe: ProbeConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            active_output: PathBuf::from(DEFAULT_ACTIVE_OUTPUT),
            dead_output: PathBuf::from(DEFAULT_DEAD_OUTPUT),
            concurrency: DEFAULT_CONCURRENCY,
            checkpoint_every: 0,
            mmdb_path: None,
            promote_active: false,
            summary_path: None,
            probe: ProbeConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = path.into();
        self
    }

    pub fn with_outputs(mut self, active: impl Into<PathBuf>, dead: impl Into<PathBuf>) -> Self {
        self.active_output = active.into();
        self.dead_output = dead.into();
        self
    }

    /// Values below one are raised to one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn with_mmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mmdb_path = Some(path.into());
        self
    }

    pub fn with_promote_active(mut self, promote: bool) -> Self {
        self.promote_active = promote;
        self
    }

    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }
}
