//! # Node Configuration
//!
//! Provides [`NodeConfig`], the fully-populated, read-only configuration a
//! [`WorkerSessionActor`](crate::session_actor::WorkerSessionActor) receives
//! at construction. The session layer never re-reads configuration.
//!
//! ## Loading Order
//!
//! 1. Built-in defaults ([`NodeConfig::default`]).
//! 2. The `[node]` section of `keel.toml`, searched in:
//!    - `KEEL_CONFIG_FILE` (explicit path, skips search)
//!    - `./keel.toml`
//!    - `~/.keel/keel.toml`
//!    - `/etc/keel/keel.toml`
//! 3. `KEEL_*` environment variable overrides (highest priority).
//!
//! ## Example
//!
//! ```toml
//! [node]
//! node_id = "dn-01"
//! min_controller_version = "3.0.0"
//! heartbeat_interval_ms = 3000
//! max_heartbeat_failures = 3
//!
//! [[node.controllers]]
//! id = "ctrl-a"
//! url = "http://10.0.0.1:9870"
//!
//! [[node.controllers]]
//! id = "ctrl-b"
//! url = "http://10.0.0.2:9870"
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `KEEL_NODE_ID` | `node_id` |
//! | `KEEL_NODE_ADDR` | `node_addr` |
//! | `KEEL_MIN_CONTROLLER_VERSION` | `minimum_controller_version` |
//! | `KEEL_CONTROLLERS` | `controllers` as `id=url,id=url` |
//! | `KEEL_HEARTBEAT_INTERVAL_MS` | `heartbeat_interval` |
//! | `KEEL_RPC_TIMEOUT_MS` | `rpc_timeout` |
//! | `KEEL_MAX_HEARTBEAT_FAILURES` | `max_heartbeat_failures` |
//! | `KEEL_RETRY_INITIAL_MS` | `retry.initial_backoff` |
//! | `KEEL_RETRY_MAX_MS` | `retry.max_backoff` |
//!
//! Unset or empty variables leave the current value untouched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use keel_common::SoftwareVersion;
use serde::Deserialize;
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════════

/// Build version of this worker.
pub const NODE_SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 3;
pub const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 2;
pub const DEFAULT_NODE_ADDR: &str = "0.0.0.0:9866";

const CONFIG_SEARCH_PATHS: &[&str] = &["./keel.toml", ".keel/keel.toml", "/etc/keel/keel.toml"];

// ════════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("no [node] section found")]
    MissingSection,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// RETRY POLICY
// ════════════════════════════════════════════════════════════════════════════════

/// Bounded backoff between retries after a transport failure.
///
/// `multiplier == 1` gives a fixed interval; larger values give capped
/// exponential growth: `initial × multiplier^(attempt-1)`, at most `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_backoff: interval,
            max_backoff: interval,
            multiplier: 1,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_backoff: initial,
            max_backoff: max,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
        }
    }

    /// Delay before retry number `attempt` (1-based). Never exceeds
    /// `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).checked_pow(exp).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(
            Duration::from_millis(DEFAULT_RETRY_INITIAL_MS),
            Duration::from_millis(DEFAULT_RETRY_MAX_MS),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// NODE CONFIG
// ════════════════════════════════════════════════════════════════════════════════

/// One controller the node must register with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerEndpoint {
    pub id: String,
    pub url: String,
}

/// Worker node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node identifier; `"auto"` asks the binary to generate one.
    pub node_id: String,
    pub node_addr: String,
    pub capacity_gb: u64,
    /// This node's own build version.
    pub node_software_version: SoftwareVersion,
    /// Lowest acceptable controller software version.
    pub minimum_controller_version: SoftwareVersion,
    pub controllers: Vec<ControllerEndpoint>,
    pub heartbeat_interval: Duration,
    /// Upper bound on every controller RPC.
    pub rpc_timeout: Duration,
    /// Consecutive heartbeat failures tolerated; one more forces a fresh handshake.
    pub max_heartbeat_failures: u32,
    pub retry: RetryPolicy,
    /// Path of the TOML file the config was loaded from, if any.
    pub loaded_from: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "auto".to_string(),
            node_addr: DEFAULT_NODE_ADDR.to_string(),
            capacity_gb: 0,
            node_software_version: SoftwareVersion::new(NODE_SOFTWARE_VERSION),
            minimum_controller_version: SoftwareVersion::new(NODE_SOFTWARE_VERSION),
            controllers: Vec::new(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            max_heartbeat_failures: DEFAULT_MAX_HEARTBEAT_FAILURES,
            retry: RetryPolicy::default(),
            loaded_from: None,
        }
    }
}

/// Raw `[node]` section. Every field is optional; absent fields keep the
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeToml {
    pub node_id: Option<String>,
    pub node_addr: Option<String>,
    pub capacity_gb: Option<u64>,
    pub min_controller_version: Option<String>,
    pub controllers: Option<Vec<ControllerEndpoint>>,
    pub heartbeat_interval_ms: Option<u64>,
    pub rpc_timeout_ms: Option<u64>,
    pub max_heartbeat_failures: Option<u32>,
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
    pub retry_multiplier: Option<u32>,
}

impl NodeConfig {
    /// Defaults, then the first `keel.toml` found, then env overrides.
    ///
    /// A config file that exists but cannot be parsed is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = Self::find_config_file() {
            let section = Self::parse_toml_file(&path)?;
            config.apply_toml(&section);
            config.loaded_from = Some(path);
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads a specific file, then applies env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads a specific file without consulting the environment.
    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let section = Self::parse_toml_file(path)?;
        let mut config = Self::default();
        config.apply_toml(&section);
        config.loaded_from = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses a TOML string without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let section = Self::parse_toml_str(content)?;
        let mut config = Self::default();
        config.apply_toml(&section);
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("KEEL_CONFIG_FILE") {
            let path = PathBuf::from(explicit);
            if path.exists() {
                return Some(path);
            }
        }

        for search_path in CONFIG_SEARCH_PATHS {
            let path = PathBuf::from(search_path);
            if path.exists() {
                return Some(path);
            }
            if search_path.starts_with('.') {
                if let Some(home) = home_dir() {
                    let home_path = home.join(search_path);
                    if home_path.exists() {
                        return Some(home_path);
                    }
                }
            }
        }
        None
    }

    fn parse_toml_file(path: &Path) -> Result<NodeToml, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse_toml_str(&content)
    }

    /// Extracts the `[node]` section.
    pub fn parse_toml_str(content: &str) -> Result<NodeToml, ConfigError> {
        #[derive(Deserialize)]
        struct Root {
            node: Option<NodeToml>,
        }

        let root: Root = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        root.node.ok_or(ConfigError::MissingSection)
    }

    fn apply_toml(&mut self, t: &NodeToml) {
        if let Some(ref s) = t.node_id {
            if !s.trim().is_empty() {
                self.node_id = s.trim().to_string();
            }
        }
        if let Some(ref s) = t.node_addr {
            if !s.trim().is_empty() {
                self.node_addr = s.trim().to_string();
            }
        }
        if let Some(v) = t.capacity_gb {
            self.capacity_gb = v;
        }
        if let Some(ref s) = t.min_controller_version {
            self.minimum_controller_version = SoftwareVersion::new(s.as_str());
        }
        if let Some(ref c) = t.controllers {
            self.controllers = c.clone();
        }
        if let Some(v) = t.heartbeat_interval_ms {
            self.heartbeat_interval = Duration::from_millis(v);
        }
        if let Some(v) = t.rpc_timeout_ms {
            self.rpc_timeout = Duration::from_millis(v);
        }
        if let Some(v) = t.max_heartbeat_failures {
            self.max_heartbeat_failures = v;
        }
        if let Some(v) = t.retry_initial_ms {
            self.retry.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = t.retry_max_ms {
            self.retry.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = t.retry_multiplier {
            self.retry.multiplier = v;
        }
    }

    /// Applies `KEEL_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies `KEEL_*` overrides from an arbitrary lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        if let Some(s) = get("KEEL_NODE_ID") {
            self.node_id = s;
        }
        if let Some(s) = get("KEEL_NODE_ADDR") {
            self.node_addr = s;
        }
        if let Some(s) = get("KEEL_MIN_CONTROLLER_VERSION") {
            self.minimum_controller_version = SoftwareVersion::new(s);
        }
        if let Some(s) = get("KEEL_CONTROLLERS") {
            let parsed = parse_controller_list(&s);
            if !parsed.is_empty() {
                self.controllers = parsed;
            }
        }
        if let Some(v) = get("KEEL_HEARTBEAT_INTERVAL_MS").and_then(|s| parse::<u64>(&s)) {
            self.heartbeat_interval = Duration::from_millis(v);
        }
        if let Some(v) = get("KEEL_RPC_TIMEOUT_MS").and_then(|s| parse::<u64>(&s)) {
            self.rpc_timeout = Duration::from_millis(v);
        }
        if let Some(v) = get("KEEL_MAX_HEARTBEAT_FAILURES").and_then(|s| parse::<u32>(&s)) {
            self.max_heartbeat_failures = v;
        }
        if let Some(v) = get("KEEL_RETRY_INITIAL_MS").and_then(|s| parse::<u64>(&s)) {
            self.retry.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = get("KEEL_RETRY_MAX_MS").and_then(|s| parse::<u64>(&s)) {
            self.retry.max_backoff = Duration::from_millis(v);
        }
    }

    /// Rejects configurations the session loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid("heartbeat interval must be > 0".into()));
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::Invalid("rpc timeout must be > 0".into()));
        }
        if self.max_heartbeat_failures == 0 {
            return Err(ConfigError::Invalid("max_heartbeat_failures must be > 0".into()));
        }
        if self.retry.initial_backoff.is_zero() {
            return Err(ConfigError::Invalid("retry initial backoff must be > 0".into()));
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(ConfigError::Invalid(format!(
                "retry max backoff {:?} is below initial backoff {:?}",
                self.retry.max_backoff, self.retry.initial_backoff
            )));
        }
        if self.minimum_controller_version.as_str().is_empty() {
            return Err(ConfigError::Invalid("minimum controller version must be set".into()));
        }

        let mut seen = HashSet::new();
        for c in &self.controllers {
            if c.id.trim().is_empty() || c.url.trim().is_empty() {
                return Err(ConfigError::Invalid("controller id and url must be set".into()));
            }
            if !seen.insert(c.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate controller id '{}'", c.id)));
            }
        }
        Ok(())
    }
}

/// Parses `id=url,id=url`. Malformed entries are skipped.
fn parse_controller_list(s: &str) -> Vec<ControllerEndpoint> {
    s.split(',')
        .filter_map(|entry| {
            let (id, url) = entry.split_once('=')?;
            let (id, url) = (id.trim(), url.trim());
            if id.is_empty() || url.is_empty() {
                return None;
            }
            Some(ControllerEndpoint {
                id: id.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

fn parse<T: FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(PathBuf::from)
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
