//! # Cluster configuration.
//!
//! [`Config`] is read once by the master (and passed to every worker) and is
//! read-only afterwards. It deserializes from JSON; every key is optional.
//!
//! ```json
//! {
//!   "name": "my-app",
//!   "timeout": { "start": 5000, "restart": 2000, "kill": 5000 },
//!   "spawn": "child",
//!   "apps": { "web": 2, "jobs": -1 }
//! }
//! ```
//!
//! ## Sentinel values
//! - `apps[type] < 0` → one worker per available CPU core
//! - `listen = null` → cluster mode spawns without a shared socket

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Global configuration for a cluster.
///
/// ## Field semantics
/// - `name`: process title prefix; workers are titled `"{name} {type} worker"`
/// - `log`: passed through to whatever installs the `tracing` subscriber
/// - `api`: management API switch and credentials
/// - `timeout`: start/restart/kill timeouts (milliseconds in JSON)
/// - `spawn`: how workers are forked, fixed for the lifetime of the master
/// - `apps`: application type → number of workers
/// - `sequential_start`: spawn the workers of one type one after another
/// - `listen`: address of the socket shared by cluster-mode workers
/// - `bus_capacity`: ring size of the lifecycle event bus (min 1)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub log: LogConfig,
    pub api: ApiConfig,
    pub timeout: TimeoutConfig,
    pub spawn: SpawnMode,
    pub apps: BTreeMap<String, i64>,
    pub sequential_start: bool,
    pub listen: Option<String>,
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "clustered-app".to_string(),
            log: LogConfig::default(),
            api: ApiConfig::default(),
            timeout: TimeoutConfig::default(),
            spawn: SpawnMode::default(),
            apps: BTreeMap::new(),
            sequential_start: false,
            listen: None,
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Adds (or replaces) an application type with the given worker count.
    pub fn with_app(mut self, app_type: impl Into<String>, count: i64) -> Self {
        self.apps.insert(app_type.into(), count);
        self
    }

    /// Checks values serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .apps
            .keys()
            .find(|t| t.is_empty() || t.contains(':') || t.contains('/'))
        {
            return Err(ConfigError::Invalid(format!(
                "application type {bad:?} must be non-empty and contain no ':' or '/'"
            )));
        }
        if self.api.enabled && self.api.secret.is_empty() {
            return Err(ConfigError::Invalid("api.secret must not be empty".into()));
        }
        Ok(())
    }

    /// Resolves a configured worker count (`< 0` → CPU count).
    pub fn worker_count(count: i64) -> usize {
        if count < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            count as usize
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Title used for the master process.
    pub fn master_title(&self) -> String {
        self.name.clone()
    }

    /// Title used for a worker of the given type.
    pub fn worker_title(&self, app_type: &str) -> String {
        format!("{} {} worker", self.name, app_type)
    }
}

/// Logger settings, passed through untouched.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub name: String,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Management API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
    pub host: String,
    pub secret: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8887,
            host: "127.0.0.1".to_string(),
            secret: "cluster-secret".to_string(),
        }
    }
}

/// Lifecycle timeouts.
///
/// - `start`: how long a new worker may take to report `up`
/// - `restart`: delay before respawning a worker that exited unexpectedly
/// - `kill`: how long a worker may take to exit after `shutdown` before SIGKILL
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "millis")]
    pub start: Duration,
    #[serde(with = "millis")]
    pub restart: Duration,
    #[serde(with = "millis")]
    pub kill: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(5000),
            restart: Duration::from_millis(2000),
            kill: Duration::from_millis(5000),
        }
    }
}

/// How worker processes are forked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    /// Re-executed workers share the master's listening socket.
    #[default]
    Cluster,
    /// Plain child processes, no socket sharing.
    Child,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
