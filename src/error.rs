//! Error types used by the workervisor master, its workers and the entry point.
//!
//! - [`SupervisorError`]: failures of master-side lifecycle operations.
//! - [`BulkError`]: first failure of a fan-out operation, plus the ids it touched.
//! - [`WorkerError`]: failures of the supervised (worker-side) protocol.
//! - [`ConfigError`]: configuration loading/validation failures.
//! - [`ClusterError`]: anything surfaced by [`run`](crate::run).
//!
//! Every enum provides `as_label()` (stable snake_case string for logs/metrics).

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::core::WorkerId;

/// # Errors produced by supervisor operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The worker did not report `up` within `timeout.start`.
    #[error("worker {uid} failed to start in time ({timeout:?})")]
    StartTimeout {
        /// Identity of the worker slot.
        uid: String,
        /// The configured start timeout.
        timeout: Duration,
    },

    /// The worker process exited before reporting `up`.
    #[error("worker {uid} failed to start")]
    StartFailure {
        /// Identity of the worker slot.
        uid: String,
    },

    /// The operation referenced an unknown worker id or uid.
    #[error("worker {id} does not exist")]
    NotFound {
        /// Worker id or uid, as given by the caller.
        id: String,
    },

    /// A uid reference count would have gone negative.
    ///
    /// Never returned to callers; used as the panic message of the registry.
    #[error("uid {uid} released more times than it was reserved")]
    RegistryInvariant {
        /// The offending uid.
        uid: String,
    },

    /// A stop is in progress; the operation was not performed.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// The configuration does not allow the requested operation.
    #[error("configuration error: {reason}")]
    Config {
        /// Human-readable reason.
        reason: String,
    },

    /// A parked uid cannot be freed while a worker still holds it.
    #[error("uid {uid} is still in use")]
    UidInUse {
        /// The uid that is still reserved.
        uid: String,
    },

    /// The OS refused to spawn the worker process.
    #[error("failed to spawn worker of type {app_type}: {source}")]
    Spawn {
        /// Application type of the worker.
        app_type: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The shared listening socket could not be set up.
    #[error("cannot listen on {addr}: {source}")]
    Listen {
        /// Configured listen address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workervisor::SupervisorError;
    ///
    /// let err = SupervisorError::StartFailure { uid: "web:01".into() };
    /// assert_eq!(err.as_label(), "worker_start_failure");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::StartTimeout { .. } => "worker_start_timeout",
            SupervisorError::StartFailure { .. } => "worker_start_failure",
            SupervisorError::NotFound { .. } => "worker_not_found",
            SupervisorError::RegistryInvariant { .. } => "registry_invariant",
            SupervisorError::ShuttingDown => "shutting_down",
            SupervisorError::Config { .. } => "config",
            SupervisorError::UidInUse { .. } => "uid_in_use",
            SupervisorError::Spawn { .. } => "spawn_failed",
            SupervisorError::Listen { .. } => "listen_failed",
        }
    }

    pub(crate) fn not_found(id: impl ToString) -> Self {
        SupervisorError::NotFound { id: id.to_string() }
    }
}

/// # First failure of a bulk (fan-out) operation.
///
/// Other sub-operations still ran to completion; `ids` is the full set of
/// workers the operation targeted.
#[derive(Error, Debug)]
#[error("bulk operation over {} worker(s) failed: {source}", ids.len())]
pub struct BulkError {
    /// Every worker id the operation targeted.
    pub ids: Vec<WorkerId>,
    /// The first error encountered.
    #[source]
    pub source: SupervisorError,
}

/// # Errors produced by the worker-side protocol.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The application start hook failed; no `up` was sent.
    #[error("application failed to start: {0}")]
    Start(#[source] crate::worker::AppError),

    /// The application stop hook failed.
    #[error("application failed to stop: {0}")]
    Stop(#[source] crate::worker::AppError),

    /// A fatal error happened while the worker was already shutting down.
    #[error("fatal error during shutdown: {reason}")]
    FatalDuringShutdown {
        /// Description of the fatal error.
        reason: String,
    },

    /// Reading from or writing to the master channel failed.
    #[error("master channel i/o: {0}")]
    Io(#[from] io::Error),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Start(_) => "app_start_failed",
            WorkerError::Stop(_) => "app_stop_failed",
            WorkerError::FatalDuringShutdown { .. } => "fatal_during_shutdown",
            WorkerError::Io(_) => "channel_io",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config: {0}")]
    Read(#[from] io::Error),

    /// The configuration is not valid JSON for [`Config`](crate::Config).
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is syntactically valid but semantically wrong.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read(_) => "config_read",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Invalid(_) => "config_invalid",
        }
    }
}

/// # Errors surfaced by [`run`](crate::run).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Master-side failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Worker-side failure.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Signal registration or socket setup failed.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}
