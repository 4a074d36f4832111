//! # workervisor
//!
//! **Workervisor** runs an application as a fleet of worker processes under a
//! single master process. The master forks one process per configured worker,
//! waits for each to report readiness, restarts the ones that die, and
//! replaces them one by one on request.
//!
//! The same binary plays both roles: the master re-executes itself with the
//! worker identity in the environment, and [`Role::from_env`] tells the two
//! apart.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌────────────────────────────────────┐
//!   Supervisor API ────► │  SupervisorRuntime (one task)      │ ◄──── timers (start/kill/restart)
//!   (clone, async)       │  - worker records id → state       │
//!                        │  - UidRegistry (refcounted uids)   │
//!                        └──┬──────────────────────────┬──────┘
//!                           │ WorkerHandle              │ Stat::observe + Bus::publish
//!                           ▼                           ▼
//!              ┌─────────────────────────┐    ┌───────────────────┐
//!              │ worker process (stdin/  │    │ subscriber_listener│
//!              │ stdout, newline msgs)   │    └─────────┬─────────┘
//!              │  WorkerProcess          │              ▼
//!              │   └─ Application        │        SubscriberSet
//!              └─────────────────────────┘   (per-subscriber queues)
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! add_worker ─► spawn ─► Starting ──"up"──► Up ──crash──► restart after timeout.restart
//!                          │                 │
//!                          │ timeout.start   │ remove: "shutdown", SIGKILL after timeout.kill
//!                          ▼                 ▼
//!                        Disconnected ──exit──► worker.stop, uid released
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                           |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Add, remove, restart and kill workers; bulk variants.        | [`Supervisor`], [`SupervisorBuilder`]        |
//! | **Workers**       | User application hook and the worker-side protocol loop.     | [`Application`], [`AppFn`], [`WorkerProcess`]|
//! | **Spawning**      | Cluster (shared socket) or plain child processes.            | [`Spawn`], [`ClusterSpawner`], [`ChildSpawner`] |
//! | **Subscriber API**| Hook into lifecycle events; per-uid statistics.              | [`Subscribe`], [`Stat`]                      |
//! | **Errors**        | Typed errors for both sides and the entry point.             | [`SupervisorError`], [`WorkerError`], [`ClusterError`] |
//! | **Configuration** | JSON configuration with defaults for every key.              | [`Config`]                                   |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber rendering lifecycle events with `tracing`.
//! - `api`: HTTP management API (`/stat`, `/{selector}/restart`, ...).
//!
//! ## Example
//! ```no_run
//! use workervisor::{AppError, AppFn, Config, Role, WorkerContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default().with_app("web", 2);
//!
//!     let app = AppFn::new(|ctx: WorkerContext| async move {
//!         let listener = ctx.shared_listener()?;
//!         let server = tokio::spawn(async move {
//!             if let Some(listener) = listener {
//!                 while let Ok((_conn, _peer)) = listener.accept().await {}
//!             }
//!         });
//!         Ok::<_, AppError>(Some(server))
//!     })
//!     .with_stop(|server: Option<tokio::task::JoinHandle<()>>| async move {
//!         if let Some(server) = server {
//!             server.abort();
//!         }
//!         Ok(())
//!     });
//!
//!     workervisor::run(Role::from_env(), cfg, app).await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "api")]
mod api;
mod config;
mod core;
mod error;
mod events;
mod handles;
pub mod protocol;
mod role;
mod subscribers;
mod worker;

use std::sync::Arc;

// ---- Public re-exports ----

pub use config::{ApiConfig, Config, LogConfig, SpawnMode, TimeoutConfig};
pub use core::{
    wait_for_shutdown_signal, Supervisor, SupervisorBuilder, Uid, WorkerId, WorkerInfo,
    WorkerSnapshot, WorkerState,
};
pub use error::{BulkError, ClusterError, ConfigError, SupervisorError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use handles::{
    spawner_for, ChildSpawner, ClusterSpawner, HandleEvent, HandleEvents, Signal, Spawn,
    SpawnRequest, WorkerExit, WorkerHandle,
};
pub use role::{Role, WorkerIdentity};
pub use subscribers::{
    format_memory, format_uptime, Saturating, Stat, Subscribe, SubscriberSet, WorkerStat,
    MAX_REPORTS,
};
pub use worker::{AppError, AppFn, Application, WorkerContext, WorkerProcess, WorkerStatus};

// Optional: expose a built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;

/// Runs this process in its role until it is told to stop.
///
/// - master: sets the process title, builds a [`Supervisor`] and serves
///   until SIGINT/SIGTERM via [`Supervisor::serve_until`]. The signal
///   listeners are in place before the first worker is spawned;
/// - worker: runs `app` under [`WorkerProcess`] until the master shuts it down.
///
/// A worker whose application fails to start returns an error; the caller is
/// expected to exit with a non-zero status.
pub async fn run<A: Application>(role: Role, config: Config, app: A) -> Result<(), ClusterError> {
    run_with_subscribers(role, config, app, Vec::new()).await
}

/// Like [`run`], with extra lifecycle subscribers on the master.
pub async fn run_with_subscribers<A: Application>(
    role: Role,
    config: Config,
    app: A,
    subscribers: Vec<Arc<dyn Subscribe>>,
) -> Result<(), ClusterError> {
    config.validate()?;
    match role {
        Role::Worker(identity) => {
            WorkerProcess::new(config, identity, app).run().await?;
            Ok(())
        }
        Role::Master => {
            drop(app);
            let mut signals = crate::core::termination_signals()?;
            crate::core::set_process_title(&config.master_title());

            let sup = Supervisor::builder(config)
                .with_subscribers(subscribers)
                .build()?;
            sup.serve_until(async move {
                signals.recv().await;
                tracing::info!("termination signal received");
            })
            .await?;
            Ok(())
        }
    }
}
