//! Master core: worker lifecycle orchestration.
//!
//! The only public entry points from this module are [`Supervisor`] and
//! [`SupervisorBuilder`], plus the worker identity types.
//!
//! ## Wiring
//! ```text
//! Supervisor (clone) ── Request + oneshot ──► SupervisorRuntime (one task)
//!                                               ├─ workers: id → WorkerRecord
//!                                               ├─ UidRegistry
//!                                               ├─ restart TimerSet<Uid>
//!                                               └─ Box<dyn WorkerHandle> per worker
//!                                                        │
//! Spawn ── HandleEvent::{Message, Exit} ─────────────────┘
//!
//! SupervisorRuntime ── Stat::observe + Bus::publish ──► subscriber_listener ──► SubscriberSet
//! ```
//!
//! Internal modules:
//! - [`runtime`]: the single-task state machine owning every worker record;
//! - [`registry`]: reference-counted uid bookkeeping;
//! - [`timers`]: cancellable delayed messages back into the runtime;
//! - [`supervisor`]: public async API, bulk fan-out/fan-in;
//! - [`builder`]: wiring of bus, subscribers, spawner and runtime;
//! - [`shutdown`]: OS signal handling;
//! - [`title`]: OS process title from `Config::name`.

mod builder;
mod registry;
mod runtime;
mod shutdown;
mod supervisor;
mod timers;
mod title;

pub use builder::SupervisorBuilder;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::Supervisor;

pub(crate) use shutdown::{termination_signals, TerminationSignals};
pub(crate) use title::set_process_title;

use serde::Serialize;

/// Process-local worker id, unique among live handles, never reused.
pub type WorkerId = u64;

/// Stable worker slot identity, `"{type}:{NN}"`.
pub type Uid = String;

/// Identity of one worker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    #[serde(rename = "type")]
    pub app_type: String,
    pub uid: Uid,
    pub pid: Option<u32>,
}

/// Lifecycle state of one worker instance.
///
/// Transitions are monotonic: `Starting → Up → Disconnected` or
/// `Starting → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Up,
    Disconnected,
}

/// Point-in-time view of a tracked worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    #[serde(flatten)]
    pub info: WorkerInfo,
    pub state: WorkerState,
}
