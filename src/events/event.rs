//! # Lifecycle events emitted by the supervisor.
//!
//! [`EventKind`] classifies events in three groups:
//! - **Cluster events**: the supervisor finished starting or stopping
//! - **Worker events**: a worker came up, went down, or reported something
//! - **Subscriber events**: a subscriber panicked or dropped an event
//!
//! Each kind has a stable dotted name ([`EventKind::as_str`]) such as
//! `"worker.start"` or `"worker.memoryUsage"`.
//!
//! ## Ordering guarantees
//! Each event has a globally unique, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use workervisor::{Event, EventKind, WorkerInfo};
//!
//! let info = WorkerInfo { id: 3, app_type: "web".into(), uid: "web:01".into(), pid: Some(4242) };
//! let ev = Event::new(EventKind::WorkerMemoryUsage)
//!     .with_worker(info)
//!     .with_bytes(52_428_800);
//!
//! assert_eq!(ev.kind.as_str(), "worker.memoryUsage");
//! assert_eq!(ev.worker.as_ref().map(|w| w.uid.as_str()), Some("web:01"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::core::WorkerInfo;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Cluster events ===
    /// Initial workers are up (or failed) and the management API is running.
    Start,

    /// Every worker is down after `Supervisor::stop`.
    Stop,

    // === Worker events ===
    /// A worker reported `up`.
    ///
    /// Sets: `worker`
    WorkerStart,

    /// A worker process exited (emitted once per instance).
    ///
    /// Sets: `worker`, `reason` (exit description)
    WorkerStop,

    /// A worker reported an application error.
    ///
    /// Sets: `worker`
    WorkerError,

    /// A worker reported an application warning.
    ///
    /// Sets: `worker`
    WorkerWarning,

    /// A worker reported its resident memory.
    ///
    /// Sets: `worker`, `bytes`
    WorkerMemoryUsage,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `source` (subscriber name), `reason` (panic message)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `source` (subscriber name), `reason` ("full" / "closed")
    SubscriberOverflow,
}

impl EventKind {
    /// Stable dotted name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::WorkerStart => "worker.start",
            EventKind::WorkerStop => "worker.stop",
            EventKind::WorkerError => "worker.error",
            EventKind::WorkerWarning => "worker.warning",
            EventKind::WorkerMemoryUsage => "worker.memoryUsage",
            EventKind::SubscriberPanicked => "subscriber.panicked",
            EventKind::SubscriberOverflow => "subscriber.overflow",
        }
    }
}

/// Lifecycle event with optional payload.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Worker the event is about.
    pub worker: Option<WorkerInfo>,
    /// Memory usage in bytes.
    pub bytes: Option<u64>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Name of the emitting subscriber.
    pub source: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            bytes: None,
            reason: None,
            source: None,
        }
    }

    /// Attaches the worker identity.
    #[inline]
    pub fn with_worker(mut self, worker: WorkerInfo) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attaches a memory figure.
    #[inline]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.source = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.source = Some(subscriber);
        ev
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
