//! # Event subscribers for the workervisor master.
//!
//! This module provides the [`Subscribe`] trait, the fan-out [`SubscriberSet`]
//! and built-in implementations for lifecycle events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! SupervisorRuntime ── publish(Event) ──► Bus ──► subscriber_listener
//!         │                                              │
//!         └── Stat::observe(&Event) (synchronous)        ▼
//!                                                  SubscriberSet::emit
//!                                                        │
//!                                         ┌──────────────┼──────────┐
//!                                         ▼              ▼          ▼
//!                                     LogWriter        Custom      ...
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers**: observe and react to events (logging, alerts)
//! - **Stateful subscribers**: keep state derived from events ([`Stat`])
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use async_trait::async_trait;
//! use workervisor::{Event, EventKind, Subscribe};
//!
//! struct CrashCounter;
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::WorkerStop {
//!             // increment a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "crash-counter"
//!     }
//! }
//! ```

mod set;
mod stat;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub(crate) use set::panic_message;
pub use stat::{format_memory, format_uptime, Saturating, Stat, WorkerStat, MAX_REPORTS};
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
