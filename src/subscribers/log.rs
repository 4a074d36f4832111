//! # LogWriter: lifecycle events as `tracing` records.
//!
//! Enabled via the `logging` feature. Install any `tracing` subscriber
//! (e.g. `tracing-subscriber`'s fmt layer) to see the output.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO workervisor: cluster started
//! INFO workervisor: worker up id=1 uid="web:01" pid=4242
//! WARN workervisor: worker reported an error id=1 uid="web:01"
//! INFO workervisor: worker exited id=1 uid="web:01" reason="exit status: 1"
//! INFO workervisor: cluster stopped
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let (id, uid, pid) = match &e.worker {
            Some(w) => (Some(w.id), Some(w.uid.as_str()), w.pid),
            None => (None, None, None),
        };

        match e.kind {
            EventKind::Start => tracing::info!("cluster started"),
            EventKind::Stop => tracing::info!("cluster stopped"),
            EventKind::WorkerStart => {
                tracing::info!(?id, ?uid, ?pid, "worker up");
            }
            EventKind::WorkerStop => {
                tracing::info!(?id, ?uid, reason = ?e.reason, "worker exited");
            }
            EventKind::WorkerError => {
                tracing::warn!(?id, ?uid, "worker reported an error");
            }
            EventKind::WorkerWarning => {
                tracing::warn!(?id, ?uid, "worker reported a warning");
            }
            EventKind::WorkerMemoryUsage => {
                tracing::debug!(?id, ?uid, bytes = ?e.bytes, "worker memory usage");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = ?e.source, reason = ?e.reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = ?e.source, info = ?e.reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
