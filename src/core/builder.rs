use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{runtime::SupervisorRuntime, supervisor::Supervisor};
use crate::{
    config::Config,
    error::SupervisorError,
    events::{Bus, EventKind},
    handles::{spawner_for, Spawn},
    subscribers::{Stat, Subscribe, SubscriberSet},
};

/// Builder for constructing a [`Supervisor`] with optional features.
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Option<Arc<dyn Spawn>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            spawner: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive lifecycle events (worker start/stop, reports, cluster
    /// stop) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the spawner selected by `cfg.spawn`.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Builds the supervisor and spawns its runtime task.
    ///
    /// This consumes the builder and initializes:
    /// - the event bus and the subscriber workers;
    /// - the spawner (binding the shared listener in cluster mode);
    /// - the runtime task owning all worker records.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => spawner_for(&self.cfg)?,
        };

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let stat = Stat::new();
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let listener = subscriber_listener(&bus, subs);

        let (runtime, tx, mailboxes) =
            SupervisorRuntime::new(self.cfg.timeout, spawner, bus.clone(), stat.clone());
        let span = tracing::info_span!("master", name = %self.cfg.master_title());
        tokio::spawn(runtime.run(mailboxes).instrument(span));

        Ok(Supervisor::from_parts(self.cfg, bus, stat, tx, listener))
    }
}

/// Forwards bus events to the subscriber set until the cluster `stop` event,
/// then drains the subscriber queues.
fn subscriber_listener(bus: &Bus, set: SubscriberSet) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let last = ev.kind == EventKind::Stop;
                    set.emit(&ev);
                    if last {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    })
}
