//! # Supervisor: public handle to the master.
//!
//! [`Supervisor`] is a cheap-to-clone front for the single runtime task that
//! owns every worker. Each operation sends a request with a `oneshot`
//! continuation and awaits the answer; bulk operations fan out one request per
//! worker and fan the answers back in.
//!
//! ## High-level architecture
//! ```text
//! start():
//!   cfg.apps ──► per type (concurrently) ──► add_worker × count
//!                                            (sequential if cfg.sequential_start)
//!            └─► management API (feature "api", if enabled) ──► publish(Start)
//!
//! bulk ops:
//!   worker_ids(type) ──► join_all(op(id) for id) ──► Ok(ids) | Err(BulkError { ids, first })
//!
//! restart_all_workers(type):
//!   phase 1: join_all(add_worker(type, uid) for old)   ── any Err ──► stop here
//!   phase 2: join_all(remove_worker(old_id))
//!
//! stop():
//!   api_token.cancel() ──► Request::Stop ──► (runtime) remove all ──► publish(Stop)
//!                      └─► wait for the subscriber listener to drain
//! ```
//!
//! ## Example
//! ```no_run
//! use workervisor::{Config, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default().with_app("web", 2);
//!     let sup = Supervisor::new(cfg)?;
//!     sup.start().await?;
//!
//!     let id = sup.add_worker("web").await?;
//!     let new_id = sup.restart_worker(id).await?;
//!     assert_ne!(id, new_id);
//!
//!     sup.stop().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::builder::SupervisorBuilder;
use crate::core::runtime::{Reply, Request};
use crate::core::{Uid, WorkerId, WorkerSnapshot};
use crate::error::{BulkError, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::handles::Signal;
use crate::subscribers::Stat;

/// Coordinates worker processes through the supervisor runtime.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Config,
    bus: Bus,
    stat: Stat,
    tx: mpsc::UnboundedSender<Request>,
    api_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Builds a supervisor with the spawner selected by `cfg.spawn` and no
    /// extra subscribers. Must be called inside a tokio runtime.
    pub fn new(cfg: Config) -> Result<Self, SupervisorError> {
        SupervisorBuilder::new(cfg).build()
    }

    /// Starts a [`SupervisorBuilder`].
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        cfg: Config,
        bus: Bus,
        stat: Stat,
        tx: mpsc::UnboundedSender<Request>,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                bus,
                stat,
                tx,
                api_token: CancellationToken::new(),
                listener: Mutex::new(Some(listener)),
            }),
        }
    }

    /// Configuration the supervisor was built with.
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Per-uid statistics, updated before the corresponding event is published.
    pub fn stat(&self) -> &Stat {
        &self.inner.stat
    }

    /// Receiver for subsequent lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .tx
            .send(make(reply))
            .map_err(|_| SupervisorError::ShuttingDown)?;
        rx.await.unwrap_or(Err(SupervisorError::ShuttingDown))
    }

    async fn query<T: Default>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> T {
        let (reply, rx) = oneshot::channel();
        if self.inner.tx.send(make(reply)).is_err() {
            return T::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Spawns the configured workers, then starts the management API.
    ///
    /// Individual start failures are logged, not returned. Fails if there is
    /// nothing to supervise: no applications and no management API.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let cfg = &self.inner.cfg;
        if cfg.apps.is_empty() && !cfg.api.enabled {
            return Err(SupervisorError::Config {
                reason: "no applications configured".into(),
            });
        }

        let groups = cfg.apps.iter().map(|(app_type, &count)| {
            let n = Config::worker_count(count);
            async move {
                if cfg.sequential_start {
                    let mut results = Vec::with_capacity(n);
                    for _ in 0..n {
                        results.push(self.add_worker(app_type).await);
                    }
                    results
                } else {
                    join_all((0..n).map(|_| self.add_worker(app_type))).await
                }
            }
        });
        let results: Vec<_> = join_all(groups).await.into_iter().flatten().collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, total = results.len(), "some workers failed to start");
        }

        self.start_api().await;

        tracing::info!(name = %cfg.name, workers = results.len() - failed, "cluster started");
        self.inner.bus.publish(Event::new(EventKind::Start));
        Ok(())
    }

    #[cfg(feature = "api")]
    async fn start_api(&self) {
        if self.inner.cfg.api.enabled {
            let served = crate::api::serve(self.clone(), self.inner.api_token.clone()).await;
            if let Err(e) = served {
                tracing::error!(error = %e, "management api unavailable");
            }
        }
    }

    #[cfg(not(feature = "api"))]
    async fn start_api(&self) {
        if self.inner.cfg.api.enabled {
            tracing::warn!("api.enabled is set but the `api` feature is not compiled in");
        }
    }

    /// Spawns one worker of `app_type` with a fresh uid; resolves once it is up.
    pub async fn add_worker(&self, app_type: &str) -> Result<WorkerId, SupervisorError> {
        self.add_worker_inner(app_type, None).await
    }

    /// Spawns one worker reusing `uid` (e.g. a stopped slot).
    pub async fn add_worker_with_uid(
        &self,
        app_type: &str,
        uid: &str,
    ) -> Result<WorkerId, SupervisorError> {
        self.add_worker_inner(app_type, Some(uid.to_string())).await
    }

    async fn add_worker_inner(
        &self,
        app_type: &str,
        uid: Option<Uid>,
    ) -> Result<WorkerId, SupervisorError> {
        let app_type = app_type.to_string();
        self.call(|reply| Request::AddWorker {
            app_type,
            uid,
            reply,
        })
        .await
    }

    /// Gracefully removes one worker; resolves once it exited.
    pub async fn remove_worker(&self, id: WorkerId) -> Result<(), SupervisorError> {
        self.call(|reply| Request::RemoveWorker { id, reply }).await
    }

    /// Replaces a worker with a fresh one on the same uid; resolves with the
    /// new id once the old one exited.
    pub async fn restart_worker(&self, id: WorkerId) -> Result<WorkerId, SupervisorError> {
        self.call(|reply| Request::RestartWorker { id, reply }).await
    }

    /// Drops a parked uid and lets `add_worker` hand it out again.
    pub async fn free_uid(&self, uid: &str) -> Result<(), SupervisorError> {
        let uid = uid.to_string();
        self.call(|reply| Request::FreeUid { uid, reply }).await
    }

    /// Tracked workers, optionally of one type, ordered by id.
    pub async fn workers(&self, app_type: Option<&str>) -> Vec<WorkerSnapshot> {
        let app_type = app_type.map(str::to_string);
        self.query(|reply| Request::Workers { app_type, reply })
            .await
    }

    /// Ids of tracked workers, optionally of one type.
    pub async fn worker_ids(&self, app_type: Option<&str>) -> Vec<WorkerId> {
        self.workers(app_type)
            .await
            .into_iter()
            .map(|w| w.info.id)
            .collect()
    }

    /// One tracked worker.
    pub async fn worker(&self, id: WorkerId) -> Option<WorkerSnapshot> {
        self.query(|reply| Request::Worker { id, reply }).await
    }

    /// Gracefully removes every worker (of one type).
    pub async fn remove_all_workers(
        &self,
        app_type: Option<&str>,
    ) -> Result<Vec<WorkerId>, BulkError> {
        let ids = self.worker_ids(app_type).await;
        let results = join_all(ids.iter().map(|&id| self.remove_worker(id))).await;
        first_error(ids, results).map(|(ids, _)| ids)
    }

    /// Sends SIGKILL to every worker (of one type) without waiting for exits.
    ///
    /// Workers that were up are restarted like after any crash.
    pub async fn kill_all_workers(
        &self,
        app_type: Option<&str>,
    ) -> Result<Vec<WorkerId>, BulkError> {
        let ids = self.worker_ids(app_type).await;
        let results = join_all(ids.iter().map(|&id| {
            self.call(move |reply| Request::KillWorker {
                id,
                signal: Signal::SIGKILL,
                reply,
            })
        }))
        .await;
        first_error(ids, results).map(|(ids, _)| ids)
    }

    /// Replaces every worker (of one type), keeping uids; resolves with the
    /// new ids.
    ///
    /// Old workers are removed only if every replacement came up. The error
    /// carries the old ids.
    pub async fn restart_all_workers(
        &self,
        app_type: Option<&str>,
    ) -> Result<Vec<WorkerId>, BulkError> {
        let old = self.workers(app_type).await;
        let ids: Vec<WorkerId> = old.iter().map(|w| w.info.id).collect();

        let added = join_all(
            old.iter()
                .map(|w| self.add_worker_with_uid(&w.info.app_type, &w.info.uid)),
        )
        .await;
        let (ids, new_ids) = first_error(ids, added)?;

        let removed = join_all(ids.iter().map(|&id| self.remove_worker(id))).await;
        first_error(ids, removed)?;
        Ok(new_ids)
    }

    /// Stops the cluster: no more restarts, management API closed, every
    /// worker removed. Idempotent; every caller resolves after the `stop` event.
    pub async fn stop(&self) {
        self.inner.api_token.cancel();
        self.query(|reply| Request::Stop { reply }).await;

        let listener = self.inner.listener.lock().await.take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
    }

    /// Starts the cluster and keeps it running until `shutdown` completes,
    /// then stops it.
    ///
    /// `shutdown` is raced against [`start`](Self::start) as well: a signal
    /// that arrives while workers are still coming up abandons the startup.
    /// The cluster is stopped on every path, including a failed start.
    pub async fn serve_until<F>(&self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let started = tokio::select! {
            res = self.start() => Some(res),
            () = &mut shutdown => None,
        };
        let res = match started {
            Some(Ok(())) => {
                (&mut shutdown).await;
                tracing::info!("shutdown requested");
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                tracing::info!("shutdown requested during startup");
                Ok(())
            }
        };

        self.stop().await;
        res
    }
}

fn first_error<T>(
    ids: Vec<WorkerId>,
    results: Vec<Result<T, SupervisorError>>,
) -> Result<(Vec<WorkerId>, Vec<T>), BulkError> {
    let mut ok = Vec::with_capacity(results.len());
    for r in results {
        match r {
            Ok(v) => ok.push(v),
            Err(source) => return Err(BulkError { ids, source }),
        }
    }
    Ok((ids, ok))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::WorkerState;
    use crate::handles::testing::{Behavior, FakeSpawner};
    use crate::protocol::{Command, Message};

    fn supervisor(spawner: &FakeSpawner, cfg: Config) -> Supervisor {
        SupervisorBuilder::new(cfg)
            .with_spawner(Arc::new(spawner.clone()))
            .build()
            .unwrap()
    }

    fn kinds(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind);
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn add_worker_resolves_on_up() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let mut rx = sup.subscribe();

        let id = sup.add_worker("web").await.unwrap();
        let w = sup.worker(id).await.unwrap();
        assert_eq!(w.info.uid, "web:01");
        assert_eq!(w.state, WorkerState::Up);
        assert_eq!(w.info.pid, Some(10_000 + id as u32));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::WorkerStart);
        assert_eq!(ev.worker.unwrap().id, id);
        assert_eq!(sup.stat().get("web:01").unwrap().status, "online");
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_something_to_supervise() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let err = sup.start().await.unwrap_err();
        assert_eq!(err.as_label(), "config");
    }

    #[tokio::test(start_paused = true)]
    async fn start_spawns_every_type_and_publishes_start() {
        let spawner = FakeSpawner::new(Behavior::Up);
        spawner.set_behavior("broken", Behavior::CrashBeforeUp);
        let cfg = Config::default()
            .with_app("web", 2)
            .with_app("jobs", 1)
            .with_app("broken", 1);
        let sup = supervisor(&spawner, cfg);
        let mut rx = sup.subscribe();

        sup.start().await.unwrap();
        assert_eq!(sup.worker_ids(Some("web")).await.len(), 2);
        assert_eq!(sup.worker_ids(Some("jobs")).await.len(), 1);
        assert!(sup.worker_ids(Some("broken")).await.is_empty());
        assert_eq!(kinds(&mut rx).last(), Some(&EventKind::Start));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_start_spawns_in_order() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let mut cfg = Config::default().with_app("web", 3);
        cfg.sequential_start = true;
        let sup = supervisor(&spawner, cfg);

        sup.start().await.unwrap();
        let uids: Vec<_> = spawner.spawned().into_iter().map(|r| r.uid).collect();
        assert_eq!(uids, vec!["web:01", "web:02", "web:03"]);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_worker_is_restarted_on_same_uid() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let mut rx = sup.subscribe();
        let id = sup.add_worker("web").await.unwrap();

        spawner.crash(id);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(sup.worker_ids(None).await.is_empty());
        assert_eq!(sup.stat().get("web:01").unwrap().status, "offline");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let workers = sup.workers(Some("web")).await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].info.uid, "web:01");
        assert_ne!(workers[0].info.id, id);
        assert_eq!(sup.stat().get("web:01").unwrap().restarted, 1);
        assert_eq!(
            kinds(&mut rx),
            vec![
                EventKind::WorkerStart,
                EventKind::WorkerStop,
                EventKind::WorkerStart
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remove_all_by_type_leaves_other_types() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let cfg = Config::default().with_app("web", 2).with_app("jobs", 1);
        let sup = supervisor(&spawner, cfg);
        sup.start().await.unwrap();
        let jobs = sup.worker_ids(Some("jobs")).await;

        let removed = sup.remove_all_workers(Some("web")).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(sup.worker_ids(None).await, jobs);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sup.worker_ids(None).await, jobs);
        assert_eq!(spawner.spawned().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_all_sigkills_and_workers_come_back() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default().with_app("web", 2));
        sup.start().await.unwrap();

        let ids = sup.kill_all_workers(None).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(spawner.killed().iter().all(|(_, s)| *s == Signal::SIGKILL));
        settle().await;
        assert!(sup.worker_ids(None).await.is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut uids: Vec<_> = sup
            .workers(None)
            .await
            .into_iter()
            .map(|w| w.info.uid)
            .collect();
        uids.sort();
        assert_eq!(uids, vec!["web:01", "web:02"]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_is_idempotent_while_disconnected() {
        let spawner = FakeSpawner::new(Behavior::IgnoreShutdown);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();
        let mut rx = sup.subscribe();

        let (a, b) = tokio::join!(sup.remove_worker(id), sup.remove_worker(id));
        assert!(a.is_ok() && b.is_ok());

        assert_eq!(spawner.sent(), vec![(id, Command::Shutdown)]);
        assert_eq!(spawner.disconnected(), vec![id]);
        assert_eq!(spawner.killed(), vec![(id, Signal::SIGKILL)]);
        assert_eq!(kinds(&mut rx), vec![EventKind::WorkerStop]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_unknown_is_not_found() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let err = sup.remove_worker(42).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound { .. }));
        let err = sup.restart_worker(42).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_removes_worker_first() {
        let spawner = FakeSpawner::new(Behavior::NeverUp);
        let sup = supervisor(&spawner, Config::default());
        let mut rx = sup.subscribe();

        let started = tokio::time::Instant::now();
        let err = sup.add_worker("web").await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartTimeout { ref uid, .. } if uid == "web:01"));
        assert!(started.elapsed() >= Duration::from_secs(5));

        assert_eq!(spawner.sent().len(), 1);
        assert!(sup.worker_ids(None).await.is_empty());
        assert_eq!(kinds(&mut rx), vec![EventKind::WorkerStop]);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_before_up_is_a_start_failure_without_restart() {
        let spawner = FakeSpawner::new(Behavior::CrashBeforeUp);
        let sup = supervisor(&spawner, Config::default());

        let err = sup.add_worker("web").await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartFailure { .. }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(spawner.spawned().len(), 1);
        assert!(sup.stat().get("web:01").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_error_releases_uid() {
        let spawner = FakeSpawner::new(Behavior::SpawnError);
        let sup = supervisor(&spawner, Config::default());

        let err = sup.add_worker("web").await.unwrap_err();
        assert_eq!(err.as_label(), "spawn_failed");
        // parked, not in use
        sup.free_uid("web:01").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_worker_is_killed_after_timeout() {
        let spawner = FakeSpawner::new(Behavior::IgnoreShutdown);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();

        let started = tokio::time::Instant::now();
        sup.remove_worker(id).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(spawner.killed(), vec![(id, Signal::SIGKILL)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_restarts() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let mut rx = sup.subscribe();
        let id = sup.add_worker("web").await.unwrap();

        spawner.crash(id);
        settle().await;
        sup.stop().await;
        sup.stop().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(spawner.spawned().len(), 1);
        assert!(matches!(
            sup.add_worker("web").await,
            Err(SupervisorError::ShuttingDown)
        ));
        let stops = kinds(&mut rx)
            .into_iter()
            .filter(|k| *k == EventKind::Stop)
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_removes_starting_workers() {
        let spawner = FakeSpawner::new(Behavior::NeverUp);
        let sup = supervisor(&spawner, Config::default());

        let pending = tokio::spawn({
            let sup = sup.clone();
            async move { sup.add_worker("web").await }
        });
        settle().await;
        sup.stop().await;

        let res = pending.await.unwrap();
        assert!(matches!(res, Err(SupervisorError::StartFailure { .. })));
        assert!(sup.worker_ids(None).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stops_all_resolve_after_stop_event() {
        let spawner = FakeSpawner::new(Behavior::IgnoreShutdown);
        let sup = supervisor(&spawner, Config::default());
        sup.add_worker("web").await.unwrap();
        let mut rx = sup.subscribe();

        tokio::join!(sup.stop(), sup.stop());
        assert_eq!(
            kinds(&mut rx),
            vec![EventKind::WorkerStop, EventKind::Stop]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_uid_and_counts() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let old = sup.add_worker("web").await.unwrap();

        let new = sup.restart_worker(old).await.unwrap();
        assert_ne!(old, new);
        assert!(sup.worker(old).await.is_none());
        assert_eq!(sup.worker(new).await.unwrap().info.uid, "web:01");

        let stat = sup.stat().get("web:01").unwrap();
        assert_eq!((stat.restarted, stat.id), (1, Some(new)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_all_replaces_every_worker() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default().with_app("web", 2));
        sup.start().await.unwrap();
        let old = sup.worker_ids(None).await;

        let new = sup.restart_all_workers(Some("web")).await.unwrap();
        assert_eq!(new.len(), 2);
        let mut now = sup.worker_ids(None).await;
        now.sort();
        let mut expected = new.clone();
        expected.sort();
        assert_eq!(now, expected);
        assert!(old.iter().all(|id| !now.contains(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_all_keeps_old_workers_when_an_add_fails() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default().with_app("web", 2));
        sup.start().await.unwrap();
        let old = sup.worker_ids(None).await;

        spawner.set_behavior("web", Behavior::CrashBeforeUp);
        let err = sup.restart_all_workers(Some("web")).await.unwrap_err();
        assert_eq!(err.ids, old);
        assert!(matches!(err.source, SupervisorError::StartFailure { .. }));

        assert_eq!(sup.worker_ids(None).await, old);
        assert!(spawner.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnectme_from_up_worker_replaces_it() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();

        spawner.message(id, Message::DisconnectMe);
        settle().await;
        assert_eq!(spawner.sent(), vec![(id, Command::Shutdown)]);
        assert!(sup.worker_ids(None).await.is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let workers = sup.workers(None).await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].info.uid, "web:01");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnectme_while_starting_is_not_restarted() {
        let spawner = FakeSpawner::new(Behavior::NeverUp);
        let sup = supervisor(&spawner, Config::default());

        let pending = tokio::spawn({
            let sup = sup.clone();
            async move { sup.add_worker("web").await }
        });
        settle().await;
        let id = sup.worker_ids(None).await[0];
        spawner.message(id, Message::DisconnectMe);

        let res = pending.await.unwrap();
        assert!(matches!(res, Err(SupervisorError::StartFailure { .. })));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(spawner.spawned().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_starting_worker_fails_even_past_start_window() {
        let spawner = FakeSpawner::new(Behavior::Hang);
        let mut cfg = Config::default();
        cfg.timeout.start = Duration::from_millis(1000);
        cfg.timeout.kill = Duration::from_millis(5000);
        let sup = supervisor(&spawner, cfg);

        let pending = tokio::spawn({
            let sup = sup.clone();
            async move { sup.add_worker("web").await }
        });
        settle().await;
        let id = sup.worker_ids(None).await[0];
        spawner.message(id, Message::DisconnectMe);

        let res = pending.await.unwrap();
        assert!(matches!(res, Err(SupervisorError::StartFailure { .. })));
        assert_eq!(spawner.killed(), vec![(id, Signal::SIGKILL)]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeouts_restart_crashed_worker_quickly() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let cfg = Config::from_json_str(
            r#"{"apps":{"web":2},"timeout":{"start":100,"restart":50,"kill":100}}"#,
        )
        .unwrap();
        let sup = supervisor(&spawner, cfg);

        sup.start().await.unwrap();
        let mut workers = sup.workers(Some("web")).await;
        workers.sort_by(|a, b| a.info.uid.cmp(&b.info.uid));
        let uids: Vec<_> = workers.iter().map(|w| w.info.uid.as_str()).collect();
        assert_eq!(uids, vec!["web:01", "web:02"]);

        let crashed = workers[0].info.id;
        spawner.crash(crashed);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let replaced = sup
            .workers(Some("web"))
            .await
            .into_iter()
            .find(|w| w.info.uid == "web:01")
            .unwrap();
        assert_ne!(replaced.info.id, crashed);
        assert_eq!(replaced.state, WorkerState::Up);
        assert_eq!(sup.stat().get("web:01").unwrap().restarted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn serve_until_stops_when_signalled_during_start() {
        let spawner = FakeSpawner::new(Behavior::NeverUp);
        let sup = supervisor(&spawner, Config::default().with_app("web", 2));
        let mut rx = sup.subscribe();

        let started = tokio::time::Instant::now();
        sup.serve_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(spawner.spawned().len(), 2);
        assert!(sup.worker_ids(None).await.is_empty());
        let seen = kinds(&mut rx);
        assert!(!seen.contains(&EventKind::Start));
        assert_eq!(seen.last(), Some(&EventKind::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn serve_until_runs_until_signalled() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default().with_app("web", 1));
        let mut rx = sup.subscribe();

        sup.serve_until(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(
            kinds(&mut rx),
            vec![
                EventKind::WorkerStart,
                EventKind::Start,
                EventKind::WorkerStop,
                EventKind::Stop
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn serve_until_reports_start_errors_after_stopping() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let mut rx = sup.subscribe();

        let err = sup.serve_until(std::future::pending()).await.unwrap_err();
        assert_eq!(err.as_label(), "config");
        assert_eq!(kinds(&mut rx), vec![EventKind::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn mutating_calls_after_stop_are_rejected() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();
        sup.stop().await;

        assert!(matches!(
            sup.restart_worker(id).await,
            Err(SupervisorError::ShuttingDown)
        ));
        assert!(matches!(
            sup.remove_worker(id).await,
            Err(SupervisorError::ShuttingDown)
        ));
        assert!(matches!(
            sup.free_uid("web:01").await,
            Err(SupervisorError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restartme_swaps_instance() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();

        spawner.message(id, Message::RestartMe);
        settle().await;
        let workers = sup.workers(None).await;
        assert_eq!(workers.len(), 1);
        assert_ne!(workers[0].info.id, id);
        assert_eq!(workers[0].info.uid, "web:01");
    }

    #[tokio::test(start_paused = true)]
    async fn reports_feed_stat_and_bus() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let id = sup.add_worker("web").await.unwrap();
        let mut rx = sup.subscribe();

        spawner.message(id, Message::MemoryUsage(2_000_000));
        spawner.message(id, Message::Error);
        spawner.message(id, Message::Warning);
        spawner.message(id, Message::Up);
        settle().await;

        let stat = sup.stat().get("web:01").unwrap();
        assert_eq!(stat.memory.as_deref(), Some("2M"));
        assert_eq!(stat.errors.0, 1);
        assert_eq!(stat.warnings.0, 1);
        assert_eq!(
            kinds(&mut rx),
            vec![
                EventKind::WorkerMemoryUsage,
                EventKind::WorkerError,
                EventKind::WorkerWarning
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn freed_uid_is_handed_out_again() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let first = sup.add_worker("web").await.unwrap();
        sup.remove_worker(first).await.unwrap();

        let second = sup.add_worker("web").await.unwrap();
        assert_eq!(sup.worker(second).await.unwrap().info.uid, "web:02");
        assert!(matches!(
            sup.free_uid("web:02").await,
            Err(SupervisorError::UidInUse { .. })
        ));

        sup.free_uid("web:01").await.unwrap();
        let third = sup.add_worker("web").await.unwrap();
        assert_eq!(sup.worker(third).await.unwrap().info.uid, "web:01");
    }

    #[tokio::test(start_paused = true)]
    async fn uid_must_match_type() {
        let spawner = FakeSpawner::new(Behavior::Up);
        let sup = supervisor(&spawner, Config::default());
        let err = sup.add_worker_with_uid("jobs", "web:01").await.unwrap_err();
        assert_eq!(err.as_label(), "config");
        assert!(spawner.spawned().is_empty());
    }
}
