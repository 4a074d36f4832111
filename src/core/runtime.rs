//! # SupervisorRuntime - the master state machine.
//!
//! One tokio task owns every worker record, the uid registry and all timers.
//! Inputs arrive on three mailboxes and are handled one at a time by
//! synchronous handlers that never await:
//!
//! ```text
//! Supervisor ──Request (+ oneshot)──┐
//! Timer tasks ──Tick──────────────────┼──► SupervisorRuntime::handle
//! Worker handles ──HandleEvent──────┘            │
//!                                                 ├─► WorkerHandle::{send, disconnect, kill}
//!                                                 ├─► Stat::observe + Bus::publish
//!                                                 └─► oneshot replies
//! ```
//!
//! ## Worker record lifecycle
//! ```text
//! spawn ─► Starting ──"up"──► Up ──exit──► (restart timer) ─► spawn same uid
//!             │                │
//!             │ start timer    │ remove (shutdown + kill timer)
//!             ▼                ▼
//!         Disconnected ──exit──► record dropped, worker.stop, continuations run
//! ```
//!
//! ## Rules
//! - A pending start resolves exactly once: `up`, exit, or timeout-then-exit
//! - `worker.stop` is published once per instance, when its exit is observed
//! - Removing a `Disconnected` worker only queues one more exit continuation
//! - After `stop` begins, mutating requests resolve with `ShuttingDown`
//! - A panicking handler is logged and treated as `stop`

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::TimeoutConfig;
use crate::core::registry::UidRegistry;
use crate::core::timers::{Timer, TimerId, TimerSet};
use crate::core::{Uid, WorkerId, WorkerInfo, WorkerSnapshot, WorkerState};
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::handles::{
    HandleEvent, HandleEvents, Signal, Spawn, SpawnRequest, WorkerExit, WorkerHandle,
};
use crate::protocol::{Command, Message};
use crate::subscribers::Stat;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SupervisorError>>;

/// Operations requested through [`Supervisor`](crate::Supervisor).
pub(crate) enum Request {
    AddWorker {
        app_type: String,
        uid: Option<Uid>,
        reply: Reply<WorkerId>,
    },
    RemoveWorker {
        id: WorkerId,
        reply: Reply<()>,
    },
    RestartWorker {
        id: WorkerId,
        reply: Reply<WorkerId>,
    },
    KillWorker {
        id: WorkerId,
        signal: Signal,
        reply: Reply<()>,
    },
    FreeUid {
        uid: Uid,
        reply: Reply<()>,
    },
    Workers {
        app_type: Option<String>,
        reply: oneshot::Sender<Vec<WorkerSnapshot>>,
    },
    Worker {
        id: WorkerId,
        reply: oneshot::Sender<Option<WorkerSnapshot>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

impl Request {
    /// Resolves a mutating request without performing it.
    fn reject(self) {
        match self {
            Request::AddWorker { reply, .. } | Request::RestartWorker { reply, .. } => {
                let _ = reply.send(Err(SupervisorError::ShuttingDown));
            }
            Request::RemoveWorker { reply, .. }
            | Request::KillWorker { reply, .. }
            | Request::FreeUid { reply, .. } => {
                let _ = reply.send(Err(SupervisorError::ShuttingDown));
            }
            Request::Workers { .. } | Request::Worker { .. } | Request::Stop { .. } => {}
        }
    }
}

/// Elapsed timers.
#[derive(Debug)]
pub(crate) enum Tick {
    Start {
        id: WorkerId,
        timer: TimerId,
    },
    Kill {
        id: WorkerId,
        timer: TimerId,
    },
    Restart {
        app_type: String,
        uid: Uid,
        timer: TimerId,
    },
}

enum Input {
    Request(Request),
    Tick(Tick),
    Handle(HandleEvent),
}

/// What happens once a start attempt resolves.
enum StartThen {
    /// Answer the caller of `add_worker`.
    Reply(Reply<WorkerId>),
    /// On success remove `old`, answering once it is gone.
    Replace { old: WorkerId, reply: Reply<WorkerId> },
    /// Scheduled restart; failures are only logged.
    Detached,
}

impl StartThen {
    fn fail(self, err: SupervisorError) {
        tracing::error!(error = %err, "worker start failed");
        match self {
            StartThen::Reply(reply) | StartThen::Replace { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            StartThen::Detached => {}
        }
    }
}

struct PendingStart {
    timer: Option<Timer>,
    then: StartThen,
    timed_out: bool,
}

/// Continuations run when a worker's exit is observed.
enum OnExit {
    Reply(Reply<()>),
    Replaced {
        new_id: WorkerId,
        reply: Reply<WorkerId>,
    },
    ScheduleRestart,
}

struct WorkerRecord {
    info: WorkerInfo,
    state: WorkerState,
    handle: Box<dyn WorkerHandle>,
    start: Option<PendingStart>,
    kill_timer: Option<Timer>,
    on_exit: Vec<OnExit>,
}

impl WorkerRecord {
    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            info: self.info.clone(),
            state: self.state,
        }
    }
}

enum StopPhase {
    Running,
    Stopping(Vec<oneshot::Sender<()>>),
    Stopped,
}

/// Mailboxes of a runtime, created together with it.
pub(crate) struct Mailboxes {
    requests: mpsc::UnboundedReceiver<Request>,
    ticks: mpsc::UnboundedReceiver<Tick>,
    events: mpsc::UnboundedReceiver<HandleEvent>,
}

pub(crate) struct SupervisorRuntime {
    timeouts: TimeoutConfig,
    spawner: Arc<dyn Spawn>,
    bus: Bus,
    stat: Stat,

    tick_tx: mpsc::UnboundedSender<Tick>,
    events_tx: HandleEvents,

    workers: BTreeMap<WorkerId, WorkerRecord>,
    uids: UidRegistry,
    restarts: TimerSet<Uid>,
    next_id: WorkerId,
    phase: StopPhase,
}

impl SupervisorRuntime {
    /// Creates the runtime plus the request sender used by the public API.
    pub(crate) fn new(
        timeouts: TimeoutConfig,
        spawner: Arc<dyn Spawn>,
        bus: Bus,
        stat: Stat,
    ) -> (Self, mpsc::UnboundedSender<Request>, Mailboxes) {
        let (req_tx, requests) = mpsc::unbounded_channel();
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let rt = Self {
            timeouts,
            spawner,
            bus,
            stat,
            tick_tx,
            events_tx,
            workers: BTreeMap::new(),
            uids: UidRegistry::new(),
            restarts: TimerSet::default(),
            next_id: 1,
            phase: StopPhase::Running,
        };
        (
            rt,
            req_tx,
            Mailboxes {
                requests,
                ticks,
                events,
            },
        )
    }

    /// Runs until every request sender is dropped.
    pub(crate) async fn run(mut self, mut mb: Mailboxes) {
        loop {
            let input = tokio::select! {
                biased;
                Some(ev) = mb.events.recv() => Input::Handle(ev),
                Some(tick) = mb.ticks.recv() => Input::Tick(tick),
                req = mb.requests.recv() => match req {
                    Some(req) => Input::Request(req),
                    None => break,
                },
            };
            self.dispatch(input);
        }
        tracing::debug!(workers = self.workers.len(), "supervisor runtime exited");
    }

    fn dispatch(&mut self, input: Input) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.handle(input)));
        if let Err(payload) = outcome {
            let info = crate::subscribers::panic_message(payload.as_ref());
            tracing::error!(%info, "supervisor handler panicked, stopping");
            self.begin_stop(None);
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Request(req) => self.on_request(req),
            Input::Tick(tick) => self.on_tick(tick),
            Input::Handle(HandleEvent::Message { id, message }) => self.on_message(id, message),
            Input::Handle(HandleEvent::Exit { id, exit }) => self.on_exit(id, exit),
        }
    }

    fn is_stopping(&self) -> bool {
        !matches!(self.phase, StopPhase::Running)
    }

    fn emit(&self, ev: Event) {
        self.stat.observe(&ev);
        self.bus.publish(ev);
    }

    // === requests ===

    fn on_request(&mut self, req: Request) {
        match req {
            Request::Workers { app_type, reply } => {
                let list = self
                    .workers
                    .values()
                    .filter(|r| app_type.as_deref().map_or(true, |t| r.info.app_type == t))
                    .map(WorkerRecord::snapshot)
                    .collect();
                let _ = reply.send(list);
            }
            Request::Worker { id, reply } => {
                let _ = reply.send(self.workers.get(&id).map(WorkerRecord::snapshot));
            }
            Request::Stop { reply } => self.begin_stop(Some(reply)),
            req if self.is_stopping() => req.reject(),
            Request::AddWorker {
                app_type,
                uid,
                reply,
            } => self.add_worker(app_type, uid, StartThen::Reply(reply)),
            Request::RemoveWorker { id, reply } => {
                self.remove_worker(id, Some(OnExit::Reply(reply)));
            }
            Request::RestartWorker { id, reply } => self.restart_worker(id, reply),
            Request::KillWorker { id, signal, reply } => {
                let res = match self.workers.get_mut(&id) {
                    None => Err(SupervisorError::not_found(id)),
                    Some(rec) => {
                        if let Err(e) = rec.handle.kill(signal) {
                            tracing::warn!(id, uid = %rec.info.uid, error = %e, "cannot signal worker");
                        }
                        Ok(())
                    }
                };
                let _ = reply.send(res);
            }
            Request::FreeUid { uid, reply } => {
                let res = if self.restarts.contains(&uid) {
                    Err(SupervisorError::UidInUse { uid })
                } else {
                    self.uids.free(&uid)
                };
                let _ = reply.send(res);
            }
        }
    }

    fn add_worker(&mut self, app_type: String, uid: Option<Uid>, then: StartThen) {
        if app_type.is_empty() || app_type.contains(':') || app_type.contains('/') {
            return then.fail(SupervisorError::Config {
                reason: format!("invalid application type {app_type:?}"),
            });
        }
        let uid = match uid {
            Some(uid) => {
                if UidRegistry::type_of(&uid) != Some(app_type.as_str()) {
                    return then.fail(SupervisorError::Config {
                        reason: format!("uid {uid} does not belong to type {app_type}"),
                    });
                }
                self.uids.reserve(&app_type, &uid);
                uid
            }
            None => self.uids.generate(&app_type),
        };
        self.restarts.cancel(&uid);

        let id = self.next_id;
        self.next_id += 1;
        let req = SpawnRequest {
            id,
            app_type,
            uid,
        };

        let handle = match self.spawner.spawn(&req, self.events_tx.clone()) {
            Ok(handle) => handle,
            Err(source) => {
                self.uids.release(&req.app_type, &req.uid);
                return then.fail(SupervisorError::Spawn {
                    app_type: req.app_type,
                    source,
                });
            }
        };

        let timer = Timer::arm(self.timeouts.start, self.tick_tx.clone(), move |timer| {
            Tick::Start { id, timer }
        });
        let info = WorkerInfo {
            id,
            app_type: req.app_type,
            uid: req.uid,
            pid: handle.pid(),
        };
        tracing::debug!(id, uid = %info.uid, pid = ?info.pid, "worker starting");

        self.workers.insert(
            id,
            WorkerRecord {
                info,
                state: WorkerState::Starting,
                handle,
                start: Some(PendingStart {
                    timer: Some(timer),
                    then,
                    timed_out: false,
                }),
                kill_timer: None,
                on_exit: Vec::new(),
            },
        );
    }

    /// Starts a graceful removal; an unknown `id` answers a waiting caller
    /// with `NotFound`.
    fn remove_worker(&mut self, id: WorkerId, action: Option<OnExit>) {
        let Some(rec) = self.workers.get_mut(&id) else {
            if let Some(OnExit::Reply(reply)) = action {
                let _ = reply.send(Err(SupervisorError::not_found(id)));
            }
            return;
        };
        rec.on_exit.extend(action);
        if rec.state == WorkerState::Disconnected {
            return;
        }
        if let Some(start) = rec.start.as_mut() {
            start.timer = None;
        }

        rec.kill_timer = Some(Timer::arm(
            self.timeouts.kill,
            self.tick_tx.clone(),
            move |timer| Tick::Kill { id, timer },
        ));
        if let Err(e) = rec.handle.send(Command::Shutdown) {
            tracing::debug!(id, uid = %rec.info.uid, error = %e, "cannot deliver shutdown");
        }
        rec.handle.disconnect();
        rec.state = WorkerState::Disconnected;
        tracing::info!(id, uid = %rec.info.uid, "worker disconnecting");
    }

    fn restart_worker(&mut self, id: WorkerId, reply: Reply<WorkerId>) {
        let Some(rec) = self.workers.get(&id) else {
            let _ = reply.send(Err(SupervisorError::not_found(id)));
            return;
        };
        tracing::info!(id, uid = %rec.info.uid, "restarting worker");
        let (app_type, uid) = (rec.info.app_type.clone(), rec.info.uid.clone());
        self.add_worker(app_type, Some(uid), StartThen::Replace { old: id, reply });
    }

    // === worker messages ===

    fn on_message(&mut self, id: WorkerId, message: Message) {
        let Some(rec) = self.workers.get(&id) else {
            return;
        };
        if rec.state == WorkerState::Disconnected {
            tracing::trace!(id, %message, "message from disconnected worker dropped");
            return;
        }
        let info = rec.info.clone();
        let state = rec.state;

        match message {
            Message::Up if state == WorkerState::Starting => self.on_up(id),
            Message::Up => {}
            Message::MemoryUsage(bytes) => self.emit(
                Event::new(EventKind::WorkerMemoryUsage)
                    .with_worker(info)
                    .with_bytes(bytes),
            ),
            Message::Error => self.emit(Event::new(EventKind::WorkerError).with_worker(info)),
            Message::Warning => {
                self.emit(Event::new(EventKind::WorkerWarning).with_worker(info))
            }
            Message::RestartMe if self.is_stopping() => {}
            Message::RestartMe => {
                // nobody waits for a self-requested restart
                let (reply, _) = oneshot::channel();
                self.restart_worker(id, reply);
            }
            Message::DisconnectMe if state == WorkerState::Starting => {
                self.remove_worker(id, None);
            }
            Message::DisconnectMe => {
                self.remove_worker(id, Some(OnExit::ScheduleRestart));
            }
        }
    }

    fn on_up(&mut self, id: WorkerId) {
        let Some(rec) = self.workers.get_mut(&id) else {
            return;
        };
        rec.state = WorkerState::Up;
        let start = rec.start.take();
        let info = rec.info.clone();

        tracing::info!(id, uid = %info.uid, pid = ?info.pid, "worker added");
        self.emit(Event::new(EventKind::WorkerStart).with_worker(info));

        match start.map(|s| s.then) {
            Some(StartThen::Reply(reply)) => {
                let _ = reply.send(Ok(id));
            }
            Some(StartThen::Replace { old, reply }) => {
                if self.workers.contains_key(&old) {
                    self.remove_worker(old, Some(OnExit::Replaced { new_id: id, reply }));
                } else {
                    let _ = reply.send(Ok(id));
                }
            }
            Some(StartThen::Detached) | None => {}
        }
    }

    // === timers ===

    fn on_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Start { id, timer } => {
                let Some(rec) = self.workers.get_mut(&id) else {
                    return;
                };
                let Some(start) = rec
                    .start
                    .as_mut()
                    .filter(|s| s.timer.as_ref().map(Timer::id) == Some(timer))
                else {
                    return;
                };
                start.timer = None;
                start.timed_out = true;
                tracing::warn!(id, uid = %rec.info.uid, timeout = ?self.timeouts.start, "worker failed to start in time");
                self.remove_worker(id, None);
            }
            Tick::Kill { id, timer } => {
                let Some(rec) = self.workers.get_mut(&id) else {
                    return;
                };
                if rec.kill_timer.as_ref().map(Timer::id) != Some(timer) {
                    return;
                }
                rec.kill_timer = None;
                tracing::warn!(id, uid = %rec.info.uid, "worker failed to exit, sending SIGKILL");
                if let Err(e) = rec.handle.kill(Signal::SIGKILL) {
                    tracing::warn!(id, error = %e, "cannot kill worker");
                }
            }
            Tick::Restart {
                app_type,
                uid,
                timer,
            } => {
                if self.restarts.take_fired(&uid, timer) && !self.is_stopping() {
                    self.add_worker(app_type, Some(uid), StartThen::Detached);
                }
            }
        }
    }

    // === exits ===

    fn on_exit(&mut self, id: WorkerId, exit: WorkerExit) {
        let Some(mut rec) = self.workers.remove(&id) else {
            return;
        };
        rec.kill_timer = None;
        self.uids.release(&rec.info.app_type, &rec.info.uid);

        tracing::info!(id, uid = %rec.info.uid, %exit, "worker disconnected");
        self.emit(
            Event::new(EventKind::WorkerStop)
                .with_worker(rec.info.clone())
                .with_reason(exit.to_string()),
        );

        if let Some(start) = rec.start.take() {
            let err = if start.timed_out {
                SupervisorError::StartTimeout {
                    uid: rec.info.uid.clone(),
                    timeout: self.timeouts.start,
                }
            } else {
                SupervisorError::StartFailure {
                    uid: rec.info.uid.clone(),
                }
            };
            start.then.fail(err);
        }

        // an exit while up was not requested by anyone
        let mut restart = rec.state == WorkerState::Up;
        for action in rec.on_exit.drain(..) {
            match action {
                OnExit::Reply(reply) => {
                    let _ = reply.send(Ok(()));
                }
                OnExit::Replaced { new_id, reply } => {
                    let _ = reply.send(Ok(new_id));
                }
                OnExit::ScheduleRestart => restart = true,
            }
        }
        if restart {
            self.schedule_restart(&rec.info);
        }

        if matches!(self.phase, StopPhase::Stopping(_)) && self.workers.is_empty() {
            self.finish_stop();
        }
    }

    fn schedule_restart(&mut self, info: &WorkerInfo) {
        if self.is_stopping() {
            return;
        }
        tracing::warn!(uid = %info.uid, delay = ?self.timeouts.restart, "restarting worker");
        let (app_type, uid) = (info.app_type.clone(), info.uid.clone());
        let key = uid.clone();
        let timer = Timer::arm(self.timeouts.restart, self.tick_tx.clone(), move |timer| {
            Tick::Restart {
                app_type,
                uid,
                timer,
            }
        });
        self.restarts.arm(key, timer);
    }

    // === stop ===

    fn begin_stop(&mut self, reply: Option<oneshot::Sender<()>>) {
        match &mut self.phase {
            StopPhase::Stopped => {
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return;
            }
            StopPhase::Stopping(waiters) => {
                waiters.extend(reply);
                return;
            }
            StopPhase::Running => {}
        }

        tracing::info!(workers = self.workers.len(), "stopping cluster");
        self.phase = StopPhase::Stopping(reply.into_iter().collect());
        self.restarts.clear();
        for rec in self.workers.values_mut() {
            if let Some(start) = rec.start.as_mut() {
                start.timer = None;
            }
        }

        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for id in ids {
            self.remove_worker(id, None);
        }
        if self.workers.is_empty() {
            self.finish_stop();
        }
    }

    fn finish_stop(&mut self) {
        let waiters = match std::mem::replace(&mut self.phase, StopPhase::Stopped) {
            StopPhase::Stopping(waiters) => waiters,
            _ => Vec::new(),
        };
        tracing::info!("cluster stopped");
        self.emit(Event::new(EventKind::Stop));
        for w in waiters {
            let _ = w.send(());
        }
    }
}
