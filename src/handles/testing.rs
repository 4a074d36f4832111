//! In-process fake spawner for driving the supervisor without OS processes.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::WorkerId;
use crate::protocol::{Command, Message};

use super::{HandleEvent, HandleEvents, Signal, Spawn, SpawnRequest, WorkerExit, WorkerHandle};

/// How a fake worker reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Reports `up` right away, exits on `shutdown`.
    Up,
    /// Never reports `up`, exits on `shutdown`.
    NeverUp,
    /// Exits with code 1 before reporting `up`.
    CrashBeforeUp,
    /// Reports `up` and ignores `shutdown` (needs SIGKILL).
    IgnoreShutdown,
    /// Never reports `up` and ignores `shutdown`.
    Hang,
    /// Refuses to spawn.
    SpawnError,
}

struct FakeProc {
    events: HandleEvents,
    behavior: Behavior,
    exited: bool,
}

impl FakeProc {
    fn exit(&mut self, id: WorkerId, exit: WorkerExit) {
        if !self.exited {
            self.exited = true;
            let _ = self.events.send(HandleEvent::Exit { id, exit });
        }
    }
}

#[derive(Default)]
struct State {
    default: Option<Behavior>,
    per_type: HashMap<String, Behavior>,
    spawned: Vec<SpawnRequest>,
    procs: HashMap<WorkerId, FakeProc>,
    sent: Vec<(WorkerId, Command)>,
    disconnected: Vec<WorkerId>,
    killed: Vec<(WorkerId, Signal)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeSpawner {
    state: Arc<Mutex<State>>,
}

impl FakeSpawner {
    pub(crate) fn new(default: Behavior) -> Self {
        let me = Self::default();
        me.lock().default = Some(default);
        me
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Behavior for future spawns of `app_type`.
    pub(crate) fn set_behavior(&self, app_type: &str, behavior: Behavior) {
        self.lock().per_type.insert(app_type.to_string(), behavior);
    }

    /// Simulates an unexpected exit.
    pub(crate) fn crash(&self, id: WorkerId) {
        if let Some(p) = self.lock().procs.get_mut(&id) {
            p.exit(id, WorkerExit::code(1));
        }
    }

    /// Simulates a message from the worker.
    pub(crate) fn message(&self, id: WorkerId, message: Message) {
        if let Some(p) = self.lock().procs.get(&id) {
            let _ = p.events.send(HandleEvent::Message { id, message });
        }
    }

    pub(crate) fn spawned(&self) -> Vec<SpawnRequest> {
        self.lock().spawned.clone()
    }

    pub(crate) fn sent(&self) -> Vec<(WorkerId, Command)> {
        self.lock().sent.clone()
    }

    pub(crate) fn disconnected(&self) -> Vec<WorkerId> {
        self.lock().disconnected.clone()
    }

    pub(crate) fn killed(&self) -> Vec<(WorkerId, Signal)> {
        self.lock().killed.clone()
    }
}

impl Spawn for FakeSpawner {
    fn spawn(
        &self,
        req: &SpawnRequest,
        events: HandleEvents,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        let mut st = self.lock();
        let behavior = st
            .per_type
            .get(&req.app_type)
            .copied()
            .or(st.default)
            .unwrap_or(Behavior::Up);
        if behavior == Behavior::SpawnError {
            return Err(io::Error::new(io::ErrorKind::NotFound, "fake spawn error"));
        }
        st.spawned.push(req.clone());

        let mut proc = FakeProc {
            events,
            behavior,
            exited: false,
        };
        match behavior {
            Behavior::Up | Behavior::IgnoreShutdown => {
                let _ = proc.events.send(HandleEvent::Message {
                    id: req.id,
                    message: Message::Up,
                });
            }
            Behavior::CrashBeforeUp => proc.exit(req.id, WorkerExit::code(1)),
            Behavior::NeverUp | Behavior::Hang | Behavior::SpawnError => {}
        }
        st.procs.insert(req.id, proc);

        Ok(Box::new(FakeHandle {
            id: req.id,
            state: self.state.clone(),
        }))
    }
}

struct FakeHandle {
    id: WorkerId,
    state: Arc<Mutex<State>>,
}

impl WorkerHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(10_000 + self.id as u32)
    }

    fn send(&mut self, cmd: Command) -> io::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.sent.push((self.id, cmd));
        if let Some(p) = st.procs.get_mut(&self.id) {
            if !matches!(p.behavior, Behavior::IgnoreShutdown | Behavior::Hang) {
                p.exit(self.id, WorkerExit::code(0));
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.lock().unwrap().disconnected.push(self.id);
    }

    fn kill(&mut self, signal: Signal) -> io::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.killed.push((self.id, signal));
        if let Some(p) = st.procs.get_mut(&self.id) {
            p.exit(self.id, WorkerExit::signal(signal));
        }
        Ok(())
    }
}
