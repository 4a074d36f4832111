//! # Worker handles: the master's view of one worker process.
//!
//! A [`Spawn`] implementation is chosen once at startup (from
//! [`Config::spawn`](crate::Config::spawn)) and produces one boxed
//! [`WorkerHandle`] per worker instance. The handle is owned by the supervisor
//! runtime; notifications travel back as [`HandleEvent`]s.
//!
//! ```text
//! SupervisorRuntime ──spawn(req, events)──► Spawn ──► Box<dyn WorkerHandle>
//!        ▲                                                │ send / disconnect / kill
//!        │                                                ▼
//!        └──── HandleEvent::{Message, Exit} ◄──── worker process (stdout / wait)
//! ```
//!
//! ## Contract
//! - `spawn` is synchronous; the process is running (or failed) on return
//! - events of one handle arrive in order, and every message the worker wrote
//!   before exiting is delivered before its `Exit`
//! - exactly one `Exit` per handle

mod child;
mod cluster;
mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use child::ChildSpawner;
pub use cluster::ClusterSpawner;

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

pub use nix::sys::signal::Signal;

use crate::config::{Config, SpawnMode};
use crate::core::{Uid, WorkerId};
use crate::error::SupervisorError;
use crate::protocol::{Command, Message};

/// Sender half handed to the spawner for one worker.
pub type HandleEvents = mpsc::UnboundedSender<HandleEvent>;

/// Notification from a worker handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    /// The worker sent a message.
    Message { id: WorkerId, message: Message },
    /// The worker process terminated.
    Exit { id: WorkerId, exit: WorkerExit },
}

/// How a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerExit {
    /// Exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if it was killed.
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: Signal) -> Self {
        Self {
            code: None,
            signal: Some(signal as i32),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(s) => write!(f, "killed by {}", s.as_str()),
                Err(_) => write!(f, "killed by signal {sig}"),
            },
            (None, None) => f.write_str("exited"),
        }
    }
}

/// What to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub id: WorkerId,
    pub app_type: String,
    pub uid: Uid,
}

/// Master-side control surface of one worker process.
pub trait WorkerHandle: Send {
    /// OS process id.
    fn pid(&self) -> Option<u32>;

    /// Queues a command for the worker.
    fn send(&mut self, cmd: Command) -> io::Result<()>;

    /// Closes the command channel; the worker sees end of input.
    fn disconnect(&mut self);

    /// Delivers a signal to the worker process.
    fn kill(&mut self, signal: Signal) -> io::Result<()>;
}

/// Factory for worker handles.
pub trait Spawn: Send + Sync + 'static {
    /// Starts one worker process.
    fn spawn(&self, req: &SpawnRequest, events: HandleEvents)
        -> io::Result<Box<dyn WorkerHandle>>;
}

/// Builds the spawner selected by `cfg.spawn`.
pub fn spawner_for(cfg: &Config) -> Result<Arc<dyn Spawn>, SupervisorError> {
    Ok(match cfg.spawn {
        SpawnMode::Child => Arc::new(ChildSpawner::current_exe()?),
        SpawnMode::Cluster => Arc::new(ClusterSpawner::current_exe(cfg.listen.as_deref())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_display() {
        assert_eq!(WorkerExit::code(1).to_string(), "exit code 1");
        assert_eq!(
            WorkerExit::signal(Signal::SIGKILL).to_string(),
            "killed by SIGKILL"
        );
        assert_eq!(WorkerExit::default().to_string(), "exited");
    }
}
