//! Plain child-process variant: the current program is re-executed with the
//! same arguments and the worker identity in its environment.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use tokio::process::Command as OsCommand;

use crate::error::SupervisorError;

use super::process::launch;
use super::{HandleEvents, Spawn, SpawnRequest, WorkerHandle};

/// Spawns workers as ordinary child processes (no socket sharing).
#[derive(Debug, Clone)]
pub struct ChildSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ChildSpawner {
    /// Spawns `program` with `args` for every worker.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-executes the running binary with its own arguments.
    pub fn current_exe() -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|source| SupervisorError::Spawn {
            app_type: "*".into(),
            source,
        })?;
        Ok(Self::new(program, std::env::args_os().skip(1).collect()))
    }

    pub(crate) fn command(&self) -> OsCommand {
        let mut cmd = OsCommand::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl Spawn for ChildSpawner {
    fn spawn(
        &self,
        req: &SpawnRequest,
        events: HandleEvents,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        launch(self.command(), req, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{HandleEvent, WorkerExit};
    use crate::protocol::Message;

    #[tokio::test]
    async fn spawns_program_with_args() {
        let spawner = ChildSpawner::new(
            "/bin/sh",
            vec!["-c".into(), r#"echo up; exit "$WORKERVISOR_WORKER_ID""#.into()],
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let req = SpawnRequest {
            id: 4,
            app_type: "jobs".into(),
            uid: "jobs:01".into(),
        };
        spawner.spawn(&req, tx).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(HandleEvent::Message { id: 4, message: Message::Up })
        );
        assert_eq!(
            rx.recv().await,
            Some(HandleEvent::Exit { id: 4, exit: WorkerExit::code(4) })
        );
    }

    #[tokio::test]
    async fn missing_program_fails_synchronously() {
        let spawner = ChildSpawner::new("/nonexistent/workervisor-test", Vec::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let req = SpawnRequest {
            id: 1,
            app_type: "web".into(),
            uid: "web:01".into(),
        };
        assert!(spawner.spawn(&req, tx).is_err());
    }
}
