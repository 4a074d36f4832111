//! OS-process backed [`WorkerHandle`], shared by both spawners.
//!
//! Each launched worker gets two tasks:
//! - a writer draining queued commands into the child's stdin (dropping the
//!   queue closes stdin, which the worker treats as `shutdown`);
//! - a pump reading newline-delimited messages from the child's stdout and
//!   reporting the exit once the output is drained.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as OsCommand};
use tokio::sync::mpsc;

use crate::core::WorkerId;
use crate::protocol::{Command, Message};
use crate::role::{ENV_WORKER_ID, ENV_WORKER_TYPE, ENV_WORKER_UID};

use super::{HandleEvent, HandleEvents, SpawnRequest, WorkerExit, WorkerHandle};

/// Grace period for reading output written right before exit.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&mut self, cmd: Command) -> io::Result<()> {
        let tx = self
            .commands
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;
        tx.send(cmd)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin closed"))
    }

    fn disconnect(&mut self) {
        self.commands = None;
    }

    fn kill(&mut self, sig: Signal) -> io::Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no pid"))?;
        signal::kill(Pid::from_raw(pid as i32), sig).map_err(io::Error::from)
    }
}

/// Injects the worker identity and wires the pipes.
pub(crate) fn prepare(cmd: &mut OsCommand, req: &SpawnRequest) {
    cmd.env(ENV_WORKER_TYPE, &req.app_type)
        .env(ENV_WORKER_UID, &req.uid)
        .env(ENV_WORKER_ID, req.id.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);
}

/// Spawns the prepared command and starts its writer and pump tasks.
pub(crate) fn launch(
    mut cmd: OsCommand,
    req: &SpawnRequest,
    events: HandleEvents,
) -> io::Result<Box<dyn WorkerHandle>> {
    prepare(&mut cmd, req);
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("worker stdout not captured"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdin) = stdin {
        tokio::spawn(write_commands(stdin, rx));
    }
    tokio::spawn(pump(req.id, child, stdout, events));

    tracing::debug!(id = req.id, uid = %req.uid, ?pid, "worker process spawned");
    Ok(Box::new(ProcessHandle {
        pid,
        commands: Some(tx),
    }))
}

async fn write_commands(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        let line = format!("{cmd}\n");
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "worker stdin write failed");
            break;
        }
        let _ = stdin.flush().await;
    }
    // dropping stdin closes the pipe
}

async fn pump(id: WorkerId, mut child: Child, stdout: ChildStdout, events: HandleEvents) {
    let mut lines = BufReader::new(stdout).lines();

    let status = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => forward(id, &line, &events),
                Ok(None) | Err(_) => break child.wait().await,
            },
            status = child.wait() => {
                while let Ok(Ok(Some(line))) =
                    tokio::time::timeout(DRAIN_TIMEOUT, lines.next_line()).await
                {
                    forward(id, &line, &events);
                }
                break status;
            }
        }
    };

    let exit = match status {
        Ok(status) => exit_of(status),
        Err(e) => {
            tracing::warn!(id, error = %e, "cannot collect worker exit status");
            WorkerExit::default()
        }
    };
    let _ = events.send(HandleEvent::Exit { id, exit });
}

fn forward(id: WorkerId, line: &str, events: &HandleEvents) {
    match line.parse::<Message>() {
        Ok(message) => {
            let _ = events.send(HandleEvent::Message { id, message });
        }
        Err(e) => tracing::debug!(id, %e, "ignoring worker output"),
    }
}

fn exit_of(status: std::process::ExitStatus) -> WorkerExit {
    use std::os::unix::process::ExitStatusExt;

    WorkerExit {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> OsCommand {
        let mut cmd = OsCommand::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn req() -> SpawnRequest {
        SpawnRequest {
            id: 1,
            app_type: "web".into(),
            uid: "web:01".into(),
        }
    }

    #[tokio::test]
    async fn messages_precede_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = launch(
            sh("echo up; echo garbage; echo memoryUsage:42; exit 3"),
            &req(),
            tx,
        )
        .unwrap();
        assert!(handle.pid().is_some());

        let mut got = Vec::new();
        while let Some(ev) = rx.recv().await {
            let done = matches!(ev, HandleEvent::Exit { .. });
            got.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(
            got,
            vec![
                HandleEvent::Message { id: 1, message: Message::Up },
                HandleEvent::Message { id: 1, message: Message::MemoryUsage(42) },
                HandleEvent::Exit { id: 1, exit: WorkerExit::code(3) },
            ]
        );
    }

    #[tokio::test]
    async fn identity_is_injected_and_shutdown_is_delivered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = launch(
            sh(r#"echo up; read cmd; [ "$cmd" = shutdown ] && [ "$WORKERVISOR_WORKER_UID" = web:01 ] && exit 0; exit 9"#),
            &req(),
            tx,
        )
        .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(HandleEvent::Message { id: 1, message: Message::Up })
        );
        handle.send(Command::Shutdown).unwrap();
        handle.disconnect();
        assert!(handle.send(Command::Shutdown).is_err());
        assert_eq!(
            rx.recv().await,
            Some(HandleEvent::Exit { id: 1, exit: WorkerExit::code(0) })
        );
    }

    #[tokio::test]
    async fn kill_reports_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = launch(sh("echo up; exec sleep 30"), &req(), tx).unwrap();
        assert!(matches!(rx.recv().await, Some(HandleEvent::Message { .. })));

        handle.kill(Signal::SIGKILL).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(HandleEvent::Exit { id: 1, exit: WorkerExit::signal(Signal::SIGKILL) })
        );
    }
}
