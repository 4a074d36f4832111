//! # WorkerProcess: the worker side of the protocol.
//!
//! ```text
//! run()
//!   start(ctx) ──Ok──► Started: memoryUsage (now, then every 1s), "up"
//!       │                 │
//!       │ Err / panic     ├─ notices (error, warning, restartme, ...) ──► master
//!       ▼                 ├─ fatal / SIGINT / SIGTERM ──► "disconnectme"
//!   WorkerError::Start    └─ "shutdown" or EOF ──► stop(handle) ──► Stopped
//! ```
//!
//! ## Rules
//! - `up` is sent only after a successful start
//! - A fatal error asks for `disconnectme` right away, even during start
//! - A shutdown that arrives before start completes abandons the start
//! - Stopping happens once; a fatal error while stopping ends the process
//! - Write failures mean the master is gone; they are logged, not returned

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::context::{Notice, WorkerContext};
use super::{memory, Application};
use crate::config::Config;
use crate::core::{set_process_title, termination_signals, TerminationSignals};
use crate::error::WorkerError;
use crate::protocol::{Command, Message};
use crate::role::WorkerIdentity;
use crate::subscribers::panic_message;

const MEMORY_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Local lifecycle of the application inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Started,
    Stopped,
}

/// Runs an [`Application`] under the control of a master.
pub struct WorkerProcess<A: Application> {
    cfg: Config,
    identity: WorkerIdentity,
    app: A,
    status: watch::Sender<WorkerStatus>,
}

impl<A: Application> WorkerProcess<A> {
    pub fn new(cfg: Config, identity: WorkerIdentity, app: A) -> Self {
        let (status, _) = watch::channel(WorkerStatus::Starting);
        Self {
            cfg,
            identity,
            app,
            status,
        }
    }

    /// Watches the local status.
    pub fn status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Serves the master over stdin/stdout until shutdown.
    ///
    /// Sets the process title, installs SIGINT/SIGTERM listeners and a panic
    /// hook that turns panics anywhere in the process into fatal errors.
    pub async fn run(self) -> Result<(), WorkerError> {
        set_process_title(&self.cfg.worker_title(&self.identity.app_type));
        let signals = termination_signals()?;
        let (tx, rx) = mpsc::unbounded_channel();
        install_panic_hook(tx.clone());

        let reader = BufReader::new(tokio::io::stdin());
        self.serve(reader, tokio::io::stdout(), Some(signals), tx, rx)
            .await
    }

    /// Serves the master over the given channel, without signal handling.
    pub async fn run_with_io<R, W>(self, reader: R, writer: W) -> Result<(), WorkerError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.serve(reader, writer, None, tx, rx).await
    }

    async fn serve<R, W>(
        self,
        reader: R,
        writer: W,
        signals: Option<TerminationSignals>,
        tx: mpsc::UnboundedSender<Notice>,
        rx: mpsc::UnboundedReceiver<Notice>,
    ) -> Result<(), WorkerError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let span = tracing::info_span!(
            "worker",
            title = %self.cfg.worker_title(&self.identity.app_type),
            uid = self.identity.uid.as_deref().unwrap_or("-"),
        );
        let link = Link {
            lines: reader.lines(),
            writer,
            open: true,
        };
        let ctx = WorkerContext::new(self.identity, tx);
        Session {
            app: self.app,
            status: self.status,
            ctx,
            link,
            notices: rx,
            signals,
            fatal_reported: false,
        }
        .drive()
        .instrument(span)
        .await
    }
}

struct Session<A: Application, R, W> {
    app: A,
    status: watch::Sender<WorkerStatus>,
    ctx: WorkerContext,
    link: Link<R, W>,
    notices: mpsc::UnboundedReceiver<Notice>,
    signals: Option<TerminationSignals>,
    fatal_reported: bool,
}

impl<A, R, W> Session<A, R, W>
where
    A: Application,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn drive(mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.start().await? else {
            return Ok(());
        };

        self.status.send_replace(WorkerStatus::Started);
        self.report_memory().await;
        self.link.send(Message::Up).await;
        tracing::info!("worker started");

        self.serve_master().await;
        self.stop(handle).await
    }

    /// `Ok(None)` when the master asked to shut down before start completed.
    async fn start(&mut self) -> Result<Option<Option<A::Handle>>, WorkerError> {
        let start = AssertUnwindSafe(self.app.start(&self.ctx)).catch_unwind();
        tokio::pin!(start);

        loop {
            tokio::select! {
                res = &mut start => {
                    let err: crate::worker::AppError = match res {
                        Ok(Ok(handle)) => return Ok(Some(handle)),
                        Ok(Err(e)) => e,
                        Err(panic) => panic_message(panic.as_ref()).into(),
                    };
                    tracing::error!(error = %err, "failed to start");
                    self.status.send_replace(WorkerStatus::Stopped);
                    return Err(WorkerError::Start(err));
                }
                cmd = self.link.recv() => {
                    tracing::info!(?cmd, "shutdown before start completed");
                    self.status.send_replace(WorkerStatus::Stopped);
                    return Ok(None);
                }
                Some(notice) = self.notices.recv() => {
                    forward(&mut self.link, &mut self.fatal_reported, notice).await;
                }
                Some(()) = next_signal(&mut self.signals) => {
                    self.link.send(Message::DisconnectMe).await;
                }
            }
        }
    }

    async fn serve_master(&mut self) {
        let mut report = tokio::time::interval_at(
            Instant::now() + MEMORY_REPORT_INTERVAL,
            MEMORY_REPORT_INTERVAL,
        );
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.link.recv() => {
                    match cmd {
                        Some(Command::Shutdown) => tracing::debug!("shutdown received"),
                        None => tracing::info!("master channel closed"),
                    }
                    return;
                }
                _ = report.tick() => self.report_memory().await,
                Some(notice) = self.notices.recv() => {
                    forward(&mut self.link, &mut self.fatal_reported, notice).await;
                }
                Some(()) = next_signal(&mut self.signals) => {
                    tracing::info!("termination signal, asking master to disconnect");
                    self.link.send(Message::DisconnectMe).await;
                }
            }
        }
    }

    async fn stop(mut self, handle: Option<A::Handle>) -> Result<(), WorkerError> {
        let stop = AssertUnwindSafe(self.app.stop(handle)).catch_unwind();
        tokio::pin!(stop);

        let res = loop {
            tokio::select! {
                res = &mut stop => break res,
                Some(notice) = self.notices.recv() => match notice {
                    Notice::Send(message) => self.link.send(message).await,
                    Notice::Fatal(reason) => {
                        tracing::error!(%reason, "fatal error while stopping, exiting");
                        self.status.send_replace(WorkerStatus::Stopped);
                        return Err(WorkerError::FatalDuringShutdown { reason });
                    }
                },
            }
        };

        self.status.send_replace(WorkerStatus::Stopped);
        match res {
            Ok(Ok(())) => {
                tracing::info!("worker stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to stop");
                Err(WorkerError::Stop(e))
            }
            Err(panic) => Err(WorkerError::FatalDuringShutdown {
                reason: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn report_memory(&mut self) {
        if let Some(bytes) = memory::resident_set_size() {
            self.link.send(Message::MemoryUsage(bytes)).await;
        }
    }
}

/// Newline-delimited channel to the master.
struct Link<R, W> {
    lines: Lines<R>,
    writer: W,
    open: bool,
}

impl<R, W> Link<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn send(&mut self, message: Message) {
        if !self.open {
            return;
        }
        let line = format!("{message}\n");
        let res = match self.writer.write_all(line.as_bytes()).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            tracing::debug!(error = %e, %message, "master channel closed, message dropped");
            self.open = false;
        }
    }

    /// Next command; `None` once the master is gone.
    async fn recv(&mut self) -> Option<Command> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => match line.parse() {
                    Ok(cmd) => return Some(cmd),
                    Err(e) => tracing::debug!(error = %e, "ignoring line from master"),
                },
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read from master");
                    return None;
                }
            }
        }
    }
}

/// Passes a notice on to the master. The first fatal error asks to be
/// disconnected; later ones are only logged.
async fn forward<R, W>(link: &mut Link<R, W>, fatal_reported: &mut bool, notice: Notice)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match notice {
        Notice::Send(message) => link.send(message).await,
        Notice::Fatal(reason) => {
            tracing::error!(%reason, "fatal application error");
            if !*fatal_reported {
                *fatal_reported = true;
                link.send(Message::DisconnectMe).await;
            }
        }
    }
}

async fn next_signal(signals: &mut Option<TerminationSignals>) -> Option<()> {
    match signals {
        Some(s) => match s.recv().await {
            Some(()) => Some(()),
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

fn install_panic_hook(notices: mpsc::UnboundedSender<Notice>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let _ = notices.send(Notice::Fatal(info.to_string()));
    }));
}
