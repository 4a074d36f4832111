//! # Example: web_cluster
//!
//! A tiny HTTP responder run as a fleet of workers sharing one listening
//! socket.
//!
//! Shows how to:
//! - Write an [`Application`] with a start and a stop hook.
//! - Accept on the socket shared by the master ([`WorkerContext::shared_listener`]).
//! - Report warnings back to the master's statistics.
//! - Attach the built-in [`LogWriter`] subscriber on the master.
//!
//! ## Flow
//! ```text
//! master: Supervisor::start()
//!   ├─► bind 127.0.0.1:8080 (inheritable)
//!   ├─► re-exec self × 2 with WORKERVISOR_WORKER_TYPE=web
//!   └─► wait for SIGINT/SIGTERM ──► stop()
//!
//! worker: WorkerProcess::run()
//!   ├─► WebApp::start() ──► accept loop on the shared socket
//!   ├─► "up", memoryUsage every second
//!   └─► "shutdown" ──► WebApp::stop()
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example web_cluster --features logging [config.json]
//! curl http://127.0.0.1:8080/
//! ```
//!
//! Logs go to stderr: a worker's stdout is its channel to the master.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use workervisor::{
    AppError, Application, Config, LogWriter, Role, Subscribe, WorkerContext,
};

struct WebApp;

struct Server {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl Application for WebApp {
    type Handle = Server;

    async fn start(&self, ctx: &WorkerContext) -> Result<Option<Server>, AppError> {
        let listener = match ctx.shared_listener()? {
            Some(listener) => listener,
            None => tokio::net::TcpListener::bind("127.0.0.1:0").await?,
        };
        tracing::info!(addr = %listener.local_addr()?, "serving");

        let token = CancellationToken::new();
        let ctx = ctx.clone();
        let stop = token.clone();
        let task = tokio::spawn(async move {
            loop {
                let conn = tokio::select! {
                    _ = stop.cancelled() => break,
                    conn = listener.accept() => conn,
                };
                match conn {
                    Ok((stream, _)) => {
                        tokio::spawn(respond(stream, ctx.uid().cloned().unwrap_or_default()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        ctx.report_warning();
                    }
                }
            }
        });
        Ok(Some(Server { token, task }))
    }

    async fn stop(&self, server: Option<Server>) -> Result<(), AppError> {
        if let Some(server) = server {
            server.token.cancel();
            server.task.await?;
        }
        Ok(())
    }
}

async fn respond(mut stream: tokio::net::TcpStream, uid: String) {
    let mut buf = [0u8; 1024];
    if stream.read(&mut buf).await.is_err() {
        return;
    }
    let body = format!("hello from {uid} (pid {})\n", std::process::id());
    let resp = format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes()).await;
}

fn load_config() -> Result<Config, workervisor::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => Config::from_path(path),
        None => {
            let mut cfg = Config::default().with_app("web", 2);
            cfg.name = "web-cluster".into();
            cfg.listen = Some("127.0.0.1:8080".into());
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let role = Role::from_env();
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    workervisor::run_with_subscribers(role, cfg, WebApp, subs).await?;
    Ok(())
}
