//! Cluster variant: re-executed workers inherit one listening TCP socket
//! bound by the master and accept on it concurrently.

use std::io;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};

use crate::error::SupervisorError;
use crate::role::ENV_LISTEN_FD;

use super::child::ChildSpawner;
use super::process::launch;
use super::{HandleEvents, Spawn, SpawnRequest, WorkerHandle};

/// Spawns workers that share the master's listening socket.
#[derive(Debug, Clone)]
pub struct ClusterSpawner {
    base: ChildSpawner,
    listener: Option<Arc<TcpListener>>,
}

impl ClusterSpawner {
    /// Wraps `base`, binding `listen` (if any) once for every worker.
    pub fn new(base: ChildSpawner, listen: Option<&str>) -> Result<Self, SupervisorError> {
        let listener = listen.map(|addr| bind_inheritable(addr)).transpose()?;
        if let Some(l) = &listener {
            tracing::info!(addr = ?l.local_addr().ok(), "shared listener bound");
        }
        Ok(Self {
            base,
            listener: listener.map(Arc::new),
        })
    }

    /// Re-executes the running binary with its own arguments.
    pub fn current_exe(listen: Option<&str>) -> Result<Self, SupervisorError> {
        Self::new(ChildSpawner::current_exe()?, listen)
    }

    /// Address of the shared socket.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn listen_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(|l| l.as_raw_fd())
    }
}

fn bind_inheritable(addr: &str) -> Result<TcpListener, SupervisorError> {
    let err = |source: io::Error| SupervisorError::Listen {
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(addr).map_err(err)?;
    fcntl(listener.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
        .map_err(|e| err(io::Error::from(e)))?;
    Ok(listener)
}

impl Spawn for ClusterSpawner {
    fn spawn(
        &self,
        req: &SpawnRequest,
        events: HandleEvents,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        let mut cmd = self.base.command();
        if let Some(fd) = self.listen_fd() {
            cmd.env(ENV_LISTEN_FD, fd.to_string());
        }
        launch(cmd, req, events)
    }
}
