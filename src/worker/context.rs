use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{Uid, WorkerId};
use crate::protocol::Message;
use crate::role::WorkerIdentity;

/// Requests from the application to the worker loop.
#[derive(Debug)]
pub(crate) enum Notice {
    Send(Message),
    Fatal(String),
}

/// Handle given to the application, cheap to clone and `Send`.
///
/// Everything it sends is queued to the worker loop, which forwards it to
/// the master; calls never block.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    identity: Arc<WorkerIdentity>,
    notices: mpsc::UnboundedSender<Notice>,
    listener_taken: Arc<AtomicBool>,
}

impl WorkerContext {
    pub(crate) fn new(identity: WorkerIdentity, notices: mpsc::UnboundedSender<Notice>) -> Self {
        Self {
            identity: Arc::new(identity),
            notices,
            listener_taken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Application type this worker was started for.
    pub fn app_type(&self) -> &str {
        &self.identity.app_type
    }

    pub fn uid(&self) -> Option<&Uid> {
        self.identity.uid.as_ref()
    }

    pub fn id(&self) -> Option<WorkerId> {
        self.identity.id
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn send(&self, message: Message) {
        let _ = self.notices.send(Notice::Send(message));
    }

    /// Counts one error in the master's statistics.
    pub fn report_error(&self) {
        self.send(Message::Error);
    }

    /// Counts one warning in the master's statistics.
    pub fn report_warning(&self) {
        self.send(Message::Warning);
    }

    /// Asks the master for a replacement; this worker is shut down once it is up.
    pub fn request_restart(&self) {
        self.send(Message::RestartMe);
    }

    /// Asks the master to shut this worker down and start a new one.
    pub fn request_disconnect(&self) {
        self.send(Message::DisconnectMe);
    }

    /// Reports an unrecoverable error.
    ///
    /// While running, the worker asks to be replaced; while stopping, it exits
    /// right away.
    pub fn fatal(&self, reason: impl Into<String>) {
        let _ = self.notices.send(Notice::Fatal(reason.into()));
    }

    /// Takes the listening socket shared by the master (cluster spawn mode).
    ///
    /// Returns `Ok(None)` when the master shares no socket. The socket can be
    /// taken once per process.
    pub fn shared_listener(&self) -> io::Result<Option<tokio::net::TcpListener>> {
        let Some(fd) = self.identity.listen_fd else {
            return Ok(None);
        };
        if self.listener_taken.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "shared listener already taken",
            ));
        }
        let listener = from_inherited_fd(fd)?;
        listener.set_nonblocking(true)?;
        tokio::net::TcpListener::from_std(listener).map(Some)
    }
}

#[cfg(unix)]
fn from_inherited_fd(fd: i32) -> io::Result<std::net::TcpListener> {
    use std::os::fd::FromRawFd;

    if fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listener fd {fd}"),
        ));
    }
    // SAFETY: the fd was inherited from the master for this purpose and is
    // owned exclusively here, guarded by `listener_taken`.
    Ok(unsafe { std::net::TcpListener::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn from_inherited_fd(_fd: i32) -> io::Result<std::net::TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "socket sharing requires unix",
    ))
}
