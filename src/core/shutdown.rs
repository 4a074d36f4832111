//! # OS signal handling.
//!
//! - [`wait_for_shutdown_signal`]: master side, completes on the first
//!   termination signal.
//! - [`termination_signals`]: a stream of SIGINT/SIGTERM deliveries. The
//!   master registers it before spawning anything; on a worker each delivery
//!   becomes a `disconnectme`.
//!
//! ## Signals
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)

use tokio::signal::unix::{Signal, SignalKind, signal};

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    termination_signals()?.recv().await;
    Ok(())
}

/// Repeated SIGINT/SIGTERM listener.
pub(crate) struct TerminationSignals {
    sigint: Signal,
    sigterm: Signal,
}

/// Registers the signal listeners.
///
/// Registration replaces the default disposition: the process no longer dies
/// on these signals.
pub(crate) fn termination_signals() -> std::io::Result<TerminationSignals> {
    Ok(TerminationSignals {
        sigint: signal(SignalKind::interrupt())?,
        sigterm: signal(SignalKind::terminate())?,
    })
}

impl TerminationSignals {
    /// Completes on the next delivery; `None` once the driver is gone.
    pub(crate) async fn recv(&mut self) -> Option<()> {
        tokio::select! {
            s = self.sigint.recv()  => s,
            s = self.sigterm.recv() => s,
        }
    }
}
