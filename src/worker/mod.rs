//! # Worker side: running the application inside a supervised process.
//!
//! A worker process is the same program as the master, started with the
//! `WORKERVISOR_*` environment set (see [`Role`](crate::Role)). It runs one
//! [`Application`] and talks to the master over stdin/stdout.
//!
//! - [`Application`] / [`AppFn`]: the user hook (start, stop);
//! - [`WorkerContext`]: identity plus reporting back to the master;
//! - [`WorkerProcess`]: the protocol loop.

mod app;
mod context;
mod memory;
mod process;

pub use app::{AppError, AppFn, Application};
pub use context::WorkerContext;
pub use process::{WorkerProcess, WorkerStatus};
