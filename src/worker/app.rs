//! # Application hook run inside every worker.
//!
//! [`Application::start`] brings the user program up and may return a handle;
//! [`Application::stop`] receives that handle back on shutdown.
//!
//! [`AppFn`] wraps closures for the common case where no dedicated type is
//! needed.
//!
//! ## Example
//! ```rust
//! use workervisor::{AppError, AppFn, Application, WorkerContext};
//!
//! let app = AppFn::new(|ctx: WorkerContext| async move {
//!     let name = format!("{} worker", ctx.app_type());
//!     Ok::<_, AppError>(Some(name))
//! })
//! .with_stop(|name: Option<String>| async move {
//!     drop(name);
//!     Ok(())
//! });
//! # fn assert_app<A: Application>(_: &A) {}
//! # assert_app(&app);
//! ```

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::context::WorkerContext;

/// Error returned by application hooks.
pub type AppError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # User program run by a worker process.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use workervisor::{AppError, Application, WorkerContext};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Application for Echo {
///     type Handle = tokio::task::JoinHandle<()>;
///
///     async fn start(&self, ctx: &WorkerContext) -> Result<Option<Self::Handle>, AppError> {
///         let ctx = ctx.clone();
///         Ok(Some(tokio::spawn(async move {
///             ctx.report_warning();
///         })))
///     }
///
///     async fn stop(&self, handle: Option<Self::Handle>) -> Result<(), AppError> {
///         if let Some(h) = handle {
///             h.abort();
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Whatever `start` wants back in `stop` (a server, a join handle, ...).
    type Handle: Send + 'static;

    /// Starts the program. `Ok` makes the worker report `up`.
    async fn start(&self, ctx: &WorkerContext) -> Result<Option<Self::Handle>, AppError>;

    /// Stops the program started by [`start`](Application::start).
    async fn stop(&self, handle: Option<Self::Handle>) -> Result<(), AppError> {
        drop(handle);
        Ok(())
    }
}

type StopFn<H> = Box<dyn Fn(Option<H>) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Closure-backed [`Application`].
///
/// The start closure receives an owned [`WorkerContext`] and produces a fresh
/// future per call; an optional stop closure receives the handle.
pub struct AppFn<F, H> {
    start: F,
    stop: Option<StopFn<H>>,
}

impl<F, H> AppFn<F, H> {
    /// Wraps a start closure; stopping is a no-op until
    /// [`with_stop`](AppFn::with_stop) is set.
    pub fn new(start: F) -> Self {
        Self { start, stop: None }
    }

    /// Sets the stop closure.
    pub fn with_stop<S, Fut>(mut self, stop: S) -> Self
    where
        S: Fn(Option<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.stop = Some(Box::new(move |handle| Box::pin(stop(handle))));
        self
    }
}

#[async_trait]
impl<F, Fut, H> Application for AppFn<F, H>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<H>, AppError>> + Send + 'static,
    H: Send + 'static,
{
    type Handle = H;

    async fn start(&self, ctx: &WorkerContext) -> Result<Option<H>, AppError> {
        (self.start)(ctx.clone()).await
    }

    async fn stop(&self, handle: Option<H>) -> Result<(), AppError> {
        match &self.stop {
            Some(stop) => stop(handle).await,
            None => Ok(()),
        }
    }
}
