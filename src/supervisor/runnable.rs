//! # Runnable abstraction for supervised execution.
//!
//! A [`Runnable`] is an async, cancelable unit of work executed under a
//! supervision tree. Runnables receive a [`RunContext`] carrying their
//! identity (dn), cancellation token and the supervisor API.
//!
//! ## Rules
//! - `run(&self)` takes `&self` and may be called again after a restart:
//!   each call must produce a **fresh**, independent future. Shared state
//!   goes through an explicit `Arc` inside the implementation.
//! - Runnables must exit promptly once their context is canceled, and
//!   must return [`RunnableError::Canceled`] in that case.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::error::RunnableError;

use super::handle::RunContext;

/// Boxed future returned by [`Runnable::run`].
pub type BoxRunnableFuture =
    Pin<Box<dyn Future<Output = Result<(), RunnableError>> + Send + 'static>>;

/// Shared handle to a runnable object.
pub type RunnableRef = Arc<dyn Runnable>;

/// Asynchronous, cancelable, restartable unit of work.
pub trait Runnable: Send + Sync + 'static {
    /// Creates a new future running the runnable until completion or
    /// cancellation.
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture;
}

impl<F, Fut> Runnable for F
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RunnableError>> + Send + 'static,
{
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture {
        Box::pin((self)(ctx))
    }
}

/// Wraps a closure into a shared [`RunnableRef`].
///
/// ```rust
/// use clustervisor::{runnable_fn, RunContext, RunnableError};
///
/// let r = runnable_fn(|ctx: RunContext| async move {
///     ctx.cancelled().await;
///     Err(RunnableError::Canceled)
/// });
/// ```
pub fn runnable_fn<F, Fut>(f: F) -> RunnableRef
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RunnableError>> + Send + 'static,
{
    Arc::new(f)
}
