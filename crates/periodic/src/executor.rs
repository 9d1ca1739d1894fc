// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`Executor`] for plugging in runtime implementations.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::Error;

type SpawnFn = dyn Fn(BoxFuture<'static, ()>) + Send + Sync;
type DelayFn = dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync;
type ErrorFn = dyn Fn(Error) + Send + Sync;

/// Runtime-agnostic execution context of a [`PeriodicTask`](crate::PeriodicTask).
///
/// An executor does three things for a periodic task:
///
/// - runs each cycle of the task as a detached unit of work,
/// - provides the delay that separates two invocations of the callback,
/// - receives errors that have no other consumer, such as a failing callback.
///
/// Use [`Executor::new_tokio`] (the default) or [`Executor::from_tokio_handle`] for Tokio,
/// or [`Executor::new_custom`] for any other runtime.
///
/// Unless [`Executor::with_error_handler`] is used, reported errors are logged through
/// `tracing` at the `ERROR` level.
///
/// # Examples
///
/// Using Tokio:
///
/// ```rust
/// use periodic::Executor;
///
/// # #[tokio::main]
/// # async fn main() {
/// let executor = Executor::new_tokio();
/// let (tx, rx) = tokio::sync::oneshot::channel();
///
/// executor.post(async move {
///     let _ = tx.send(42);
/// });
///
/// assert_eq!(rx.await.unwrap(), 42);
/// # }
/// ```
///
/// ## Custom Runtime
///
/// ```rust
/// use std::time::Duration;
///
/// use futures::FutureExt;
/// use periodic::Executor;
///
/// let executor = Executor::new_custom(
///     |work| {
///         std::thread::spawn(move || futures::executor::block_on(work));
///     },
///     |duration| {
///         let (tx, rx) = futures::channel::oneshot::channel::<()>();
///         std::thread::spawn(move || {
///             std::thread::sleep(duration);
///             let _ = tx.send(());
///         });
///         rx.map(|_| ()).boxed()
///     },
/// );
/// # drop(executor);
/// ```
#[derive(Clone)]
pub struct Executor {
    kind: ExecutorKind,
    on_error: Option<Arc<ErrorFn>>,
}

#[derive(Clone)]
enum ExecutorKind {
    Tokio(Option<tokio::runtime::Handle>),
    Custom { spawn: Arc<SpawnFn>, delay: Arc<DelayFn> },
}

impl Executor {
    /// Creates an executor that uses the Tokio runtime of the calling context.
    ///
    /// The runtime is looked up whenever work is posted, so the executor itself can be
    /// created anywhere.
    ///
    /// # Panics
    ///
    /// [`Executor::post`] panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self {
            kind: ExecutorKind::Tokio(None),
            on_error: None,
        }
    }

    /// Creates an executor that posts work to the Tokio runtime behind `handle`.
    ///
    /// Unlike [`Executor::new_tokio`], this can be used from threads that are not part
    /// of any runtime.
    #[must_use]
    pub fn from_tokio_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            kind: ExecutorKind::Tokio(Some(handle)),
            on_error: None,
        }
    }

    /// Creates a custom executor from a spawn closure and a delay closure.
    ///
    /// `spawn` receives a boxed future and is responsible for driving it to completion
    /// on the appropriate runtime. `delay` returns a future that completes after the given
    /// duration; it is dropped early when the task is stopped during a wait.
    pub fn new_custom<S, D>(spawn: S, delay: D) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
        D: Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            kind: ExecutorKind::Custom {
                spawn: Arc::new(spawn),
                delay: Arc::new(delay),
            },
            on_error: None,
        }
    }

    /// Routes errors reported through [`Executor::signal_error`] to `handler`.
    ///
    /// The handler is never called while the internal state of a periodic task is locked,
    /// so it may freely inspect or restart the task that reported the error.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Posts a unit of work for detached execution.
    pub fn post(&self, work: impl Future<Output = ()> + Send + 'static) {
        match &self.kind {
            ExecutorKind::Tokio(None) => drop(tokio::spawn(work)),
            ExecutorKind::Tokio(Some(handle)) => drop(handle.spawn(work)),
            ExecutorKind::Custom { spawn, .. } => spawn(work.boxed()),
        }
    }

    /// Returns a future that completes after `duration` has elapsed.
    ///
    /// A zero duration does not involve the runtime's timers. On Tokio it yields to the
    /// scheduler once, so a loop with a zero period cannot starve other tasks; a custom
    /// executor gets a future that is ready right away.
    #[must_use]
    pub fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
        match &self.kind {
            ExecutorKind::Tokio(_) if duration.is_zero() => tokio::task::yield_now().boxed(),
            ExecutorKind::Tokio(_) => tokio::time::sleep(duration).boxed(),
            ExecutorKind::Custom { .. } if duration.is_zero() => futures::future::ready(()).boxed(),
            ExecutorKind::Custom { delay, .. } => delay(duration),
        }
    }

    /// Reports an error that has no other consumer.
    pub fn signal_error(&self, error: Error) {
        match &self.on_error {
            Some(handler) => handler(error),
            None => {
                tracing::event!(
                    name: "periodic.error",
                    tracing::Level::ERROR,
                    error = %error,
                    "unhandled periodic task error"
                );
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new_tokio()
    }
}

impl Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ExecutorKind::Tokio(_) => "Tokio",
            ExecutorKind::Custom { .. } => "Custom",
        };

        f.debug_struct("Executor")
            .field("kind", &kind)
            .field("error_handler", &self.on_error.is_some())
            .finish()
    }
}
