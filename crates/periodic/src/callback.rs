// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{BoxError, Error};

type CallbackFn = dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;

/// The type-erased callback invoked by a [`PeriodicTask`](crate::PeriodicTask).
///
/// Every callback form accepted by the task is normalized into this type: it receives the
/// cancellation token of the current cycle and returns a boxed future. Obtain one through
/// [`IntoCallback`] or [`Callback::cancelable`].
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    /// Creates a callback that observes the cancellation token of each cycle.
    ///
    /// The token is cancelled when the task is stopped while the callback runs. Resolving
    /// with [`Error::Canceled`] at that point ends the loop without reporting an error.
    pub fn cancelable<F, Fut, E>(callback: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self(Arc::new(move |token| callback(token).map(|r| r.map_err(Error::from_callback)).boxed()))
    }

    pub(crate) fn call(&self, token: CancellationToken) -> BoxFuture<'static, Result<(), Error>> {
        (self.0)(token)
    }
}

impl Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

/// Conversion into a [`Callback`].
///
/// Implemented for two kinds of zero-argument closures and functions, so callers do not
/// need to distinguish them:
///
/// - async callables returning `impl Future<Output = Result<(), E>>` where `E: Into<BoxError>`,
/// - plain side-effecting callables returning `()`, which are treated as completing immediately.
///
/// The `Marker` parameter only disambiguates the two implementations and is always inferred.
///
/// # Examples
///
/// ```
/// use periodic::{Error, PeriodicTask};
///
/// let task = PeriodicTask::new();
///
/// // Plain callable.
/// task.set_callback(|| println!("flush"));
///
/// // Async callable.
/// task.set_callback(|| async {
///     println!("heartbeat");
///     Ok::<(), Error>(())
/// });
/// ```
pub trait IntoCallback<Marker>: Send + Sync + 'static {
    /// Performs the conversion.
    fn into_callback(self) -> Callback;
}

/// Marker for callables returning a future. See [`IntoCallback`].
#[derive(Debug)]
pub struct AsyncFn<Fut, E>(PhantomData<fn() -> (Fut, E)>);

/// Marker for plain callables. See [`IntoCallback`].
#[derive(Debug)]
pub struct PlainFn;

impl<F, Fut, E> IntoCallback<AsyncFn<Fut, E>> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn into_callback(self) -> Callback {
        Callback::cancelable(move |_| self())
    }
}

impl<F> IntoCallback<PlainFn> for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn into_callback(self) -> Callback {
        Callback(Arc::new(move |_| {
            self();
            futures::future::ready(Ok(())).boxed()
        }))
    }
}

impl IntoCallback<Self> for Callback {
    fn into_callback(self) -> Callback {
        self
    }
}
