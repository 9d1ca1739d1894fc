// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::callback::{Callback, IntoCallback};
use crate::{BoxError, Executor, PeriodicTask};

/// Builder for [`PeriodicTask`].
///
/// Equivalent to creating a task with [`PeriodicTask::new`] and calling its setters,
/// but reads better when the configuration is known up front.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use periodic::{Executor, PeriodicTask};
///
/// let task = PeriodicTask::builder()
///     .period(Duration::from_secs(30))
///     .callback(|| println!("health check"))
///     .executor(Executor::new_tokio())
///     .build();
///
/// assert!(!task.is_running());
/// ```
#[derive(Debug, Default)]
#[must_use]
pub struct PeriodicTaskBuilder {
    period: Duration,
    callback: Option<Callback>,
    executor: Option<Executor>,
}

impl PeriodicTaskBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sets the pause between two invocations. Defaults to zero.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the callback. See [`PeriodicTask::set_callback`].
    pub fn callback<M>(mut self, callback: impl IntoCallback<M>) -> Self {
        self.callback = Some(callback.into_callback());
        self
    }

    /// Sets a callback that observes cancellation. See [`PeriodicTask::set_cancelable_callback`].
    pub fn cancelable_callback<F, Fut, E>(mut self, callback: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.callback = Some(Callback::cancelable(callback));
        self
    }

    /// Sets the executor. Defaults to [`Executor::default`].
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Creates the task in the stopped state.
    pub fn build(self) -> PeriodicTask {
        PeriodicTask::with_parts(self.period, self.callback, self.executor.unwrap_or_default())
    }
}
