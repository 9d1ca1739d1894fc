// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;

/// A type-erased error produced by a periodic callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The result type for fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur when driving a [`PeriodicTask`](crate::PeriodicTask).
///
/// Usage errors ([`Error::MissingCallback`], [`Error::NotFullyStopped`]) are returned
/// directly from [`PeriodicTask::start`](crate::PeriodicTask::start). Failures of the
/// callback itself have no caller to return to, so they are reported through the
/// executor's error channel (see [`Executor::with_error_handler`](crate::Executor::with_error_handler)).
///
/// [`Error::Canceled`] is not a failure: a callback returns it to signal that it observed
/// cancellation, and the task ends the loop without reporting anything.
///
/// # Examples
///
/// ```
/// use periodic::{Error, PeriodicTask, StartMode};
///
/// let task = PeriodicTask::new();
/// let error = task.start(StartMode::Delayed).unwrap_err();
///
/// assert!(matches!(error, Error::MissingCallback));
/// assert_eq!(error.to_string(), "callback must be set before the task is started");
/// ```
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The task was started before a callback was configured.
    #[error("callback must be set before the task is started")]
    MissingCallback,

    /// The task was started while a previous stop was still in progress.
    #[error("can't start a periodic task that is not fully stopped")]
    NotFullyStopped,

    /// The operation observed cancellation and ended early.
    #[error("operation canceled")]
    Canceled,

    /// The future returned by the callback resolved with an error.
    #[error("periodic callback failed: {0}")]
    Callback(#[source] BoxError),

    /// The callback panicked, either when called or while its future was polled.
    #[error("periodic callback panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Returns `true` if this error is the cancellation outcome.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Converts an error returned by a callback, keeping the identity of errors
    /// that already are of this type (most importantly [`Error::Canceled`]).
    pub(crate) fn from_callback(error: impl Into<BoxError>) -> Self {
        match error.into().downcast::<Self>() {
            Ok(error) => *error,
            Err(other) => Self::Callback(other),
        }
    }

    pub(crate) fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        Self::Panicked(message)
    }
}
