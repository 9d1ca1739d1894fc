// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! Runs an async callback repeatedly, with a fixed pause between invocations.
//!
//! This crate provides [`PeriodicTask`], a primitive for background maintenance loops
//! such as heartbeats, flush timers, and health checks. The pause is measured from the
//! end of one invocation to the start of the next, so invocations never overlap, however
//! long the callback takes.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use periodic::{Error, PeriodicTask, StartMode};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let task = PeriodicTask::new();
//! task.set_period(Duration::from_secs(5));
//! task.set_callback(|| async {
//!     println!("heartbeat");
//!     Ok::<(), Error>(())
//! });
//!
//! task.start(StartMode::Immediate).unwrap();
//!
//! // ...
//!
//! task.shutdown().await;
//! # }
//! ```
//!
//! # Lifecycle
//!
//! A task is created stopped. [`PeriodicTask::start`] begins the loop, either waiting one
//! period first ([`StartMode::Delayed`]) or invoking the callback right away
//! ([`StartMode::Immediate`]). [`PeriodicTask::stop`] returns a future that resolves once
//! the in-flight invocation has unwound; both operations are idempotent and safe to call
//! concurrently, including from within the callback.
//!
//! A callback that panics or resolves with an error stops the loop. The error is reported
//! through [`Executor::signal_error`]; by default it is logged with `tracing`.
//!
//! # Cancellation
//!
//! Stopping interrupts a pending wait immediately. A callback that is already running is
//! never aborted; register it with [`PeriodicTask::set_cancelable_callback`] to observe
//! the [`CancellationToken`] of the current cycle and return [`Error::Canceled`] early.
//!
//! # Runtimes
//!
//! [`Executor`] abstracts over the async runtime. Tokio is supported out of the box;
//! any other runtime can be plugged in with [`Executor::new_custom`].

mod builder;
mod callback;
mod error;
mod executor;
mod task;
mod timer;

#[cfg(test)]
mod testing;

pub use builder::PeriodicTaskBuilder;
pub use callback::{AsyncFn, Callback, IntoCallback, PlainFn};
pub use error::{BoxError, Error, Result};
pub use executor::Executor;
pub use task::{PeriodicTask, StartMode};
pub use tokio_util::sync::CancellationToken;
