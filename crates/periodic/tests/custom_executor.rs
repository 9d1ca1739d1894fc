// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "test code")]

//! Tests for running a `PeriodicTask` without Tokio.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use periodic::{CancellationToken, Error, Executor, PeriodicTask, StartMode};

/// An executor backed by plain OS threads.
fn thread_executor() -> Executor {
    Executor::new_custom(
        |work| {
            std::thread::spawn(move || futures::executor::block_on(work));
        },
        |duration| {
            let (tx, rx) = oneshot::channel::<()>();
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                let _ = tx.send(());
            });
            rx.map(|_| ()).boxed()
        },
    )
}

#[test]
fn runs_on_plain_threads() {
    let (tx, rx) = mpsc::channel();
    let task = PeriodicTask::builder()
        .executor(thread_executor())
        .period(Duration::from_millis(5))
        .callback(move || {
            let _ = tx.send(std::thread::current().id());
        })
        .build();

    task.start(StartMode::Delayed).unwrap();
    for _ in 0..3 {
        let thread = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_ne!(thread, std::thread::current().id());
    }

    futures::executor::block_on(task.stop());
    assert!(!task.is_running());
}

#[test]
fn canceled_outcome_is_not_reported() {
    let errors = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = mpsc::channel();
    let executor = {
        let errors = Arc::clone(&errors);
        thread_executor().with_error_handler(move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        })
    };

    let task = PeriodicTask::new();
    task.set_executor(executor);
    task.set_cancelable_callback(move |token: CancellationToken| {
        let _ = entered_tx.send(());
        async move {
            token.cancelled().await;
            Err::<(), _>(Error::Canceled)
        }
    });

    task.start(StartMode::Immediate).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    futures::executor::block_on(task.stop());

    assert!(!task.is_running());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[test]
fn failure_is_reported_to_custom_handler() {
    let (error_tx, error_rx) = mpsc::channel();
    let executor = thread_executor().with_error_handler(move |error| {
        let _ = error_tx.send(error.to_string());
    });

    let task = PeriodicTask::new();
    task.set_executor(executor);
    task.set_callback(|| async { Err::<(), _>(std::io::Error::other("disk full")) });

    task.start(StartMode::Immediate).unwrap();
    let error = error_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(error, "periodic callback failed: disk full");
    assert!(!task.is_running());
}

#[test]
fn inline_executor_does_not_deadlock() {
    let calls = Arc::new(AtomicUsize::new(0));
    let task = Arc::new(PeriodicTask::new());
    task.set_executor(Executor::new_custom(
        |work| {
            let _ = work.now_or_never();
        },
        |_| futures::future::ready(()).boxed(),
    ));
    {
        let calls = Arc::clone(&calls);
        let weak = Arc::downgrade(&task);
        task.set_callback(move || {
            if calls.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                return;
            }

            if let Some(task) = weak.upgrade() {
                drop(task.stop());
            }
        });
    }

    // Every cycle runs inline on this thread; the third invocation stops the loop.
    task.start(StartMode::Immediate).unwrap();

    assert!(!task.is_running());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn inline_executor_runs_many_cycles_without_nesting() {
    const CYCLES: usize = 20_000;

    let calls = Arc::new(AtomicUsize::new(0));
    let task = Arc::new(PeriodicTask::new());
    task.set_executor(Executor::new_custom(
        |work| {
            let _ = work.now_or_never();
        },
        |_| futures::future::ready(()).boxed(),
    ));
    task.set_period(Duration::from_millis(1));
    {
        let calls = Arc::clone(&calls);
        let weak = Arc::downgrade(&task);
        task.set_callback(move || {
            if calls.fetch_add(1, Ordering::SeqCst) + 1 < CYCLES {
                return;
            }

            if let Some(task) = weak.upgrade() {
                drop(task.stop());
            }
        });
    }

    // All cycles run on this thread inside `start`; the stack must not grow with them.
    task.start(StartMode::Delayed).unwrap();

    assert!(!task.is_running());
    assert_eq!(calls.load(Ordering::SeqCst), CYCLES);
}
