// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::builder::PeriodicTaskBuilder;
use crate::callback::{Callback, IntoCallback};
use crate::{BoxError, Error, Executor, Result, timer};

/// How [`PeriodicTask::start`] schedules the first invocation of the callback.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Wait one full period before the first invocation.
    #[default]
    Delayed,

    /// Invoke the callback right away, then continue with the usual waits.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Invoking,
}

/// Repeatedly invokes a callback, pausing for a period between the end of one invocation
/// and the start of the next.
///
/// Each repetition is a *cycle*: a wait for the current period followed by one invocation
/// of the callback. All cycles started by one call to [`PeriodicTask::start`] are driven by
/// a single unit of work posted on the executor, so cycles never overlap and no thread is
/// blocked while waiting.
///
/// The loop ends when:
///
/// - [`PeriodicTask::stop`] is called; a pending wait is interrupted and the callback of an
///   in-flight invocation can observe cancellation through its token (see
///   [`PeriodicTask::set_cancelable_callback`]),
/// - the callback panics or its future resolves with an error other than
///   [`Error::Canceled`]; the error is reported through [`Executor::signal_error`].
///
/// There is no retry: after a failure the task is stopped and must be started again.
///
/// # Dropping
///
/// Dropping a task stops it. A task that is waiting for its next invocation stops on the
/// spot. If the callback is in flight, the drop blocks the current thread until that
/// invocation has unwound, so no invocation of the callback outlives the task. When the
/// executor needs the dropping thread to make progress (for example a current-thread
/// Tokio runtime), call [`PeriodicTask::shutdown`] instead of dropping a task whose
/// callback may be running.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use periodic::{Error, PeriodicTask, StartMode};
///
/// # #[tokio::main]
/// # async fn main() {
/// let task = PeriodicTask::new();
/// task.set_period(Duration::from_millis(10));
/// task.set_callback(|| async {
///     // flush buffers, send a heartbeat, ...
///     Ok::<(), Error>(())
/// });
///
/// task.start(StartMode::Immediate).unwrap();
/// assert!(task.is_running());
///
/// task.stop().await;
/// assert!(!task.is_running());
/// # }
/// ```
pub struct PeriodicTask {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
}

struct State {
    status: Status,
    period: Duration,
    callback: Option<Callback>,
    executor: Executor,
    // The in-flight cycle. Cleared when the loop ends or a waiting cycle is stopped.
    cycle: Option<Cycle>,
    next_cycle_id: u64,
}

struct Cycle {
    id: u64,
    token: CancellationToken,
    phase: Phase,
    done: Shared<BoxFuture<'static, ()>>,
    done_tx: oneshot::Sender<()>,
}

impl Cycle {
    /// Resolves every pending stop of this cycle. Call without holding the state lock.
    fn finish(self) {
        let _ = self.done_tx.send(());
    }
}

/// The part of a cycle the loop needs once the state lock is released.
struct Step {
    id: u64,
    token: CancellationToken,
    wait: Option<Duration>,
}

impl State {
    /// Registers a new in-flight cycle. The previous one, if any, must have been taken out.
    fn begin_cycle(&mut self, wait: Option<Duration>) -> Step {
        debug_assert!(self.cycle.is_none(), "a cycle is already in flight");

        let id = self.next_cycle_id;
        self.next_cycle_id = self.next_cycle_id.wrapping_add(1);

        let token = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        self.cycle = Some(Cycle {
            id,
            token: token.clone(),
            phase: Phase::Waiting,
            done: done_rx.map(|_| ()).boxed().shared(),
            done_tx,
        });

        Step { id, token, wait }
    }

    fn is_current(&self, id: u64) -> bool {
        self.cycle.as_ref().is_some_and(|cycle| cycle.id == id)
    }
}

/// A loop that has been registered but not yet posted.
///
/// Posting happens after the state lock is released, because an executor may run
/// the work inline.
struct Launch {
    executor: Executor,
    work: BoxFuture<'static, ()>,
}

impl Launch {
    fn post(self) {
        self.executor.post(self.work);
    }
}

impl PeriodicTask {
    /// Creates a stopped task with no callback, a zero period, and the default executor.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(Duration::ZERO, None, Executor::default())
    }

    /// Creates a builder for configuring a task in one expression.
    #[must_use]
    pub fn builder() -> PeriodicTaskBuilder {
        PeriodicTaskBuilder::new()
    }

    pub(crate) fn with_parts(period: Duration, callback: Option<Callback>, executor: Executor) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    status: Status::Stopped,
                    period,
                    callback,
                    executor,
                    cycle: None,
                    next_cycle_id: 0,
                }),
            }),
        }
    }

    /// Sets the pause between two invocations.
    ///
    /// The new period applies to waits scheduled after this call; a wait that is already
    /// in progress keeps its original length.
    pub fn set_period(&self, period: Duration) {
        self.inner.state.lock().period = period;
    }

    /// Sets the callback, either a plain callable or one returning a future.
    ///
    /// The callback is read at every invocation, so replacing it while the task runs
    /// affects the next invocation.
    pub fn set_callback<M>(&self, callback: impl IntoCallback<M>) {
        self.inner.state.lock().callback = Some(callback.into_callback());
    }

    /// Sets a callback that receives the cancellation token of the current cycle.
    ///
    /// The token is cancelled when [`PeriodicTask::stop`] is called during the invocation.
    /// Resolving with [`Error::Canceled`] then ends the loop silently. Callbacks that do not
    /// check the token simply run to completion.
    pub fn set_cancelable_callback<F, Fut, E>(&self, callback: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner.state.lock().callback = Some(Callback::cancelable(callback));
    }

    /// Sets the executor used for waiting, invoking the callback, and reporting errors.
    ///
    /// A running loop keeps the executor it was started with; the new one is used from
    /// the next [`PeriodicTask::start`].
    pub fn set_executor(&self, executor: Executor) {
        self.inner.state.lock().executor = executor;
    }

    /// Starts the periodic loop.
    ///
    /// Starting a running task does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCallback`] if no callback has been set, and
    /// [`Error::NotFullyStopped`] if a previous [`PeriodicTask::stop`] has not completed yet.
    ///
    /// # Panics
    ///
    /// With [`Executor::new_tokio`], panics if called outside of a Tokio runtime context.
    pub fn start(&self, mode: StartMode) -> Result<()> {
        let launch = {
            let mut state = self.inner.state.lock();

            if state.callback.is_none() {
                return Err(Error::MissingCallback);
            }

            match state.status {
                Status::Stopping => return Err(Error::NotFullyStopped),
                Status::Running => return Ok(()),
                Status::Stopped => {}
            }

            state.status = Status::Running;
            let wait = match mode {
                StartMode::Delayed => Some(state.period),
                StartMode::Immediate => None,
            };

            self.inner.launch(&mut state, wait)
        };

        tracing::event!(
            name: "periodic.start",
            tracing::Level::DEBUG,
            immediate = mode == StartMode::Immediate,
            "periodic task started"
        );

        launch.post();
        Ok(())
    }

    /// Shorthand for `start(StartMode::Immediate)`.
    ///
    /// # Errors
    ///
    /// Same as [`PeriodicTask::start`].
    pub fn start_now(&self) -> Result<()> {
        self.start(StartMode::Immediate)
    }

    /// Requests the loop to stop and returns a future that resolves once it has.
    ///
    /// A pending wait is interrupted right away and the task is stopped before this method
    /// returns. An invocation in progress has its token cancelled and is awaited to
    /// completion; the next cycle is never scheduled.
    ///
    /// Stopping is idempotent: every call made before the teardown completes resolves with
    /// it, and stopping a stopped task resolves immediately. The returned future never
    /// reports callback errors and dropping it does not interrupt the teardown.
    ///
    /// Do not await the returned future from within the callback; the invocation would be
    /// waiting for itself.
    pub fn stop(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, finished) = {
            let mut state = self.inner.state.lock();
            let phase = state.cycle.as_ref().map(|cycle| cycle.phase);

            match (state.status, phase) {
                (Status::Stopped, _) => (None, None),
                (Status::Stopping, Some(_)) => (state.cycle.as_ref().map(|cycle| cycle.done.clone()), None),
                (Status::Running, Some(Phase::Invoking)) => {
                    state.status = Status::Stopping;
                    let cycle = state.cycle.as_ref().map(|cycle| {
                        cycle.token.cancel();
                        tracing::event!(name: "periodic.stop", tracing::Level::DEBUG, cycle.id = cycle.id, "periodic task stopping");
                        cycle.done.clone()
                    });
                    (cycle, None)
                }
                // Nothing user-supplied runs yet; the loop notices the cancellation on its own.
                (Status::Running, Some(Phase::Waiting)) => {
                    state.status = Status::Stopped;
                    let cycle = state.cycle.take();
                    if let Some(cycle) = &cycle {
                        cycle.token.cancel();
                        tracing::event!(name: "periodic.stop", tracing::Level::DEBUG, cycle.id = cycle.id, "periodic task stopping");
                    }
                    (None, cycle)
                }
                // The last cycle ended on a cancellation outcome; nothing is left to wait for.
                (_, None) => {
                    state.status = Status::Stopped;
                    (None, None)
                }
            }
        };

        if let Some(cycle) = finished {
            cycle.finish();
            tracing::event!(name: "periodic.stopped", tracing::Level::DEBUG, failed = false, "periodic task stopped");
        }

        async move {
            if let Some(done) = done {
                done.await;
            }
        }
    }

    /// Stops the task and waits for the teardown without blocking a thread.
    pub async fn shutdown(self) {
        self.stop().await;
    }

    /// Returns `true` if the loop is running.
    ///
    /// This is a snapshot; a concurrent stop or a failing callback may change it right after.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().status == Status::Running
    }
}

impl Default for PeriodicTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        futures::executor::block_on(self.stop());
    }
}

impl Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("PeriodicTask")
            .field("status", &state.status)
            .field("period", &state.period)
            .field("executor", &state.executor)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Registers the first cycle of a new loop and returns the loop, ready to be posted.
    ///
    /// `wait` is `None` when the first invocation happens without waiting.
    fn launch(self: &Arc<Self>, state: &mut State, wait: Option<Duration>) -> Launch {
        let first = state.begin_cycle(wait);
        let executor = state.executor.clone();

        // Created before posting, so the state is finalized even if the executor
        // discards the work without polling it.
        let guard = LoopGuard {
            inner: Arc::clone(self),
            id: first.id,
        };

        Launch {
            work: Self::run(guard, executor.clone(), first).boxed(),
            executor,
        }
    }

    /// Drives wait → invoke → reschedule until the loop ends.
    ///
    /// The loop exits as soon as its cycle is no longer the in-flight one, which is how a
    /// stop during a wait or a failure is observed.
    async fn run(mut guard: LoopGuard, executor: Executor, first: Step) {
        let inner = Arc::clone(&guard.inner);
        let mut step = first;

        loop {
            guard.id = step.id;

            tracing::event!(name: "periodic.cycle", tracing::Level::TRACE, cycle.id = step.id, cycle.period = ?step.wait);

            if let Some(period) = step.wait {
                if timer::wait(&executor, period, &step.token).await.is_err() {
                    return;
                }
            }

            let Some(callback) = inner.enter_call(step.id) else {
                return;
            };

            match inner.call(&executor, &callback, step).await {
                Some(next) => step = next,
                None => return,
            }
        }
    }

    /// Marks the cycle as invoking and returns the callback, unless the cycle was stopped.
    fn enter_call(&self, id: u64) -> Option<Callback> {
        let mut state = self.state.lock();

        if state.status != Status::Running {
            return None;
        }

        let cycle = state.cycle.as_mut().filter(|cycle| cycle.id == id)?;
        cycle.phase = Phase::Invoking;
        state.callback.clone()
    }

    /// Invokes the callback once and returns the next cycle if the loop continues.
    async fn call(&self, executor: &Executor, callback: &Callback, step: Step) -> Option<Step> {
        let future = match panic::catch_unwind(AssertUnwindSafe(|| callback.call(step.token))) {
            Ok(future) => future,
            Err(payload) => {
                self.fail(executor, Error::panicked(payload.as_ref()));
                return None;
            }
        };

        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(Error::panicked(payload.as_ref())),
        };

        match outcome {
            Ok(()) => self.reschedule(step.id),
            // Expected end of a cooperative stop; the loop guard finalizes the state.
            Err(Error::Canceled) => None,
            Err(error) => {
                self.fail(executor, error);
                None
            }
        }
    }

    /// Replaces the finished cycle with the next one unless the task is winding down.
    fn reschedule(&self, id: u64) -> Option<Step> {
        let (next, previous) = {
            let mut state = self.state.lock();

            if state.status != Status::Running || !state.is_current(id) {
                return None;
            }

            let previous = state.cycle.take();
            let period = state.period;
            (state.begin_cycle(Some(period)), previous)
        };

        if let Some(previous) = previous {
            previous.finish();
        }

        Some(next)
    }

    /// Terminates the loop after a callback failure and reports the failure.
    fn fail(&self, executor: &Executor, error: Error) {
        let finished = {
            let mut state = self.state.lock();
            state.status = Status::Stopped;
            state.cycle.take()
        };

        if let Some(cycle) = finished {
            cycle.finish();
        }

        tracing::event!(name: "periodic.stopped", tracing::Level::DEBUG, failed = true, "periodic task stopped");
        executor.signal_error(error);
    }
}

/// Finalizes the loop when its work returns or is dropped by the executor.
///
/// If the loop's cycle is still the in-flight one, the loop ended without scheduling a
/// successor: a pending stop completes here. Completion is signaled only after the state
/// is final, so everyone awaiting [`PeriodicTask::stop`] observes a stopped task.
struct LoopGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let (finished, stopped) = {
            let mut state = self.inner.state.lock();

            if state.is_current(self.id) {
                let stopped = state.status == Status::Stopping;
                if stopped {
                    state.status = Status::Stopped;
                }
                (state.cycle.take(), stopped)
            } else {
                (None, false)
            }
        };

        if stopped {
            tracing::event!(name: "periodic.stopped", tracing::Level::DEBUG, failed = false, "periodic task stopped");
        }

        if let Some(cycle) = finished {
            cycle.finish();
        }
    }
}
