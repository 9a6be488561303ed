//! Run an async operation, retrying failures with backoff.
//!
//! A [`RetryingCaller`] owns one zero-argument operation and the
//! [`CallState`] describing its latest call. Each call runs on its own tokio
//! task: attempt, sleep for the backoff delay, attempt again, until the
//! operation succeeds or the policy gives up.
//!
//! Retries are scoped to a logical call. [`execute`](RetryingCaller::execute)
//! joins a call that is still running, [`retry`](RetryingCaller::retry)
//! abandons it and starts over, and [`reset`](RetryingCaller::reset) or
//! dropping the caller abandons it for good. An abandoned call never touches
//! the state again and its pending timer is dropped with its task.
//!
//! # Example
//!
//! ```rust
//! use ezclear_core::RetryingCaller;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let calls = Arc::new(AtomicU32::new(0));
//! let caller = RetryingCaller::builder({
//!     let calls = calls.clone();
//!     move || {
//!         let n = calls.fetch_add(1, Ordering::SeqCst);
//!         async move {
//!             if n == 0 { Err("flaky network") } else { Ok("jobs") }
//!         }
//!     }
//! })
//! .base_delay(Duration::from_millis(1))
//! .build()
//! .unwrap();
//!
//! assert_eq!(caller.execute().await, Ok("jobs"));
//! assert_eq!(caller.state().result, Some("jobs"));
//! assert_eq!(caller.state().attempt, 1);
//! # });
//! ```

mod builder;
mod state;

#[cfg(test)]
mod tests;

use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Instrument;

pub use builder::{ConfigError, RetryingCallerBuilder};
pub use state::CallState;

use crate::retry::{BackoffPolicy, CallError, ErrorInfo, RetryEvent, RetryExhausted};
use builder::{Hooks, Operation, RetryPredicate};

type Outcome<T> = Shared<BoxFuture<'static, Result<T, CallError>>>;

/// Wraps an async operation with automatic retries and observable state.
///
/// See the [module docs](self) for the call lifecycle.
pub struct RetryingCaller<T> {
    inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T> {
    operation: Operation<T>,
    policy: BackoffPolicy,
    hooks: Hooks<T>,
    should_retry: Option<RetryPredicate>,
    runtime: Handle,
    state: watch::Sender<CallState<T>>,
    active: Mutex<Option<ActiveCall<T>>>,
    next_generation: AtomicU64,
}

struct ActiveCall<T> {
    generation: u64,
    abort: AbortHandle,
    outcome: Outcome<T>,
}

impl<T> RetryingCaller<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start configuring a caller for `operation`.
    ///
    /// The operation is invoked once per attempt. Its error type only needs
    /// `Display`; failures are normalized to [`ErrorInfo`].
    pub fn builder<F, Fut, E>(operation: F) -> RetryingCallerBuilder<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        RetryingCallerBuilder::new(operation)
    }

    /// Start a call, or join the one already in flight.
    ///
    /// The returned handle can be awaited for the outcome or used to cancel
    /// the call. Dropping the handle leaves the call running.
    pub fn execute(&self) -> CallHandle<T> {
        let mut active = self.inner.lock_active();
        if let Some(call) = active.as_ref() {
            if !call.abort.is_finished() && self.inner.is_running(call.generation) {
                tracing::debug!(generation = call.generation, "joining call in flight");
                return CallHandle::new(call, &self.inner);
            }
        }
        let call = self.inner.start();
        let handle = CallHandle::new(&call, &self.inner);
        *active = Some(call);
        handle
    }

    /// Abandon any pending call and start a fresh one immediately.
    ///
    /// The retry counter restarts from zero and any scheduled backoff is
    /// discarded.
    pub fn retry(&self) -> CallHandle<T> {
        let mut active = self.inner.lock_active();
        if let Some(call) = active.take() {
            call.abort.abort();
        }
        let call = self.inner.start();
        let handle = CallHandle::new(&call, &self.inner);
        *active = Some(call);
        handle
    }

    /// Abandon any pending call and return to the idle state without invoking
    /// the operation.
    pub fn reset(&self) {
        let mut active = self.inner.lock_active();
        if let Some(call) = active.take() {
            call.abort.abort();
        }
        self.inner.state.send_modify(CallState::clear);
    }

    /// Execute and wait for the outcome.
    pub async fn run(&self) -> Result<T, CallError> {
        self.execute().settled().await
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> CallState<T> {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<CallState<T>> {
        self.inner.state.subscribe()
    }

    /// The backoff policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.inner.policy
    }
}

impl<T> Drop for RetryingCaller<T> {
    fn drop(&mut self) {
        let generation = self.inner.lock_active().as_ref().map(|call| call.generation);
        if let Some(generation) = generation {
            self.inner.cancel(generation);
        }
    }
}

impl<T> fmt::Debug for RetryingCaller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingCaller")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl<T> Inner<T> {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveCall<T>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.in_flight && state.generation == generation
    }

    /// Apply `update` only if `generation` still owns a running call.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut CallState<T>)) -> bool {
        self.state.send_if_modified(|state| {
            if state.generation == generation && state.in_flight {
                update(state);
                true
            } else {
                false
            }
        })
    }

    /// Settle a call whose task panicked outside the operation.
    fn abandon(&self, generation: u64, error: ErrorInfo) -> Result<T, CallError> {
        self.publish(generation, |state| state.fail(error.clone()));
        tracing::error!(generation, %error, "call aborted by a panicking hook");
        Err(CallError::Panicked(error))
    }

    fn cancel(&self, generation: u64) {
        let mut active = self.lock_active();
        if active.as_ref().map(|call| call.generation) == Some(generation) {
            if let Some(call) = active.take() {
                call.abort.abort();
            }
        }
        if self.publish(generation, CallState::clear) {
            tracing::debug!(generation, "call cancelled");
        }
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn start(self: &Arc<Self>) -> ActiveCall<T> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.begin(generation));

        let inner = Arc::clone(self);
        let span = tracing::debug_span!("retrying_call", generation);
        let task = self.runtime.spawn(
            async move {
                match AssertUnwindSafe(inner.drive(generation)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => inner.abandon(generation, ErrorInfo::from_hook_panic(payload)),
                }
            }
            .instrument(span),
        );
        let abort = task.abort_handle();
        let outcome = task
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    Err(CallError::Panicked(ErrorInfo::from_hook_panic(e.into_panic())))
                }
                Err(_) => Err(CallError::Cancelled),
            })
            .boxed()
            .shared();

        ActiveCall {
            generation,
            abort,
            outcome,
        }
    }

    async fn drive(&self, generation: u64) -> Result<T, CallError> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            tracing::debug!(generation, attempt, "running operation");
            let outcome = AssertUnwindSafe(async { (self.operation)().await })
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(value)) => {
                    if !self.publish(generation, |state| state.succeed(value.clone())) {
                        return Err(CallError::Cancelled);
                    }
                    tracing::debug!(generation, attempt, "operation succeeded");
                    if let Some(hook) = &self.hooks.on_success {
                        hook(&value);
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(payload) => ErrorInfo::from_panic(payload),
            };

            let retryable = self
                .should_retry
                .as_ref()
                .is_none_or(|should_retry| should_retry(&error));
            let delay = if retryable {
                self.policy.jittered_delay(attempt)
            } else {
                None
            };

            let Some(delay) = delay else {
                let attempts = attempt + 1;
                if !self.publish(generation, |state| state.fail(error.clone())) {
                    return Err(CallError::Cancelled);
                }
                tracing::error!(generation, attempts, %error, "operation failed, giving up");
                if let Some(hook) = &self.hooks.on_error {
                    hook(&error);
                }
                return Err(CallError::Failed(RetryExhausted::new(
                    error,
                    attempts,
                    started.elapsed(),
                )));
            };

            attempt += 1;
            if !self.publish(generation, |state| state.attempt = attempt) {
                return Err(CallError::Cancelled);
            }
            tracing::warn!(generation, attempt, ?delay, %error, "operation failed, retrying");
            if let Some(hook) = &self.hooks.on_retry {
                hook(&RetryEvent {
                    attempt,
                    error: &error,
                    delay,
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// A running call, usable as a disposer.
///
/// Await it (or call [`settled`](Self::settled)) for the outcome;
/// [`cancel`](Self::cancel) to abandon it along with any scheduled retry.
/// Handles for the same call are interchangeable.
pub struct CallHandle<T> {
    generation: u64,
    abort: AbortHandle,
    outcome: Outcome<T>,
    inner: Weak<Inner<T>>,
}

impl<T> CallHandle<T> {
    fn new(call: &ActiveCall<T>, inner: &Arc<Inner<T>>) -> Self {
        Self {
            generation: call.generation,
            abort: call.abort.clone(),
            outcome: call.outcome.clone(),
            inner: Arc::downgrade(inner),
        }
    }

    /// Abandon the call. The operation is not invoked again and the caller
    /// returns to idle unless the call already settled.
    pub fn cancel(&self) {
        self.abort.abort();
        if let Some(inner) = self.inner.upgrade() {
            inner.cancel(self.generation);
        }
    }

    /// Whether the call's task has finished, for any reason.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Wait for the outcome. Cancelled or superseded calls yield
    /// [`CallError::Cancelled`].
    pub async fn settled(self) -> Result<T, CallError>
    where
        T: Clone,
    {
        self.outcome.await
    }
}

impl<T: Clone> IntoFuture for CallHandle<T> {
    type Output = Result<T, CallError>;
    type IntoFuture = Outcome<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

impl<T> Clone for CallHandle<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            abort: self.abort.clone(),
            outcome: self.outcome.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("generation", &self.generation)
            .field("finished", &self.abort.is_finished())
            .finish()
    }
}
