//! Helpers for testing code built on [`RetryingCaller`](crate::RetryingCaller).
//!
//! # Examples
//!
//! ```rust
//! use ezclear_core::testing::{CallRecorder, FlakyOperation};
//! use ezclear_core::{assert_succeeded, RetryingCaller};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let op = FlakyOperation::new(7, 2);
//! let recorder = CallRecorder::new();
//!
//! let caller = recorder
//!     .attach(RetryingCaller::builder({
//!         let op = op.clone();
//!         move || op.call()
//!     }))
//!     .base_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//!
//! caller.run().await.unwrap();
//! assert_succeeded!(caller.state(), 7);
//! assert_eq!(op.calls(), 3);
//! assert_eq!(recorder.retries().len(), 2);
//! # });
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{ready, Ready};
use tokio::time::Instant;

use crate::caller::RetryingCallerBuilder;
use crate::retry::ErrorInfo;

/// An operation that fails a fixed number of times, then succeeds.
///
/// Clones share the call counter, so a clone can be moved into the caller
/// while the original is kept for assertions.
#[derive(Debug, Clone)]
pub struct FlakyOperation<T> {
    value: T,
    failures: u32,
    calls: Arc<AtomicU32>,
    call_times: Arc<Mutex<Vec<Instant>>>,
}

impl<T: Clone> FlakyOperation<T> {
    /// Fail `failures` times, then return `value` forever.
    pub fn new(value: T, failures: u32) -> Self {
        Self {
            value,
            failures,
            calls: Arc::new(AtomicU32::new(0)),
            call_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never succeed.
    pub fn always_failing(value: T) -> Self {
        Self::new(value, u32::MAX)
    }

    /// Run one attempt.
    pub fn call(&self) -> Ready<Result<T, String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        if n < self.failures {
            ready(Err(format!("attempt {} failed", n + 1)))
        } else {
            ready(Ok(self.value.clone()))
        }
    }

    /// Attempts made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each attempt started, per tokio's clock.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One hook invocation seen by a [`CallRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    /// `on_success` ran.
    Success,
    /// `on_retry` ran for this retry number and delay.
    Retry {
        /// Retry number, 1-indexed.
        attempt: u32,
        /// Scheduled delay.
        delay: Duration,
        /// The failure being retried.
        error: ErrorInfo,
    },
    /// `on_error` ran with this final error.
    Error(ErrorInfo),
}

/// Records every hook invocation of a caller, in order.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl CallRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install all three hooks on `builder`.
    pub fn attach<T>(&self, builder: RetryingCallerBuilder<T>) -> RetryingCallerBuilder<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let on_success = self.clone();
        let on_retry = self.clone();
        let on_error = self.clone();
        builder
            .on_success(move |_| on_success.push(RecordedEvent::Success))
            .on_retry(move |event| {
                on_retry.push(RecordedEvent::Retry {
                    attempt: event.attempt,
                    delay: event.delay,
                    error: event.error.clone(),
                })
            })
            .on_error(move |error| on_error.push(RecordedEvent::Error(error.clone())))
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// Number of `on_success` calls.
    pub fn successes(&self) -> usize {
        self.lock()
            .iter()
            .filter(|event| matches!(event, RecordedEvent::Success))
            .count()
    }

    /// `(attempt, delay)` of every `on_retry` call.
    pub fn retries(&self) -> Vec<(u32, Duration)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Retry { attempt, delay, .. } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect()
    }

    /// Final errors passed to `on_error`.
    pub fn errors(&self) -> Vec<ErrorInfo> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: RecordedEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Assert that a [`CallState`](crate::CallState) settled successfully,
/// optionally with a given value.
///
/// ```rust
/// use ezclear_core::{assert_succeeded, CallState};
///
/// let mut state = CallState::default();
/// state.result = Some(3);
/// assert_succeeded!(state, 3);
/// ```
#[macro_export]
macro_rules! assert_succeeded {
    ($state:expr) => {{
        let state = &$state;
        if state.result.is_none() || state.error.is_some() || state.in_flight {
            panic!("Expected settled success, got {:?}", state);
        }
    }};
    ($state:expr, $expected:expr) => {{
        let state = &$state;
        match &state.result {
            Some(value) if !state.in_flight && state.error.is_none() => {
                assert_eq!(*value, $expected);
            }
            _ => panic!("Expected settled success, got {:?}", state),
        }
    }};
}

/// Assert that a [`CallState`](crate::CallState) settled with a final
/// error, optionally with a given message.
#[macro_export]
macro_rules! assert_failed {
    ($state:expr) => {{
        let state = &$state;
        if state.error.is_none() || state.result.is_some() || state.in_flight {
            panic!("Expected settled failure, got {:?}", state);
        }
    }};
    ($state:expr, $message:expr) => {{
        let state = &$state;
        match &state.error {
            Some(error) if !state.in_flight && state.result.is_none() => {
                assert_eq!(error.message(), $message);
            }
            _ => panic!("Expected settled failure, got {:?}", state),
        }
    }};
}

/// Assert that a [`CallState`](crate::CallState) is idle.
#[macro_export]
macro_rules! assert_idle {
    ($state:expr) => {{
        let state = &$state;
        if !state.is_idle() {
            panic!("Expected idle state, got {:?}", state);
        }
    }};
}
