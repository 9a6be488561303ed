//! Observable state of a [`RetryingCaller`](super::RetryingCaller).

use serde::Serialize;

use crate::retry::ErrorInfo;

/// Snapshot of a caller's progress.
///
/// After any transition settles at most one of `result`, `error` and
/// `in_flight` is set. All three are clear while idle (before the first call,
/// after [`reset`](super::RetryingCaller::reset), or after a cancellation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallState<T> {
    /// Value of the last successful call.
    pub result: Option<T>,
    /// Final error of the last failed call.
    pub error: Option<ErrorInfo>,
    /// A call is running or waiting to retry.
    pub in_flight: bool,
    /// Retries performed so far in the current call.
    pub attempt: u32,
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl<T> Default for CallState<T> {
    fn default() -> Self {
        Self {
            result: None,
            error: None,
            in_flight: false,
            attempt: 0,
            generation: 0,
        }
    }
}

impl<T> CallState<T> {
    /// Nothing running, nothing settled.
    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.result.is_none() && self.error.is_none()
    }

    /// The last call succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// The last call failed for good.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn begin(&mut self, generation: u64) {
        self.result = None;
        self.error = None;
        self.in_flight = true;
        self.attempt = 0;
        self.generation = generation;
    }

    pub(crate) fn succeed(&mut self, value: T) {
        self.in_flight = false;
        self.error = None;
        self.result = Some(value);
    }

    pub(crate) fn fail(&mut self, error: ErrorInfo) {
        self.in_flight = false;
        self.result = None;
        self.error = Some(error);
    }

    /// Back to idle. The generation is kept so stale writers stay locked out.
    pub(crate) fn clear(&mut self) {
        self.result = None;
        self.error = None;
        self.in_flight = false;
        self.attempt = 0;
    }
}
