//! Failure and settlement types.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A failed attempt, normalized to a message.
///
/// Whatever the operation failed with is reduced to its `Display` text so that
/// state, callbacks and logs all see the same shape. An optional HTTP-style
/// status lets retry predicates tell transient from permanent failures.
///
/// ```rust
/// use ezclear_core::ErrorInfo;
///
/// let err = ErrorInfo::from_display(&"connection reset");
/// assert_eq!(err.message(), "connection reset");
/// assert!(err.is_transient());
///
/// let not_found = ErrorInfo::with_status("job not found", 404);
/// assert!(!not_found.is_transient());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

impl ErrorInfo {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Create an error carrying a status code.
    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Normalize any displayable failure.
    pub fn from_display<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self::new(error.to_string())
    }

    /// Normalize the error an operation returned.
    ///
    /// An `ErrorInfo` is kept as is, status included. Anything else is reduced
    /// to its message.
    pub fn from_failure<E: fmt::Display + 'static>(error: &E) -> Self {
        match (error as &dyn Any).downcast_ref::<ErrorInfo>() {
            Some(info) => info.clone(),
            None => Self::from_display(error),
        }
    }

    /// Normalize a panic payload caught from an operation.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::panicked("operation", payload)
    }

    /// Normalize a panic raised by a caller hook.
    pub(crate) fn from_hook_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::panicked("hook", payload)
    }

    fn panicked(source: &str, payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(format!("{} panicked: {}", source, detail))
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The status code, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Whether retrying could plausibly help.
    ///
    /// Failures without a status (network errors, panics, timeouts) count as
    /// transient, as do 408, 429 and every 5xx. Other statuses are permanent.
    pub fn is_transient(&self) -> bool {
        match self.status {
            None => true,
            Some(408) | Some(429) => true,
            Some(code) => (500..600).contains(&code),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (status {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ErrorInfo {}

/// The final failure of a call once no more retries will happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the last attempt.
    pub final_error: E,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Time from the first attempt to settlement.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new settlement failure.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Discard the metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Borrow the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempts ({:?}): {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// How a call ended when it did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The operation failed and will not be retried.
    Failed(RetryExhausted<ErrorInfo>),
    /// A hook panicked and took the call down with it.
    Panicked(ErrorInfo),
    /// The call was cancelled, reset or superseded before it settled.
    Cancelled,
}

impl CallError {
    /// The final error, unless the call was cancelled.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Failed(exhausted) => Some(exhausted.error()),
            Self::Panicked(error) => Some(error),
            Self::Cancelled => None,
        }
    }

    /// Returns true if the call was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(exhausted) => write!(f, "{}", exhausted),
            Self::Panicked(error) => write!(f, "call aborted: {}", error),
            Self::Cancelled => write!(f, "call cancelled before settling"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(exhausted) => Some(exhausted),
            Self::Panicked(error) => Some(error),
            Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ErrorInfo::new("timeout").is_transient());
        assert!(ErrorInfo::with_status("busy", 503).is_transient());
        assert!(ErrorInfo::with_status("slow down", 429).is_transient());
        assert!(!ErrorInfo::with_status("forbidden", 403).is_transient());
        assert!(!ErrorInfo::with_status("ok?", 200).is_transient());
    }

    #[test]
    fn failures_keep_existing_error_info() {
        let info = ErrorInfo::from_failure(&ErrorInfo::with_status("gone", 410));
        assert_eq!(info.status(), Some(410));
        assert_eq!(info.message(), "gone");

        let info = ErrorInfo::from_failure(&String::from("plain"));
        assert_eq!(info, ErrorInfo::new("plain"));
    }

    #[test]
    fn display_includes_status() {
        assert_eq!(ErrorInfo::new("boom").to_string(), "boom");
        assert_eq!(
            ErrorInfo::with_status("unauthorized", 401).to_string(),
            "unauthorized (status 401)"
        );
    }

    #[test]
    fn panic_payloads_are_normalized() {
        let info = ErrorInfo::from_panic(Box::new("bad state"));
        assert_eq!(info.message(), "operation panicked: bad state");

        let info = ErrorInfo::from_panic(Box::new(String::from("owned")));
        assert_eq!(info.message(), "operation panicked: owned");

        let info = ErrorInfo::from_panic(Box::new(7u8));
        assert_eq!(info.message(), "operation panicked: unknown panic payload");

        let info = ErrorInfo::from_hook_panic(Box::new("bad hook"));
        assert_eq!(info.message(), "hook panicked: bad hook");
    }

    #[test]
    fn error_info_serializes_without_missing_status() {
        let json = serde_json::to_string(&ErrorInfo::new("x")).unwrap();
        assert_eq!(json, r#"{"message":"x"}"#);
    }

    #[test]
    fn retry_exhausted_display() {
        let err = RetryExhausted::new("connection failed", 4, Duration::from_millis(500));
        let display = err.to_string();
        assert!(display.contains("4 attempts"));
        assert!(display.contains("connection failed"));
    }

    #[test]
    fn call_error_accessors() {
        let failed = CallError::Failed(RetryExhausted::new(
            ErrorInfo::new("down"),
            1,
            Duration::ZERO,
        ));
        assert_eq!(failed.error_info().map(ErrorInfo::message), Some("down"));
        assert!(!failed.is_cancelled());
        assert!(CallError::Cancelled.is_cancelled());

        let panicked = CallError::Panicked(ErrorInfo::new("hook panicked: boom"));
        assert!(!panicked.is_cancelled());
        assert_eq!(panicked.to_string(), "call aborted: hook panicked: boom");
        assert!(CallError::Cancelled.error_info().is_none());
    }
}
