//! Backoff policies and the types a retried call settles into.
//!
//! Everything here is plain data. [`BackoffPolicy`] answers "how long until
//! the next attempt, if any", and the error types describe how a call ended.
//! Running operations and sleeping between attempts is the job of
//! [`RetryingCaller`](crate::RetryingCaller).
//!
//! # Quick Start
//!
//! ```rust
//! use ezclear_core::BackoffPolicy;
//! use std::time::Duration;
//!
//! // 1s, 2s, 4s, then give up.
//! let policy = BackoffPolicy::default();
//! assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(4)));
//! assert_eq!(policy.delay_for_attempt(3), None);
//! ```

mod error;
mod policy;

use std::time::Duration;

pub use error::{CallError, ErrorInfo, RetryExhausted};
pub use policy::{
    Backoff, BackoffPolicy, CallerConfig, Jitter, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES,
};

/// What `on_retry` hooks see before a retry is scheduled.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    /// Which retry this is (1-indexed).
    pub attempt: u32,
    /// The failure that triggered it.
    pub error: &'a ErrorInfo,
    /// How long until the retry runs.
    pub delay: Duration,
    /// Time since the first attempt of this call.
    pub elapsed: Duration,
}
