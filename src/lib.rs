//! # ezclear-core
//!
//! Client-side building blocks for the EZ Clear job marketplace.
//!
//! - [`RetryingCaller`] runs an async operation (a profile fetch, an
//!   application submit) and retries failures with exponential backoff,
//!   exposing the outcome as an observable [`CallState`].
//! - [`BackoffPolicy`] is the plain-data description of how long to wait and
//!   when to give up.
//! - [`settings::SoundSettings`] holds the notification sound preferences and
//!   is passed explicitly to whatever plays cues.
//!
//! ## Quick Example
//!
//! ```rust
//! use ezclear_core::{CallError, RetryingCaller};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let caller = RetryingCaller::builder(|| async { Err::<u32, _>("service unavailable") })
//!     .max_retries(2)
//!     .base_delay(Duration::from_millis(1))
//!     .on_retry(|event| eprintln!("retry {} after {:?}", event.attempt, event.delay))
//!     .build()
//!     .unwrap();
//!
//! match caller.run().await {
//!     Err(CallError::Failed(exhausted)) => assert_eq!(exhausted.attempts, 3),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! assert_eq!(caller.state().error.unwrap().message(), "service unavailable");
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod caller;
pub mod retry;
pub mod settings;
pub mod testing;

pub use caller::{CallHandle, CallState, ConfigError, RetryingCaller, RetryingCallerBuilder};
pub use retry::{
    Backoff, BackoffPolicy, CallError, CallerConfig, ErrorInfo, Jitter, RetryEvent,
    RetryExhausted,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::caller::{CallHandle, CallState, RetryingCaller};
    pub use crate::retry::{BackoffPolicy, CallError, ErrorInfo, RetryEvent};
    pub use crate::settings::{SettingsStore, SoundCue, SoundSettings};
}
