//! Construction of [`RetryingCaller`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::{CallState, Inner, RetryingCaller};
use crate::retry::{BackoffPolicy, ErrorInfo, RetryEvent};

pub(crate) type Operation<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, ErrorInfo>> + Send + Sync>;
pub(crate) type RetryPredicate = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

pub(crate) struct Hooks<T> {
    pub(crate) on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(&ErrorInfo) + Send + Sync>>,
    pub(crate) on_retry: Option<Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_retry: None,
        }
    }
}

/// Error returned by [`RetryingCallerBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The backoff policy does not bound the number of retries.
    InvalidPolicy(&'static str),
    /// No runtime was given and none is running on this thread.
    NoRuntime,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPolicy(reason) => write!(f, "invalid backoff policy: {}", reason),
            Self::NoRuntime => write!(f, "no tokio runtime available to schedule retries"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`RetryingCaller`].
///
/// Created with [`RetryingCaller::builder`]. Defaults to three retries with
/// exponential backoff starting at one second, retrying every failure.
pub struct RetryingCallerBuilder<T> {
    operation: Operation<T>,
    policy: BackoffPolicy,
    hooks: Hooks<T>,
    should_retry: Option<RetryPredicate>,
    runtime: Option<Handle>,
}

impl<T> fmt::Debug for RetryingCallerBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingCallerBuilder")
            .field("policy", &self.policy)
            .field("retry_if", &self.should_retry.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> RetryingCallerBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F, Fut, E>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let operation: Operation<T> = Arc::new(move || {
            let attempt = operation();
            async move { attempt.await.map_err(|e| ErrorInfo::from_failure(&e)) }.boxed()
        });

        Self {
            operation,
            policy: BackoffPolicy::default(),
            hooks: Hooks::default(),
            should_retry: None,
            runtime: None,
        }
    }

    /// Retries after the first failure.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.policy = self.policy.with_max_retries(n);
        self
    }

    /// Delay before the first retry; each later retry doubles it.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy = self.policy.with_base_delay(delay);
        self
    }

    /// Replace the whole backoff policy.
    pub fn policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called once with the value when a call succeeds.
    pub fn on_success<H>(mut self, hook: H) -> Self
    where
        H: Fn(&T) + Send + Sync + 'static,
    {
        self.hooks.on_success = Some(Arc::new(hook));
        self
    }

    /// Called once with the final error when a call gives up.
    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Called before every scheduled retry. Keep it short; it runs on the
    /// call's task.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.hooks.on_retry = Some(Arc::new(hook));
        self
    }

    /// Only retry failures for which `predicate` returns true. Others settle
    /// immediately.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ErrorInfo) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Shorthand for `retry_if(ErrorInfo::is_transient)`.
    pub fn retry_transient_only(self) -> Self {
        self.retry_if(ErrorInfo::is_transient)
    }

    /// Schedule calls on `handle` instead of the ambient runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Finish the caller.
    ///
    /// Fails if the policy is unbounded, or if no runtime was set and this is
    /// not called from inside one.
    pub fn build(self) -> Result<RetryingCaller<T>, ConfigError> {
        self.policy.validate().map_err(ConfigError::InvalidPolicy)?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let (state, _) = watch::channel(CallState::default());
        Ok(RetryingCaller {
            inner: Arc::new(Inner {
                operation: self.operation,
                policy: self.policy,
                hooks: self.hooks,
                should_retry: self.should_retry,
                runtime,
                state,
                active: Mutex::new(None),
                next_generation: AtomicU64::new(0),
            }),
        })
    }
}
