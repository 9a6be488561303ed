//! Backoff policy types and configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Describes how long to wait between attempts and when to give up.
///
/// A policy is plain data. It never sleeps or spawns anything itself, which
/// keeps delay arithmetic testable without a runtime.
///
/// # Examples
///
/// ```rust
/// use ezclear_core::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential(Duration::from_millis(250))
///     .with_max_retries(4)
///     .with_max_delay(Duration::from_secs(1));
///
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(250)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
/// assert_eq!(policy.delay_for_attempt(4), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    backoff: Backoff,
    max_retries: Option<u32>,
    max_delay: Option<Duration>,
    jitter: Jitter,
}

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Constant(Duration),
    /// `base * 2^attempt`, saturating at `Duration::MAX`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
    },
}

/// Randomness applied on top of the computed delay.
///
/// Without the `jitter` feature every variant behaves like [`Jitter::None`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Jitter {
    /// Use the computed delay as is.
    #[default]
    None,
    /// Spread the delay by ±factor (0.0 to 1.0).
    Proportional(f64),
    /// Pick uniformly between zero and the computed delay.
    Full,
}

/// Serializable form of a policy, for loading retry settings from config files.
///
/// Missing fields fall back to the defaults of [`BackoffPolicy::default`].
///
/// ```rust
/// use ezclear_core::{BackoffPolicy, CallerConfig};
/// use std::time::Duration;
///
/// let config: CallerConfig = serde_json::from_str(r#"{ "max_retries": 5 }"#).unwrap();
/// let policy = BackoffPolicy::from(config);
///
/// assert_eq!(policy.max_retries(), Some(5));
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(1000)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    /// Retries after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: None,
        }
    }
}

impl From<CallerConfig> for BackoffPolicy {
    fn from(config: CallerConfig) -> Self {
        let policy = BackoffPolicy::exponential(Duration::from_millis(config.base_delay_ms))
            .with_max_retries(config.max_retries);
        match config.max_delay_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

impl Default for BackoffPolicy {
    /// Exponential backoff from one second, three retries.
    fn default() -> Self {
        Self::exponential(DEFAULT_BASE_DELAY).with_max_retries(DEFAULT_MAX_RETRIES)
    }
}

impl BackoffPolicy {
    fn with_backoff(backoff: Backoff) -> Self {
        Self {
            backoff,
            max_retries: None,
            max_delay: None,
            jitter: Jitter::None,
        }
    }

    /// Wait the same `delay` before every retry.
    ///
    /// ```rust
    /// use ezclear_core::BackoffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackoffPolicy::constant(Duration::from_millis(50)).with_max_retries(2);
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(50)));
    /// assert_eq!(policy.delay_for_attempt(2), None);
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Self::with_backoff(Backoff::Constant(delay))
    }

    /// Double the delay after every failure, starting at `base`.
    ///
    /// ```rust
    /// use ezclear_core::BackoffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackoffPolicy::exponential(Duration::from_millis(100)).with_max_retries(3);
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(base: Duration) -> Self {
        Self::with_backoff(Backoff::Exponential { base })
    }

    /// Switch to exponential backoff from `base`, keeping bounds and jitter.
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.backoff = Backoff::Exponential { base };
        self
    }

    /// Give up after `n` retries. `0` means the first failure is final.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Never wait longer than `d` between attempts.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Spread delays by ±`factor`, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Jitter::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Pick each delay uniformly between zero and the computed value.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// Retry budget, if bounded.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Delay cap, if any.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The growth strategy.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// The jitter strategy.
    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed), or `None`
    /// when the retry budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_retries {
            if attempt >= max {
                return None;
            }
        }

        let delay = match &self.backoff {
            Backoff::Constant(d) => *d,
            Backoff::Exponential { base } => match 2u32.checked_pow(attempt) {
                Some(factor) => base.saturating_mul(factor),
                None if base.is_zero() => Duration::ZERO,
                None => Duration::MAX,
            },
        };

        Some(self.cap(delay))
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for_attempt(attempt)?;
        Some(self.cap(self.jitter.apply(delay)))
    }

    /// A policy must bound the retry count. `max_delay` only caps each wait,
    /// so on its own it never stops retrying.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.max_retries {
            Some(_) => Ok(()),
            None => Err("backoff policy needs a max_retries bound"),
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Jitter {
    /// Apply this jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            #[cfg(feature = "jitter")]
            Jitter::Proportional(factor) => {
                use rand::Rng;
                let millis = delay.as_millis() as f64;
                let spread = millis * factor;
                let low = (millis - spread).max(0.0);
                let high = millis + spread;
                if high <= low {
                    delay
                } else {
                    Duration::from_millis(rand::rng().random_range(low..=high) as u64)
                }
            }
            #[cfg(feature = "jitter")]
            Jitter::Full => {
                use rand::Rng;
                let max = delay.as_millis() as u64;
                if max == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=max))
                }
            }
            #[cfg(not(feature = "jitter"))]
            Jitter::Proportional(_) | Jitter::Full => delay,
        }
    }
}
