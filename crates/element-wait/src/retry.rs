//! Bounded retry with backoff for flaky remote calls.
//!
//! [`with_retry`] knows nothing about locators or sessions: it re-runs a
//! closure while its error matches a predicate, sleeping on a
//! [`Backoff`] schedule between attempts until tries or the overall
//! timeout run out.

use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::context::WaitContext;
use crate::result::{WaitError, WaitResult};

/// Default overall retry budget in milliseconds (about 12.4 days)
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1_073_741_823;

// =============================================================================
// POLICY
// =============================================================================

/// Extra delay added after each backoff step
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Jitter {
    /// No jitter
    #[default]
    None,
    /// Always add this much
    Fixed(Duration),
    /// Add a uniformly random amount in `[min, max]`
    Range {
        /// Lower bound
        min: Duration,
        /// Upper bound
        max: Duration,
    },
}

impl Jitter {
    fn sample_secs(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Fixed(amount) => amount.as_secs_f64(),
            Self::Range { min, max } if min == max => min.as_secs_f64(),
            Self::Range { min, max } => {
                rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64())
            }
        }
    }
}

/// How a call is retried.
///
/// Built through validating `with_*` methods or deserialized from
/// `{ tries, delay, max_delay, backoff, jitter, timeout_ms }` where
/// `tries: -1` means unbounded, delays are in seconds, and `jitter` is a
/// number or a `[min, max]` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_tries: Option<u32>,
    delay: Duration,
    max_delay: Option<Duration>,
    backoff: f64,
    jitter: Jitter,
    overall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: None,
            delay: Duration::ZERO,
            max_delay: None,
            backoff: 1.0,
            jitter: Jitter::None,
            overall_timeout: Duration::from_millis(DEFAULT_RETRY_TIMEOUT_MS),
        }
    }
}

fn invalid(message: impl Into<String>) -> WaitError {
    WaitError::InvalidPolicy {
        message: message.into(),
    }
}

fn seconds(name: &str, secs: f64) -> WaitResult<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid(format!("{name} must be a finite number >= 0, got {secs}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl RetryPolicy {
    /// Unbounded tries, no delay, no backoff
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit attempts; `-1` means unbounded, zero and other negatives are
    /// rejected
    pub fn with_tries(mut self, tries: i64) -> WaitResult<Self> {
        self.max_tries = match tries {
            -1 => None,
            t if t > 0 => Some(u32::try_from(t).map_err(|_| invalid("tries is too large"))?),
            t => return Err(invalid(format!("tries must be -1 or positive, got {t}"))),
        };
        Ok(self)
    }

    /// Initial delay between attempts in seconds
    pub fn with_delay_secs(mut self, secs: f64) -> WaitResult<Self> {
        self.delay = seconds("delay", secs)?;
        Ok(self)
    }

    /// Upper bound on the delay in seconds
    pub fn with_max_delay_secs(mut self, secs: f64) -> WaitResult<Self> {
        self.max_delay = Some(seconds("max_delay", secs)?);
        Ok(self)
    }

    /// Delay multiplier applied after every failed attempt
    pub fn with_backoff(mut self, multiplier: f64) -> WaitResult<Self> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(invalid(format!("backoff must be >= 0, got {multiplier}")));
        }
        self.backoff = multiplier;
        Ok(self)
    }

    /// Fixed jitter in seconds
    pub fn with_jitter_secs(mut self, secs: f64) -> WaitResult<Self> {
        self.jitter = Jitter::Fixed(seconds("jitter", secs)?);
        Ok(self)
    }

    /// Uniform random jitter in `[min, max]` seconds
    pub fn with_jitter_range_secs(mut self, min: f64, max: f64) -> WaitResult<Self> {
        let (min, max) = (seconds("jitter min", min)?, seconds("jitter max", max)?);
        if min > max {
            return Err(invalid("jitter range min is above max"));
        }
        self.jitter = Jitter::Range { min, max };
        Ok(self)
    }

    /// Overall budget across all attempts
    #[must_use]
    pub const fn with_overall_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.overall_timeout = Duration::from_millis(timeout_ms);
        self
    }

    /// Attempt limit, `None` when unbounded
    #[must_use]
    pub const fn max_tries(&self) -> Option<u32> {
        self.max_tries
    }

    /// Overall budget
    #[must_use]
    pub const fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Fresh delay schedule for one call
    #[must_use]
    pub fn backoff_schedule(&self) -> Backoff {
        let max = self.max_delay.map(|d| d.as_secs_f64());
        let first = self.delay.as_secs_f64();
        Backoff {
            next: max.map_or(first, |max| first.min(max)),
            multiplier: self.backoff,
            jitter: self.jitter,
            max,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJitter {
    Fixed(f64),
    Range(f64, f64),
}

const fn unbounded() -> i64 {
    -1
}

const fn unit_backoff() -> f64 {
    1.0
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT_MS
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetryPolicy {
    #[serde(default = "unbounded")]
    tries: i64,
    #[serde(default)]
    delay: f64,
    #[serde(default)]
    max_delay: Option<f64>,
    #[serde(default = "unit_backoff")]
    backoff: f64,
    #[serde(default)]
    jitter: Option<RawJitter>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = WaitError;

    fn try_from(raw: RawRetryPolicy) -> WaitResult<Self> {
        let mut policy = Self::new()
            .with_tries(raw.tries)?
            .with_delay_secs(raw.delay)?
            .with_backoff(raw.backoff)?
            .with_overall_timeout_ms(raw.timeout_ms);
        if let Some(max) = raw.max_delay {
            policy = policy.with_max_delay_secs(max)?;
        }
        policy = match raw.jitter {
            None => policy,
            Some(RawJitter::Fixed(secs)) => policy.with_jitter_secs(secs)?,
            Some(RawJitter::Range(min, max)) => policy.with_jitter_range_secs(min, max)?,
        };
        Ok(policy)
    }
}

// =============================================================================
// BACKOFF SCHEDULE
// =============================================================================

/// Endless delay schedule: each step multiplies, adds jitter, then clamps
#[derive(Debug, Clone)]
pub struct Backoff {
    next: f64,
    multiplier: f64,
    jitter: Jitter,
    max: Option<f64>,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let mut following = current * self.multiplier + self.jitter.sample_secs();
        if let Some(max) = self.max {
            following = following.min(max);
        }
        self.next = following;
        Some(Duration::try_from_secs_f64(current).unwrap_or(Duration::MAX))
    }
}

// =============================================================================
// RETRY
// =============================================================================

fn run<T, E, F, P, S>(policy: &RetryPolicy, retry_on: P, mut call: F, mut sleep: S) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    S: FnMut(Duration) -> Result<(), E>,
{
    let start = Instant::now();
    let mut tries_left = policy.max_tries;
    let mut delays = policy.backoff_schedule();
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        let error = match call() {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !retry_on(&error) {
            return Err(error);
        }
        if let Some(left) = tries_left.as_mut() {
            *left -= 1;
            if *left == 0 {
                return Err(error);
            }
        }
        if start.elapsed() > policy.overall_timeout {
            return Err(error);
        }
        let delay = delays.next().unwrap_or_default();
        warn!(
            attempt,
            delay_ms = delay.as_millis(),
            %error,
            "call failed, retrying"
        );
        sleep(delay)?;
    }
}

/// Call `call` until it succeeds or `policy` gives up.
///
/// Only errors for which `retry_on` returns true are retried; any other
/// error, or the last error once tries or the overall timeout are used up,
/// is returned as is.
pub fn with_retry<T, E, F, P>(policy: &RetryPolicy, retry_on: P, call: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    run(policy, retry_on, call, |delay| {
        std::thread::sleep(delay);
        Ok(())
    })
}

/// Like [`with_retry`], but sleeps honor the context's deadline and end
/// the retries with [`WaitError::Cancelled`] once it expires.
pub fn retry_call_within<T, E, F, P>(
    ctx: &WaitContext,
    policy: &RetryPolicy,
    retry_on: P,
    call: F,
) -> Result<T, E>
where
    E: fmt::Display + From<WaitError>,
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    run(policy, retry_on, call, |delay| ctx.sleep(delay).map_err(E::from))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::Deadline;
    use crate::result::RemoteError;
    use proptest::prelude::*;
    use std::cell::Cell;

    fn fast(tries: i64) -> RetryPolicy {
        RetryPolicy::new()
            .with_tries(tries)
            .unwrap()
            .with_delay_secs(0.001)
            .unwrap()
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let policy = RetryPolicy::default();
            assert_eq!(policy.max_tries(), None);
            assert_eq!(policy.overall_timeout(), Duration::from_millis(1_073_741_823));
        }

        #[test]
        fn test_rejects_invalid_values() {
            assert!(RetryPolicy::new().with_tries(0).is_err());
            assert!(RetryPolicy::new().with_tries(-2).is_err());
            assert!(RetryPolicy::new().with_delay_secs(-0.5).is_err());
            assert!(RetryPolicy::new().with_delay_secs(f64::NAN).is_err());
            assert!(RetryPolicy::new().with_backoff(-1.0).is_err());
            assert!(RetryPolicy::new().with_jitter_range_secs(2.0, 1.0).is_err());
        }

        #[test]
        fn test_deserialize_from_yaml() {
            let policy: RetryPolicy = serde_yaml_ng::from_str(
                "tries: 3\ndelay: 0.5\nbackoff: 2\nmax_delay: 3\njitter: [0.1, 0.2]\ntimeout_ms: 10000\n",
            )
            .unwrap();
            assert_eq!(policy.max_tries(), Some(3));
            assert_eq!(policy.overall_timeout(), Duration::from_secs(10));
            assert!(matches!(policy.jitter, Jitter::Range { .. }));
        }

        #[test]
        fn test_deserialize_rejects_invalid() {
            let result: Result<RetryPolicy, _> = serde_json::from_str(r#"{"tries": 0}"#);
            assert!(result.is_err());
            let result: Result<RetryPolicy, _> = serde_json::from_str(r#"{"delay": -1}"#);
            assert!(result.is_err());
        }

        #[test]
        fn test_deserialize_defaults() {
            let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
            assert_eq!(policy, RetryPolicy::default());
        }
    }

    mod backoff_tests {
        use super::*;

        #[test]
        fn test_exponential_schedule_clamped() {
            let policy = RetryPolicy::new()
                .with_delay_secs(1.0)
                .unwrap()
                .with_backoff(2.0)
                .unwrap()
                .with_max_delay_secs(5.0)
                .unwrap();
            let secs: Vec<u64> = policy.backoff_schedule().take(5).map(|d| d.as_secs()).collect();
            assert_eq!(secs, vec![1, 2, 4, 5, 5]);
        }

        #[test]
        fn test_fixed_jitter_added_after_multiply() {
            let policy = RetryPolicy::new()
                .with_delay_secs(1.0)
                .unwrap()
                .with_backoff(2.0)
                .unwrap()
                .with_jitter_secs(0.5)
                .unwrap();
            let millis: Vec<u128> = policy
                .backoff_schedule()
                .take(3)
                .map(|d| d.as_millis())
                .collect();
            assert_eq!(millis, vec![1000, 2500, 5500]);
        }

        proptest! {
            #[test]
            fn prop_delays_never_exceed_max(
                delay in 0.0f64..10.0,
                backoff in 0.0f64..4.0,
                jitter_max in 0.0f64..2.0,
                max_delay in 0.0f64..5.0,
            ) {
                let policy = RetryPolicy::new()
                    .with_delay_secs(delay).unwrap()
                    .with_backoff(backoff).unwrap()
                    .with_jitter_range_secs(0.0, jitter_max).unwrap()
                    .with_max_delay_secs(max_delay).unwrap();
                let cap = Duration::from_secs_f64(max_delay);
                for step in policy.backoff_schedule().take(20) {
                    prop_assert!(step <= cap);
                }
            }
        }
    }

    mod retry_tests {
        use super::*;

        #[test]
        fn test_success_after_failures() {
            let calls = Cell::new(0);
            let result: Result<u32, RemoteError> = with_retry(
                &fast(5),
                |_| true,
                || {
                    calls.set(calls.get() + 1);
                    if calls.get() < 3 {
                        Err(RemoteError::Other("flaky".into()))
                    } else {
                        Ok(7)
                    }
                },
            );
            assert_eq!(result.unwrap(), 7);
            assert_eq!(calls.get(), 3);
        }

        #[test]
        fn test_tries_exhausted_returns_last_error() {
            let calls = Cell::new(0);
            let result: Result<(), RemoteError> = with_retry(
                &fast(3),
                |_| true,
                || {
                    calls.set(calls.get() + 1);
                    Err(RemoteError::Other(format!("attempt {}", calls.get())))
                },
            );
            assert_eq!(result.unwrap_err(), RemoteError::Other("attempt 3".into()));
            assert_eq!(calls.get(), 3);
        }

        #[test]
        fn test_non_matching_error_not_retried() {
            let calls = Cell::new(0);
            let result: Result<(), RemoteError> = with_retry(
                &fast(-1),
                |error: &RemoteError| error.is_stale(),
                || {
                    calls.set(calls.get() + 1);
                    Err(RemoteError::NoSuchWindow("closed".into()))
                },
            );
            assert!(result.is_err());
            assert_eq!(calls.get(), 1);
        }

        #[test]
        fn test_unbounded_tries_stop_at_overall_timeout() {
            let calls = Cell::new(0);
            let policy = fast(-1).with_overall_timeout_ms(30);
            let result: Result<(), RemoteError> = with_retry(&policy, |_| true, || {
                calls.set(calls.get() + 1);
                Err(RemoteError::Other("down".into()))
            });
            assert!(result.is_err());
            assert!(calls.get() > 1);
        }

        #[test]
        fn test_deadline_cancels_retries() {
            let ctx = WaitContext::new().with_deadline(Deadline::new(Duration::from_millis(20)));
            let policy = RetryPolicy::new().with_delay_secs(0.01).unwrap();
            let result: Result<(), WaitError> = retry_call_within(&ctx, &policy, |_| true, || {
                Err(WaitError::Session(RemoteError::Other("down".into())))
            });
            assert!(result.unwrap_err().is_cancelled());
        }
    }
}
