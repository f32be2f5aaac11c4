//! Per-test wait context and the test-wide cancellation deadline.
//!
//! The deadline is set once by the harness before a test body runs and
//! cleared afterwards; waits only ever read it. Every sleep in the engine
//! is clamped so it never oversleeps an active deadline.

use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::result::{WaitError, WaitResult};

/// A test-scoped wall-clock cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Deadline of `limit` starting now
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self::starting_at(Instant::now(), limit)
    }

    /// Deadline of `limit` starting at `start`
    #[must_use]
    pub const fn starting_at(start: Instant, limit: Duration) -> Self {
        Self { start, limit }
    }

    /// The configured test-wide limit
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }

    /// Instant at which the deadline expires
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.start + self.limit
    }

    /// Whether the deadline has passed at `now`
    #[must_use]
    pub fn is_exceeded(&self, now: Instant) -> bool {
        now > self.expires_at()
    }

    /// Time left before expiry at `now`
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    /// Fail with [`WaitError::Cancelled`] if the deadline has passed
    pub fn check(&self, now: Instant) -> WaitResult<()> {
        if self.is_exceeded(now) {
            return Err(WaitError::Cancelled {
                limit: format_seconds(self.limit),
            });
        }
        Ok(())
    }
}

/// Everything a wait needs besides the session: configuration and the
/// optional test-wide deadline.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    config: EngineConfig,
    deadline: Option<Deadline>,
}

impl WaitContext {
    /// Context with default configuration and no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with the given configuration.
    ///
    /// Fails with [`WaitError::Config`] when the configuration cannot drive
    /// a poll loop, so no wait ever starts on one.
    pub fn with_config(config: EngineConfig) -> WaitResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deadline: None,
        })
    }

    /// Attach a deadline
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Start a test-wide deadline of `limit` from now
    pub fn set_time_limit(&mut self, limit: Duration) {
        self.deadline = Some(Deadline::new(limit));
    }

    /// Replace the deadline
    pub fn set_deadline(&mut self, deadline: Option<Deadline>) {
        self.deadline = deadline;
    }

    /// Drop the deadline at test end
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    /// The active deadline, if any
    #[must_use]
    pub const fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fail with [`WaitError::Cancelled`] if the deadline has passed
    pub fn check_deadline(&self) -> WaitResult<()> {
        match &self.deadline {
            Some(deadline) => deadline.check(Instant::now()),
            None => Ok(()),
        }
    }

    /// Sleep for `duration`, cut short at the deadline.
    ///
    /// Returns [`WaitError::Cancelled`] if the deadline passes while (or
    /// before) sleeping.
    pub fn sleep(&self, duration: Duration) -> WaitResult<()> {
        self.check_deadline()?;
        let duration = match &self.deadline {
            // wake just past expiry so the follow-up check fires
            Some(deadline) => {
                duration.min(deadline.remaining(Instant::now()) + Duration::from_millis(1))
            }
            None => duration,
        };
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
        self.check_deadline()
    }
}

/// Render a duration as whole or fractional seconds with the right plural:
/// `"1 second"`, `"5 seconds"`, `"1.5 seconds"`.
#[must_use]
pub fn format_seconds(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        let secs = millis / 1000;
        let plural = if secs == 1 { "" } else { "s" };
        format!("{secs} second{plural}")
    } else {
        let secs = duration.as_secs_f64();
        let text = format!("{secs:.3}");
        let text = text.trim_end_matches('0').trim_end_matches('.');
        format!("{text} seconds")
    }
}
