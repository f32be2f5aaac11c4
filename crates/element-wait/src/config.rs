//! Engine configuration.
//!
//! Timeouts are stored in milliseconds, like the rest of the crate's option
//! structs, and exposed as [`Duration`] through accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::result::{WaitError, WaitResult};

/// Short waits, e.g. window switches (2 seconds)
pub const MINI_TIMEOUT_MS: u64 = 2_000;

/// Default element wait (6 seconds)
pub const SMALL_TIMEOUT_MS: u64 = 6_000;

/// Long waits, e.g. page loads (30 seconds)
pub const LARGE_TIMEOUT_MS: u64 = 30_000;

/// Timeouts at or below this value perform a single probe (100ms)
pub const SINGLE_SHOT_THRESHOLD_MS: u64 = 100;

/// Tunables for polling, shadow-root resolution and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Short timeout tier
    pub mini_timeout_ms: u64,
    /// Default timeout tier
    pub small_timeout_ms: u64,
    /// Long timeout tier
    pub large_timeout_ms: u64,
    /// Polling cadence as a fraction of the wait's timeout
    pub poll_fraction: f64,
    /// Lower bound on the polling cadence
    pub min_poll_interval_ms: u64,
    /// Upper bound on the polling cadence
    pub max_poll_interval_ms: u64,
    /// Timeouts at or below this perform exactly one probe
    pub single_shot_threshold_ms: u64,
    /// Delay before re-reading a shadow root that was not attached yet
    pub shadow_root_backoff_ms: u64,
    /// Cadence for element lookups inside a native shadow root
    pub shadow_poll_interval_ms: u64,
    /// First Chromium major version with a native shadow-root accessor
    pub shadow_native_min_version: u32,
    /// Attach debug attributes to resolved element handles
    pub diagnostics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mini_timeout_ms: MINI_TIMEOUT_MS,
            small_timeout_ms: SMALL_TIMEOUT_MS,
            large_timeout_ms: LARGE_TIMEOUT_MS,
            poll_fraction: 0.2,
            min_poll_interval_ms: 50,
            max_poll_interval_ms: 1_000,
            single_shot_threshold_ms: SINGLE_SHOT_THRESHOLD_MS,
            shadow_root_backoff_ms: 2_000,
            shadow_poll_interval_ms: 200,
            shadow_native_min_version: 96,
            diagnostics: false,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from YAML; missing fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> WaitResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the polling loop cannot honor
    pub fn validate(&self) -> WaitResult<()> {
        if !(self.poll_fraction > 0.0 && self.poll_fraction <= 1.0) {
            return Err(WaitError::Config {
                message: format!("poll_fraction must be in (0, 1], got {}", self.poll_fraction),
            });
        }
        if self.min_poll_interval_ms == 0 {
            return Err(WaitError::Config {
                message: "min_poll_interval_ms must be positive".to_string(),
            });
        }
        if self.max_poll_interval_ms < self.min_poll_interval_ms {
            return Err(WaitError::Config {
                message: format!(
                    "max_poll_interval_ms ({}) is below min_poll_interval_ms ({})",
                    self.max_poll_interval_ms, self.min_poll_interval_ms
                ),
            });
        }
        if self.shadow_poll_interval_ms == 0 {
            return Err(WaitError::Config {
                message: "shadow_poll_interval_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Set the default timeout tier
    #[must_use]
    pub const fn with_small_timeout(mut self, timeout_ms: u64) -> Self {
        self.small_timeout_ms = timeout_ms;
        self
    }

    /// Set the polling fraction; it must lie in `(0, 1]`
    pub fn with_poll_fraction(mut self, fraction: f64) -> WaitResult<Self> {
        self.poll_fraction = fraction;
        self.validate()?;
        Ok(self)
    }

    /// Set the cadence bounds; `min_ms` must be positive and not above `max_ms`
    pub fn with_poll_interval_bounds(mut self, min_ms: u64, max_ms: u64) -> WaitResult<Self> {
        self.min_poll_interval_ms = min_ms;
        self.max_poll_interval_ms = max_ms;
        self.validate()?;
        Ok(self)
    }

    /// Set the shadow-root attach back-off
    #[must_use]
    pub const fn with_shadow_root_backoff(mut self, backoff_ms: u64) -> Self {
        self.shadow_root_backoff_ms = backoff_ms;
        self
    }

    /// Set the cadence for lookups inside native shadow roots
    #[must_use]
    pub const fn with_shadow_poll_interval(mut self, interval_ms: u64) -> Self {
        self.shadow_poll_interval_ms = interval_ms;
        self
    }

    /// Enable or disable debug attributes on element handles
    #[must_use]
    pub const fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Short timeout as Duration
    #[must_use]
    pub const fn mini_timeout(&self) -> Duration {
        Duration::from_millis(self.mini_timeout_ms)
    }

    /// Default timeout as Duration
    #[must_use]
    pub const fn small_timeout(&self) -> Duration {
        Duration::from_millis(self.small_timeout_ms)
    }

    /// Long timeout as Duration
    #[must_use]
    pub const fn large_timeout(&self) -> Duration {
        Duration::from_millis(self.large_timeout_ms)
    }

    /// Shadow-root back-off as Duration
    #[must_use]
    pub const fn shadow_root_backoff(&self) -> Duration {
        Duration::from_millis(self.shadow_root_backoff_ms)
    }

    /// Native shadow lookup cadence as Duration
    #[must_use]
    pub const fn shadow_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shadow_poll_interval_ms)
    }

    /// Whether `timeout` is an "is it true right now" check
    #[must_use]
    pub fn is_single_shot(&self, timeout: Duration) -> bool {
        timeout <= Duration::from_millis(self.single_shot_threshold_ms)
    }

    /// Polling cadence for a wait of `timeout`: a fraction of the timeout,
    /// clamped so long waits don't busy-poll and short ones stay responsive.
    ///
    /// Total even on a config that fails [`validate`](Self::validate): an
    /// unusable fraction falls back to the lower bound and the upper bound
    /// wins over a larger lower bound.
    #[must_use]
    pub fn cadence_for(&self, timeout: Duration) -> Duration {
        let min = Duration::from_millis(self.min_poll_interval_ms);
        let max = Duration::from_millis(self.max_poll_interval_ms);
        Duration::try_from_secs_f64(timeout.as_secs_f64() * self.poll_fraction)
            .unwrap_or(min)
            .max(min)
            .min(max)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_timeout_tiers() {
        let config = EngineConfig::default();
        assert_eq!(config.mini_timeout(), Duration::from_secs(2));
        assert_eq!(config.small_timeout(), Duration::from_secs(6));
        assert_eq!(config.large_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cadence_is_fraction_of_timeout() {
        let config = EngineConfig::default();
        assert_eq!(config.cadence_for(Duration::from_secs(1)), Duration::from_millis(200));
    }

    #[test]
    fn test_cadence_is_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.cadence_for(Duration::from_millis(100)), Duration::from_millis(50));
        assert_eq!(config.cadence_for(Duration::from_secs(60)), Duration::from_secs(1));
    }

    #[test]
    fn test_single_shot_threshold() {
        let config = EngineConfig::default();
        assert!(config.is_single_shot(Duration::ZERO));
        assert!(config.is_single_shot(Duration::from_millis(100)));
        assert!(!config.is_single_shot(Duration::from_millis(101)));
    }

    #[test]
    fn test_from_yaml_keeps_defaults_for_missing_fields() {
        let config = EngineConfig::from_yaml_str("small_timeout_ms: 1500\ndiagnostics: true\n").unwrap();
        assert_eq!(config.small_timeout_ms, 1500);
        assert!(config.diagnostics);
        assert_eq!(config.shadow_native_min_version, 96);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_fields() {
        let result = EngineConfig::from_yaml_str("no_such_field: 1\n");
        assert!(matches!(result, Err(WaitError::Yaml(_))));
    }

    #[test]
    fn test_from_yaml_rejects_invalid_values() {
        let result = EngineConfig::from_yaml_str("poll_fraction: 0.0\n");
        assert!(matches!(result, Err(WaitError::Config { .. })));

        let result =
            EngineConfig::from_yaml_str("min_poll_interval_ms: 500\nmax_poll_interval_ms: 100\n");
        assert!(matches!(result, Err(WaitError::Config { .. })));
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_small_timeout(1000)
            .with_poll_fraction(0.5)
            .unwrap()
            .with_shadow_root_backoff(10)
            .with_shadow_poll_interval(5)
            .with_diagnostics(true);
        assert_eq!(config.small_timeout(), Duration::from_secs(1));
        assert_eq!(config.shadow_root_backoff(), Duration::from_millis(10));
        assert_eq!(config.shadow_poll_interval(), Duration::from_millis(5));
        assert!(config.diagnostics);
    }

    #[test]
    fn test_builders_reject_unusable_cadence() {
        for fraction in [-0.5, 0.0, 1.5, f64::NAN, f64::INFINITY] {
            let result = EngineConfig::new().with_poll_fraction(fraction);
            assert!(
                matches!(result, Err(WaitError::Config { .. })),
                "{fraction} should be rejected"
            );
        }
        assert!(EngineConfig::new().with_poll_interval_bounds(500, 100).is_err());
        assert!(EngineConfig::new().with_poll_interval_bounds(0, 100).is_err());
        let config = EngineConfig::new().with_poll_interval_bounds(20, 400).unwrap();
        assert_eq!(config.cadence_for(Duration::from_secs(10)), Duration::from_millis(400));
    }

    #[test]
    fn test_cadence_never_panics_on_invalid_fields() {
        let mut config = EngineConfig::default();
        config.poll_fraction = -0.5;
        assert_eq!(config.cadence_for(Duration::from_secs(1)), Duration::from_millis(50));
        config.poll_fraction = f64::NAN;
        assert_eq!(config.cadence_for(Duration::from_secs(1)), Duration::from_millis(50));

        let mut config = EngineConfig::default();
        config.min_poll_interval_ms = 500;
        config.max_poll_interval_ms = 100;
        assert_eq!(config.cadence_for(Duration::from_secs(1)), Duration::from_millis(100));
    }
}
