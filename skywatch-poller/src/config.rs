//! Configuration types for the skywatch-poller crate
//!
//! This module defines the interval tiers the scheduler picks from, the
//! backoff bounds, and the battery thresholds used to derive low battery
//! mode.

use std::time::Duration;

use skywatch_signals::LowBatteryPolicy;

use crate::error::PollerError;

/// Configuration for the PollingManager
///
/// Every subscription's refresh interval is one of the tiers below,
/// optionally stretched by exponential backoff and the cellular guard.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Foreground interval for critical and high priority subscriptions
    /// Default: 15 seconds
    pub foreground_fast: Duration,

    /// Foreground interval for normal priority subscriptions
    /// Default: 30 seconds
    pub foreground_normal: Duration,

    /// Foreground interval for low and minimal priority subscriptions.
    /// Also the floor applied on cellular when a subscription opts out.
    /// Default: 60 seconds
    pub foreground_slow: Duration,

    /// Background interval for critical and high priority subscriptions
    /// Default: 5 minutes
    pub background_normal: Duration,

    /// Background interval for everything else
    /// Default: 15 minutes
    pub background_slow: Duration,

    /// Interval used for every subscription in low battery mode
    /// Default: 30 minutes
    pub background_minimal: Duration,

    /// Smallest interval backoff may ever produce
    /// Default: 5 seconds
    pub min_interval: Duration,

    /// Ceiling for backed-off intervals
    /// Default: 60 minutes
    pub max_backoff: Duration,

    /// Thresholds for deriving low battery mode
    pub low_battery: LowBatteryPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            foreground_fast: Duration::from_secs(15),
            foreground_normal: Duration::from_secs(30),
            foreground_slow: Duration::from_secs(60),
            background_normal: Duration::from_secs(300),   // 5 minutes
            background_slow: Duration::from_secs(900),     // 15 minutes
            background_minimal: Duration::from_secs(1800), // 30 minutes
            min_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(3600), // 60 minutes
            low_battery: LowBatteryPolicy::default(),
        }
    }
}

impl PollingConfig {
    /// Create a new PollingConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PollingConfig for live tracking screens (flight in the air,
    /// gate changes imminent)
    pub fn aggressive() -> Self {
        Self {
            foreground_fast: Duration::from_secs(5),
            foreground_normal: Duration::from_secs(15),
            foreground_slow: Duration::from_secs(30),
            background_normal: Duration::from_secs(120),
            background_slow: Duration::from_secs(600),
            min_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(1800),
            ..Default::default()
        }
    }

    /// Create a PollingConfig that favours battery life over freshness
    pub fn battery_saver() -> Self {
        Self {
            foreground_fast: Duration::from_secs(30),
            foreground_normal: Duration::from_secs(60),
            foreground_slow: Duration::from_secs(120),
            background_normal: Duration::from_secs(900),
            background_slow: Duration::from_secs(1800),
            background_minimal: Duration::from_secs(3600),
            min_interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(7200),
            low_battery: LowBatteryPolicy {
                low_threshold: 0.25,
                unplugged_low_threshold: 0.35,
            },
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), PollerError> {
        let tiers = [
            ("foreground_fast", self.foreground_fast),
            ("foreground_normal", self.foreground_normal),
            ("foreground_slow", self.foreground_slow),
            ("background_normal", self.background_normal),
            ("background_slow", self.background_slow),
            ("background_minimal", self.background_minimal),
            ("min_interval", self.min_interval),
            ("max_backoff", self.max_backoff),
        ];
        if let Some((name, _)) = tiers.iter().find(|(_, d)| d.is_zero()) {
            return Err(PollerError::InvalidConfiguration(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.foreground_fast > self.foreground_normal
            || self.foreground_normal > self.foreground_slow
        {
            return Err(PollerError::InvalidConfiguration(
                "Foreground intervals must be ordered fast <= normal <= slow".to_string(),
            ));
        }

        if self.background_normal > self.background_slow
            || self.background_slow > self.background_minimal
        {
            return Err(PollerError::InvalidConfiguration(
                "Background intervals must be ordered normal <= slow <= minimal".to_string(),
            ));
        }

        if self.min_interval > self.foreground_fast {
            return Err(PollerError::InvalidConfiguration(
                "min_interval must not exceed foreground_fast".to_string(),
            ));
        }

        let longest_base = self.foreground_slow.max(self.background_minimal);
        if self.max_backoff < longest_base {
            return Err(PollerError::InvalidConfiguration(format!(
                "max_backoff ({:?}) must be at least the longest base interval ({:?})",
                self.max_backoff, longest_base
            )));
        }

        let policy = &self.low_battery;
        let in_range = |t: f32| (0.0..=1.0).contains(&t);
        if !in_range(policy.low_threshold) || !in_range(policy.unplugged_low_threshold) {
            return Err(PollerError::InvalidConfiguration(
                "Battery thresholds must be within [0, 1]".to_string(),
            ));
        }
        if policy.low_threshold > policy.unplugged_low_threshold {
            return Err(PollerError::InvalidConfiguration(
                "low_threshold must not exceed unplugged_low_threshold".to_string(),
            ));
        }

        Ok(())
    }

    // Builder methods

    pub fn with_foreground_intervals(mut self, fast: Duration, normal: Duration, slow: Duration) -> Self {
        self.foreground_fast = fast;
        self.foreground_normal = normal;
        self.foreground_slow = slow;
        self
    }

    pub fn with_background_intervals(
        mut self,
        normal: Duration,
        slow: Duration,
        minimal: Duration,
    ) -> Self {
        self.background_normal = normal;
        self.background_slow = slow;
        self.background_minimal = minimal;
        self
    }

    pub fn with_backoff_bounds(mut self, min_interval: Duration, max_backoff: Duration) -> Self {
        self.min_interval = min_interval;
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_low_battery_policy(mut self, policy: LowBatteryPolicy) -> Self {
        self.low_battery = policy;
        self
    }
}
