//! Refresh interval computation
//!
//! Pure functions: given the configuration, the current environment and a
//! subscription's priority, cellular preference and failure history, decide
//! how long to wait before the next poll. The manager calls
//! [`compute_interval`] every time it arms a timer.

use std::time::Duration;

use skywatch_signals::{AppState, NetworkState};

use crate::config::PollingConfig;
use crate::priority::Priority;

/// The parts of the environment that influence scheduling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleContext {
    pub app_state: AppState,
    pub network: NetworkState,
    pub low_battery: bool,
}

/// Interval tier selected from priority and environment, before backoff
pub fn base_interval(config: &PollingConfig, ctx: &ScheduleContext, priority: Priority) -> Duration {
    if ctx.low_battery {
        return config.background_minimal;
    }

    if !ctx.app_state.is_active() {
        return if priority.is_urgent() {
            config.background_normal
        } else {
            config.background_slow
        };
    }

    match priority {
        Priority::Critical | Priority::High => config.foreground_fast,
        Priority::Normal => config.foreground_normal,
        Priority::Low | Priority::Minimal => config.foreground_slow,
    }
}

/// Stretch `base` by `2^failures`, capped at `max_backoff` and floored at
/// `min_interval`
pub fn apply_backoff(config: &PollingConfig, base: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }

    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
        .min(config.max_backoff)
        .max(config.min_interval)
}

/// Full interval for one subscription
pub fn compute_interval(
    config: &PollingConfig,
    ctx: &ScheduleContext,
    priority: Priority,
    allow_cellular: bool,
    failures: u32,
) -> Duration {
    let base = base_interval(config, ctx, priority);
    let interval = apply_backoff(config, base, failures);

    if ctx.network.is_cellular() && !allow_cellular {
        interval.max(config.foreground_slow)
    } else {
        interval
    }
}
