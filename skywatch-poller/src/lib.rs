//! # skywatch-poller
//!
//! Adaptive background polling for live flight data.
//!
//! Features register a refresh callback with a [`PollingManager`] and a
//! [`Priority`]. The manager decides how often each callback runs based on
//! app lifecycle, network reachability and battery, backs off exponentially
//! on failure, skips polls while offline and catches up when connectivity or
//! the foreground returns.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use skywatch_poller::prelude::*;
//!
//! # async fn run() -> skywatch_poller::Result<()> {
//! let hub = SignalHub::new();
//! let manager = PollingManager::with_config(PollingConfig::battery_saver())?;
//! manager.attach(&hub)?;
//!
//! manager.subscribe(
//!     "airport-board:SFO",
//!     || async { Ok::<(), std::io::Error>(()) },
//!     SubscriptionOptions::new()
//!         .with_priority(Priority::High)
//!         .with_allow_cellular(false),
//! )?;
//!
//! // Platform observers report changes through the hub
//! hub.publish_app_state(AppState::Background);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod priority;
mod registry;
pub mod schedule;
pub mod subscription;

pub use config::PollingConfig;
pub use error::{CallbackError, PollFailure, PollerError, Result};
pub use manager::{PollerStatus, PollingManager};
pub use priority::{ParsePriorityError, Priority};
pub use schedule::{apply_backoff, base_interval, compute_interval, ScheduleContext};
pub use subscription::{
    ErrorHook, PollCallback, SubscriptionHandle, SubscriptionOptions, SubscriptionStats,
    SuccessHook,
};

pub use skywatch_signals::{
    AppState, BatteryStatus, EnvironmentSnapshot, LowBatteryPolicy, NetworkState, NetworkType,
    SignalHub,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PollingConfig;
    pub use crate::error::{PollFailure, PollerError};
    pub use crate::manager::{PollerStatus, PollingManager};
    pub use crate::priority::Priority;
    pub use crate::subscription::{SubscriptionHandle, SubscriptionOptions, SubscriptionStats};
    pub use skywatch_signals::prelude::*;
}
