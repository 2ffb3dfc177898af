//! Device environment signals for skywatch
//!
//! Platform observers (app lifecycle, network reachability, battery) publish
//! into a [`SignalHub`]; the polling manager subscribes to it and adjusts its
//! refresh cadence. This crate only models and transports the signals.
//!
//! # Quick Start
//!
//! ```rust
//! use skywatch_signals::{BatteryStatus, LowBatteryPolicy, NetworkState, NetworkType, SignalHub};
//!
//! let hub = SignalHub::new();
//! let receivers = hub.subscribe();
//!
//! hub.publish_network(NetworkState::connected(NetworkType::Cellular));
//! hub.publish_battery(BatteryStatus::new(0.12, false, false));
//!
//! assert!(receivers.network.borrow().is_cellular());
//! assert!(LowBatteryPolicy::default().is_low(&hub.snapshot().battery));
//! ```
//!
//! # Architecture
//!
//! ```text
//! platform observers ──publish──▶ SignalHub
//!                                   ├── watch<AppState>
//!                                   ├── watch<NetworkState>
//!                                   └── watch<BatteryStatus>
//!                                          │
//!                                          ▼
//!                                   SignalReceivers (consumers)
//! ```

pub mod environment;
pub mod hub;

pub use environment::{
    AppState, BatteryStatus, EnvironmentSnapshot, LowBatteryPolicy, NetworkState, NetworkType,
};
pub use hub::{SignalHub, SignalReceivers, Tracked};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::environment::{
        AppState, BatteryStatus, EnvironmentSnapshot, LowBatteryPolicy, NetworkState, NetworkType,
    };
    pub use crate::hub::{SignalHub, SignalReceivers, Tracked};
}
