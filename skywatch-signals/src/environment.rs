//! Environment values observed from the host platform
//!
//! These are plain `Copy` values with `PartialEq` so that the hub can detect
//! whether a published value is actually a change. None of them carry any
//! scheduling logic; the poller decides what a given environment means.

use serde::{Deserialize, Serialize};

/// Application lifecycle state as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// App is in the foreground and receiving input
    #[default]
    Active,
    /// App is visible but not receiving input (e.g. transitioning, overlay)
    Inactive,
    /// App is in the background
    Background,
}

impl AppState {
    /// Whether the app is in the foreground
    pub fn is_active(self) -> bool {
        matches!(self, AppState::Active)
    }
}

/// Kind of network the device is currently using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Other,
    #[default]
    Unknown,
}

/// Network reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_connected: bool,
    pub network_type: NetworkType,
}

impl NetworkState {
    /// A connected network of the given type
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            is_connected: true,
            network_type,
        }
    }

    /// No connectivity
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            network_type: NetworkType::Unknown,
        }
    }

    /// Whether traffic is currently metered (connected over cellular)
    pub fn is_cellular(&self) -> bool {
        self.is_connected && self.network_type == NetworkType::Cellular
    }
}

impl Default for NetworkState {
    /// Assume connectivity until the platform observer says otherwise
    fn default() -> Self {
        Self::connected(NetworkType::Unknown)
    }
}

/// Battery reading
///
/// `level` is a fraction in `[0, 1]`. Out-of-range readings (some platforms
/// report `-1` when the level is unknown) are clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub level: f32,
    pub plugged: bool,
    pub low_power_mode: bool,
}

impl BatteryStatus {
    pub fn new(level: f32, plugged: bool, low_power_mode: bool) -> Self {
        let level = if level.is_nan() { 1.0 } else { level.clamp(0.0, 1.0) };
        Self {
            level,
            plugged,
            low_power_mode,
        }
    }

    /// Same reading with a different level
    pub fn with_level(self, level: f32) -> Self {
        Self::new(level, self.plugged, self.low_power_mode)
    }
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self::new(1.0, false, false)
    }
}

/// Thresholds used to derive low battery mode from a [`BatteryStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowBatteryPolicy {
    /// Below this level the device is low regardless of charging
    /// Default: 0.15
    pub low_threshold: f32,

    /// Below this level the device is low when running on battery
    /// Default: 0.20
    pub unplugged_low_threshold: f32,
}

impl LowBatteryPolicy {
    /// Whether the reading should put the poller into low battery mode
    pub fn is_low(&self, battery: &BatteryStatus) -> bool {
        battery.low_power_mode
            || battery.level < self.low_threshold
            || (!battery.plugged && battery.level < self.unplugged_low_threshold)
    }
}

impl Default for LowBatteryPolicy {
    fn default() -> Self {
        Self {
            low_threshold: 0.15,
            unplugged_low_threshold: 0.20,
        }
    }
}

/// Point-in-time view of every environment signal
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub app_state: AppState,
    pub network: NetworkState,
    pub battery: BatteryStatus,
}
