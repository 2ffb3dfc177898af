//! Scripted environment timelines

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;
use skywatch_poller::PollingConfig;
use skywatch_signals::{AppState, BatteryStatus, NetworkState, NetworkType, SignalHub};

const MINUTE: u64 = 60;

/// Polling configuration preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    Default,
    Aggressive,
    BatterySaver,
}

impl Preset {
    pub fn polling_config(self) -> PollingConfig {
        match self {
            Preset::Default => PollingConfig::default(),
            Preset::Aggressive => PollingConfig::aggressive(),
            Preset::BatterySaver => PollingConfig::battery_saver(),
        }
    }
}

/// Environment timeline to play against the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Foreground on wifi, nothing changes
    Steady,
    /// Pocketed on the way to the airport: background, cellular, a tunnel,
    /// then back in the foreground on terminal wifi
    Commute,
    /// Battery drains below the low threshold, then the charger is plugged in
    LowBattery,
    /// Connectivity drops for fifteen minutes
    Offline,
}

/// One change published to the hub
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvironmentEvent {
    App(AppState),
    Network(NetworkState),
    Battery(BatteryStatus),
}

impl EnvironmentEvent {
    /// Publish to the hub, returning whether the value changed
    pub fn publish(self, hub: &SignalHub) -> bool {
        match self {
            EnvironmentEvent::App(state) => hub.publish_app_state(state),
            EnvironmentEvent::Network(network) => hub.publish_network(network),
            EnvironmentEvent::Battery(battery) => hub.publish_battery(battery),
        }
    }
}

impl fmt::Display for EnvironmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentEvent::App(state) => write!(f, "app -> {:?}", state),
            EnvironmentEvent::Network(network) if network.is_connected => {
                write!(f, "network -> {:?}", network.network_type)
            }
            EnvironmentEvent::Network(_) => write!(f, "network -> offline"),
            EnvironmentEvent::Battery(battery) => write!(
                f,
                "battery -> {:.0}%{}",
                battery.level * 100.0,
                if battery.plugged { " (charging)" } else { "" }
            ),
        }
    }
}

impl Scenario {
    /// Events with their offset from the start, in order
    pub fn timeline(self) -> Vec<(Duration, EnvironmentEvent)> {
        use EnvironmentEvent::*;

        let at = |minutes: u64, event| (Duration::from_secs(minutes * MINUTE), event);
        let wifi = NetworkState::connected(NetworkType::Wifi);
        let cellular = NetworkState::connected(NetworkType::Cellular);

        match self {
            Scenario::Steady => vec![at(0, Network(wifi))],
            Scenario::Commute => vec![
                at(0, Network(wifi)),
                at(5, App(AppState::Background)),
                at(15, Network(cellular)),
                at(25, Network(NetworkState::disconnected())),
                at(30, Network(cellular)),
                at(40, App(AppState::Active)),
                at(50, Network(wifi)),
            ],
            Scenario::LowBattery => {
                let mut events = vec![at(0, Network(wifi))];
                for step in 0..6u64 {
                    let level = 0.40 - 0.05 * step as f32;
                    events.push(at(step * 5, Battery(BatteryStatus::new(level, false, false))));
                }
                events.push(at(45, Battery(BatteryStatus::new(0.20, true, false))));
                events
            }
            Scenario::Offline => vec![
                at(0, Network(wifi)),
                at(10, Network(NetworkState::disconnected())),
                at(25, Network(wifi)),
            ],
        }
    }
}
