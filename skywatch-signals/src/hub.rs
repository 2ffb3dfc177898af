//! Signal hub connecting platform observers to consumers
//!
//! Each signal lives in its own `tokio::sync::watch` channel. Publishing a
//! value that equals the current one is swallowed, so consumers only wake up
//! on real transitions. Late subscribers always see the latest value.
//!
//! A watch channel only keeps the latest value, so a consumer can miss a
//! short-lived state (offline for one tick, foreground for one tick). App
//! state and network values therefore carry a [`Tracked::recoveries`]
//! counter that the hub bumps on every recovery edge; a consumer that sees
//! the counter move knows a recovery happened even if the value it wakes up
//! to looks unchanged.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::watch;

use crate::environment::{AppState, BatteryStatus, EnvironmentSnapshot, NetworkState};

/// Publisher side of the environment signals
///
/// Cloning a hub is cheap; all clones publish into the same channels.
///
/// # Example
///
/// ```rust
/// use skywatch_signals::{AppState, SignalHub};
///
/// let hub = SignalHub::new();
/// assert!(hub.publish_app_state(AppState::Background));
/// // Same value again is not a change
/// assert!(!hub.publish_app_state(AppState::Background));
/// assert_eq!(hub.snapshot().app_state, AppState::Background);
/// ```
#[derive(Clone)]
pub struct SignalHub {
    app_state: Arc<watch::Sender<Tracked<AppState>>>,
    network: Arc<watch::Sender<Tracked<NetworkState>>>,
    battery: Arc<watch::Sender<BatteryStatus>>,
}

/// A published value plus the number of recovery edges seen so far
///
/// For app state a recovery is any transition into `Active`; for network it
/// is any disconnected to connected transition. Derefs to the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tracked<T> {
    pub value: T,
    pub recoveries: u64,
}

impl<T> Tracked<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            recoveries: 0,
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl SignalHub {
    /// Create a hub seeded with default environment values
    pub fn new() -> Self {
        Self::with_initial(EnvironmentSnapshot::default())
    }

    /// Create a hub seeded with the given environment
    pub fn with_initial(initial: EnvironmentSnapshot) -> Self {
        let (app_state, _) = watch::channel(Tracked::new(initial.app_state));
        let (network, _) = watch::channel(Tracked::new(initial.network));
        let (battery, _) = watch::channel(initial.battery);

        Self {
            app_state: Arc::new(app_state),
            network: Arc::new(network),
            battery: Arc::new(battery),
        }
    }

    /// Publish an app lifecycle transition, returning whether it changed
    pub fn publish_app_state(&self, state: AppState) -> bool {
        let changed = publish_tracked(&self.app_state, state, |previous, next| {
            !previous.is_active() && next.is_active()
        });
        if changed {
            tracing::debug!("App state changed to {:?}", state);
        }
        changed
    }

    /// Publish a network reachability change, returning whether it changed
    pub fn publish_network(&self, network: NetworkState) -> bool {
        let changed = publish_tracked(&self.network, network, |previous, next| {
            !previous.is_connected && next.is_connected
        });
        if changed {
            tracing::debug!(
                "Network changed: connected={} type={:?}",
                network.is_connected,
                network.network_type
            );
        }
        changed
    }

    /// Publish a battery reading, returning whether it changed
    pub fn publish_battery(&self, battery: BatteryStatus) -> bool {
        let changed = publish(&self.battery, battery);
        if changed {
            tracing::trace!(
                "Battery changed: level={:.2} plugged={} low_power={}",
                battery.level,
                battery.plugged,
                battery.low_power_mode
            );
        }
        changed
    }

    /// Receivers for every signal, positioned at the current values
    pub fn subscribe(&self) -> SignalReceivers {
        SignalReceivers {
            app_state: self.app_state.subscribe(),
            network: self.network.subscribe(),
            battery: self.battery.subscribe(),
        }
    }

    /// Current value of every signal
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            app_state: self.app_state.borrow().value,
            network: self.network.borrow().value,
            battery: *self.battery.borrow(),
        }
    }

    /// Number of live receivers per signal (app, network, battery)
    pub fn receiver_counts(&self) -> (usize, usize, usize) {
        (
            self.app_state.receiver_count(),
            self.network.receiver_count(),
            self.battery.receiver_count(),
        )
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Consumer side of the environment signals
///
/// Each receiver is independent; await `changed()` on the one you care about.
#[derive(Debug)]
pub struct SignalReceivers {
    pub app_state: watch::Receiver<Tracked<AppState>>,
    pub network: watch::Receiver<Tracked<NetworkState>>,
    pub battery: watch::Receiver<BatteryStatus>,
}

/// Like [`publish`], counting a recovery when `is_recovery(previous, next)`
fn publish_tracked<T, F>(sender: &watch::Sender<Tracked<T>>, value: T, is_recovery: F) -> bool
where
    T: PartialEq + Copy,
    F: Fn(T, T) -> bool,
{
    sender.send_if_modified(|current| {
        if current.value == value {
            return false;
        }
        if is_recovery(current.value, value) {
            current.recoveries += 1;
        }
        current.value = value;
        true
    })
}

fn publish<T: PartialEq>(sender: &watch::Sender<T>, value: T) -> bool {
    sender.send_if_modified(|current| {
        if *current != value {
            *current = value;
            true
        } else {
            false
        }
    })
}
