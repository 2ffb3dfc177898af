//! Adaptive polling manager
//!
//! Owns the subscription registry, reacts to environment signals and drives
//! one timer per subscription. Every subscription follows the same loop:
//!
//! ```text
//! subscribe ──▶ poll ──▶ settle ──▶ arm timer ──▶ fire ──▶ poll ──▶ ...
//!                 ▲                                  │
//!                 └──── offline: skip, arm again ◀───┘
//! ```
//!
//! A timer is never armed while a poll for the same id is in flight, and a
//! `poll_now` that arrives during a poll is queued behind it, so callbacks for
//! one id never overlap.

use std::collections::HashSet;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use skywatch_signals::{
    AppState, BatteryStatus, EnvironmentSnapshot, NetworkState, SignalHub, Tracked,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::config::PollingConfig;
use crate::error::{CallbackError, PollFailure, PollerError, Result};
use crate::priority::Priority;
use crate::registry::{ArmedTimer, Registry, SubscriptionRecord};
use crate::schedule::compute_interval;
use crate::subscription::{
    erase_callback, ErrorHook, PollCallback, SubscriptionHandle, SubscriptionOptions,
    SubscriptionStats, SuccessHook,
};

/// Snapshot returned by [`PollingManager::status`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PollerStatus {
    pub app_state: AppState,
    pub network_state: NetworkState,
    pub battery_level: f32,
    pub is_low_battery_mode: bool,
    pub is_paused: bool,
    pub subscriber_count: usize,
}

/// Adaptive background polling manager
///
/// Create one at application startup, hand clones to whatever needs to
/// subscribe, and call [`destroy`](Self::destroy) at shutdown. Clones share
/// the same registry. Must be created inside a tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use skywatch_poller::{PollingManager, Priority, SubscriptionOptions};
/// use skywatch_signals::SignalHub;
///
/// # async fn run() -> skywatch_poller::Result<()> {
/// let hub = SignalHub::new();
/// let manager = PollingManager::new()?;
/// manager.attach(&hub)?;
///
/// let handle = manager.subscribe(
///     "flight:LH400",
///     || async { fetch_flight("LH400").await },
///     SubscriptionOptions::new().with_priority(Priority::Critical),
/// )?;
///
/// // later
/// handle.unsubscribe();
/// manager.destroy();
/// # Ok(())
/// # }
/// # async fn fetch_flight(_: &str) -> Result<(), std::io::Error> { Ok(()) }
/// ```
#[derive(Clone)]
pub struct PollingManager {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: PollingConfig,
    registry: Mutex<Registry>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
    this: Weak<Shared>,
}

/// A poll that has been marked in flight and must be launched once the
/// registry lock is released
struct PendingPoll {
    id: String,
    token: u64,
    generation: u64,
    callback: PollCallback,
}

enum Completion {
    Success(SuccessHook),
    Error(ErrorHook, PollFailure, u32),
}

impl PollingManager {
    /// Create a manager with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(PollingConfig::default())
    }

    /// Create a manager with a custom configuration
    pub fn with_config(config: PollingConfig) -> Result<Self> {
        Self::with_environment(config, EnvironmentSnapshot::default())
    }

    /// Create a manager that starts from a known environment instead of the
    /// defaults (foreground, connected, full battery)
    pub fn with_environment(config: PollingConfig, env: EnvironmentSnapshot) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| PollerError::NoRuntime(e.to_string()))?;
        let low_battery = config.low_battery.is_low(&env.battery);

        let shared = Arc::new_cyclic(|this| Shared {
            config,
            registry: Mutex::new(Registry::new(env, low_battery)),
            listeners: Mutex::new(Vec::new()),
            runtime,
            this: this.clone(),
        });

        tracing::info!(
            "Polling manager created (app: {:?}, connected: {}, low battery: {})",
            env.app_state,
            env.network.is_connected,
            low_battery
        );

        Ok(Self { shared })
    }

    /// Register (or replace) a subscription and poll it immediately
    ///
    /// Re-subscribing an existing id cancels its timer first. If the old
    /// entry has a poll in flight, that poll finishes undisturbed, its
    /// result is discarded, and the new entry's first poll runs right after.
    pub fn subscribe<F, Fut, E>(
        &self,
        id: impl Into<String>,
        callback: F,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<CallbackError>,
    {
        let id = id.into();
        let callback = erase_callback(callback);
        let shared = &self.shared;

        let (pending, previous) = {
            let mut reg = shared.registry.lock();
            if reg.destroyed {
                return Err(PollerError::Destroyed);
            }

            let generation = reg.next_token();
            let mut record = SubscriptionRecord::new(callback, options, generation);

            // A poll still running under this id, from the entry being
            // replaced or from one unsubscribed earlier, is adopted so the
            // first poll of the new entry queues behind it.
            let previous = reg.records.remove(&id);
            match &previous {
                Some(previous) => {
                    tracing::debug!("Replacing subscription {}", id);
                    record.in_flight = previous.in_flight;
                }
                None => {
                    if let Some(token) = reg.orphaned.remove(&id) {
                        tracing::debug!("Earlier poll for {} still running, first poll queued", id);
                        record.in_flight = Some(token);
                    }
                }
            }

            tracing::debug!(
                "Subscribed {} (priority: {}, allow cellular: {})",
                id,
                record.options.priority,
                record.options.allow_cellular
            );
            reg.records.insert(id.clone(), record);
            (shared.start_poll(&mut reg, &id, true), previous)
        };

        shared.launch(pending);
        // The replaced entry owns caller closures; drop them unlocked
        drop(previous);
        Ok(SubscriptionHandle::new(id, Arc::downgrade(shared)))
    }

    /// Cancel the timer and forget the subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &str) {
        self.shared.unsubscribe(id);
    }

    /// Change a subscription's priority and re-arm its timer
    pub fn set_priority(&self, id: &str, priority: Priority) {
        let shared = &self.shared;
        let mut reg = shared.registry.lock();
        let rearm = !reg.paused && !reg.destroyed;

        let Some(record) = reg.records.get_mut(id) else {
            tracing::debug!("set_priority ignored for unknown subscription {}", id);
            return;
        };
        record.options.priority = priority;
        tracing::debug!("Priority of {} set to {}", id, priority);

        // An in-flight poll re-arms with the new priority when it settles
        if rearm && !record.is_in_flight() {
            shared.arm(&mut reg, id);
        }
    }

    /// Poll now instead of waiting for the timer
    ///
    /// Queued behind an in-flight poll for the same id. Honoured while
    /// paused, but the subscription is not rescheduled until `resume`.
    pub fn poll_now(&self, id: &str) {
        let shared = &self.shared;
        let pending = {
            let mut reg = shared.registry.lock();
            if reg.destroyed {
                return;
            }
            if !reg.records.contains_key(id) {
                tracing::debug!("poll_now ignored for unknown subscription {}", id);
                return;
            }
            shared.start_poll(&mut reg, id, true)
        };
        shared.launch(pending);
    }

    /// Cancel every timer and stop automatic polling
    pub fn pause(&self) {
        let mut reg = self.shared.registry.lock();
        if reg.destroyed || reg.paused {
            return;
        }
        reg.paused = true;
        reg.disarm_all();
        tracing::info!("Polling paused ({} subscriptions)", reg.records.len());
    }

    /// Re-arm every idle subscription and resume automatic polling
    pub fn resume(&self) {
        let shared = &self.shared;
        let mut reg = shared.registry.lock();
        if reg.destroyed || !reg.paused {
            return;
        }
        reg.paused = false;
        shared.rearm_idle(&mut reg, &HashSet::new());
        tracing::info!("Polling resumed ({} subscriptions)", reg.records.len());
    }

    /// Current environment and registry summary
    pub fn status(&self) -> PollerStatus {
        let reg = self.shared.registry.lock();
        PollerStatus {
            app_state: reg.env.app_state,
            network_state: reg.env.network,
            battery_level: reg.env.battery.level,
            is_low_battery_mode: reg.low_battery,
            is_paused: reg.paused,
            subscriber_count: reg.records.len(),
        }
    }

    /// Stop everything and release all subscriptions. Terminal.
    pub fn destroy(&self) {
        let records = {
            let mut reg = self.shared.registry.lock();
            if reg.destroyed {
                return;
            }
            reg.paused = true;
            reg.destroyed = true;
            reg.orphaned.clear();
            std::mem::take(&mut reg.records)
        };

        self.shared.detach_listeners();
        tracing::info!("Polling manager destroyed ({} subscriptions released)", records.len());
        // Dropping the records aborts their timers
        drop(records);
    }

    /// Follow the hub's signals until destroyed
    ///
    /// The manager first syncs to the hub's current values, then spawns one
    /// listener task per signal. Attaching again replaces the previous
    /// listeners.
    pub fn attach(&self, hub: &SignalHub) -> Result<()> {
        let shared = &self.shared;
        if shared.registry.lock().destroyed {
            return Err(PollerError::Destroyed);
        }

        let mut receivers = hub.subscribe();
        let network = *receivers.network.borrow_and_update();
        let app_state = *receivers.app_state.borrow_and_update();
        shared.apply_network_state(network.value, false);
        shared.apply_battery(*receivers.battery.borrow_and_update());
        shared.apply_app_state(app_state.value, false);

        // The watch channels coalesce values; a moved recovery counter means
        // an offline or background spell happened between two wake-ups.
        let mut seen_activations = app_state.recoveries;
        let mut seen_reconnects = network.recoveries;
        let listeners = vec![
            shared.spawn_listener(receivers.app_state, move |s, tracked: Tracked<AppState>| {
                let activated = tracked.recoveries != seen_activations;
                seen_activations = tracked.recoveries;
                s.apply_app_state(tracked.value, activated);
            }),
            shared.spawn_listener(receivers.network, move |s, tracked: Tracked<NetworkState>| {
                let reconnected = tracked.recoveries != seen_reconnects;
                seen_reconnects = tracked.recoveries;
                s.apply_network_state(tracked.value, reconnected);
            }),
            shared.spawn_listener(receivers.battery, |s, battery| s.apply_battery(battery)),
        ];

        let previous = std::mem::replace(&mut *shared.listeners.lock(), listeners);
        for handle in previous {
            handle.abort();
        }
        tracing::debug!("Attached to signal hub");
        Ok(())
    }

    /// React to an app lifecycle transition
    pub fn apply_app_state(&self, state: AppState) {
        self.shared.apply_app_state(state, false);
    }

    /// React to a network reachability change
    pub fn apply_network_state(&self, network: NetworkState) {
        self.shared.apply_network_state(network, false);
    }

    /// React to a battery reading
    pub fn apply_battery(&self, battery: BatteryStatus) {
        self.shared.apply_battery(battery);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.registry.lock().records.contains_key(id)
    }

    /// Consecutive failures for `id`, if subscribed
    pub fn failure_count(&self, id: &str) -> Option<u32> {
        self.shared
            .registry
            .lock()
            .records
            .get(id)
            .map(|r| r.failure_count)
    }

    pub fn subscription_stats(&self, id: &str) -> Option<SubscriptionStats> {
        self.shared.registry.lock().records.get(id).map(|r| r.stats(id))
    }

    /// Stats for every subscription, most urgent first
    pub fn all_stats(&self) -> Vec<SubscriptionStats> {
        let mut stats: Vec<_> = self
            .shared
            .registry
            .lock()
            .records
            .iter()
            .map(|(id, record)| record.stats(id))
            .collect();
        stats.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        stats
    }

    pub fn config(&self) -> &PollingConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for PollingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingManager")
            .field("status", &self.status())
            .finish()
    }
}

impl Shared {
    pub(crate) fn unsubscribe(&self, id: &str) {
        let removed = self.registry.lock().remove(id);
        match removed {
            Some(_) => tracing::debug!("Unsubscribed {}", id),
            None => tracing::debug!("unsubscribe ignored for unknown subscription {}", id),
        }
    }

    /// Mark a poll in flight, or defer it when offline
    ///
    /// Returns the poll to launch once the lock is released. With
    /// `queue_if_busy`, a request for an id that is already in flight is
    /// remembered and run when the current poll settles; otherwise it is
    /// dropped.
    fn start_poll(&self, reg: &mut Registry, id: &str, queue_if_busy: bool) -> Option<PendingPoll> {
        let connected = reg.env.network.is_connected;
        let paused = reg.paused;
        let token = reg.next_token();
        let record = reg.records.get_mut(id)?;

        if record.is_in_flight() {
            if queue_if_busy {
                record.poll_queued = true;
                tracing::debug!("Poll for {} queued behind the one in flight", id);
            }
            return None;
        }

        record.timer = None;

        if !connected {
            record.deferred_count += 1;
            tracing::debug!("Offline, deferring poll for {}", id);
            if !paused {
                self.arm(reg, id);
            }
            return None;
        }

        record.in_flight = Some(token);
        record.poll_count += 1;
        record.last_polled_at = Some(Utc::now());

        Some(PendingPoll {
            id: id.to_string(),
            token,
            generation: record.generation,
            callback: Arc::clone(&record.callback),
        })
    }

    /// Arm (or re-arm) the timer for `id` with a freshly computed interval
    fn arm(&self, reg: &mut Registry, id: &str) {
        let ctx = reg.schedule_context();
        let token = reg.next_token();
        let Some(record) = reg.records.get_mut(id) else {
            return;
        };

        let interval = compute_interval(
            &self.config,
            &ctx,
            record.options.priority,
            record.options.allow_cellular,
            record.failure_count,
        );

        let weak = self.this.clone();
        let timer_id = id.to_string();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire(&timer_id, token);
            }
        });

        // Replacing the previous timer aborts it
        record.timer = Some(ArmedTimer::new(token, interval, handle));
        tracing::debug!(
            "Next poll for {} in {:?} (failures: {})",
            id,
            interval,
            record.failure_count
        );
    }

    fn rearm_idle(&self, reg: &mut Registry, skip: &HashSet<String>) {
        for id in reg.idle_ids() {
            if !skip.contains(&id) {
                self.arm(reg, &id);
            }
        }
    }

    fn fire(&self, id: &str, token: u64) {
        let pending = {
            let mut reg = self.registry.lock();
            let Some(record) = reg.records.get_mut(id) else {
                return;
            };

            match record.timer.take() {
                Some(timer) if timer.token == token => timer.fired(),
                other => {
                    // Superseded by a newer timer or cancelled
                    record.timer = other;
                    return;
                }
            }
            self.start_poll(&mut reg, id, false)
        };
        self.launch(pending);
    }

    fn launch(&self, pending: Option<PendingPoll>) {
        let Some(poll) = pending else {
            return;
        };

        let weak = self.this.clone();
        self.runtime.spawn(async move {
            let PendingPoll {
                id,
                token,
                generation,
                callback,
            } = poll;

            // Run the callback in its own task so a panic is contained
            let outcome = match tokio::spawn(async move { callback().await }).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(PollFailure::Callback(error)),
                Err(join_error) => Err(PollFailure::Panicked(panic_message(join_error))),
            };

            if let Some(shared) = weak.upgrade() {
                shared.complete(&id, token, generation, outcome);
            }
        });
    }

    fn complete(
        &self,
        id: &str,
        token: u64,
        generation: u64,
        outcome: std::result::Result<(), PollFailure>,
    ) {
        let (completion, follow_up) = {
            let mut reg = self.registry.lock();
            let rearm = !reg.paused && !reg.destroyed;

            if reg.settle_orphan(id, token) {
                tracing::debug!("Discarding poll result for removed subscription {}", id);
                return;
            }
            let Some(record) = reg.records.get_mut(id) else {
                return;
            };
            if record.in_flight != Some(token) {
                return;
            }
            record.in_flight = None;

            let completion = if record.generation != generation {
                tracing::debug!("Discarding poll result for replaced subscription {}", id);
                None
            } else {
                match outcome {
                    Ok(()) => {
                        record.failure_count = 0;
                        record.success_count += 1;
                        record.last_success_at = Some(Utc::now());
                        record.options.on_success.clone().map(Completion::Success)
                    }
                    Err(failure) => {
                        record.failure_count = record.failure_count.saturating_add(1);
                        record.failure_total += 1;
                        tracing::warn!(
                            "Poll for {} failed (attempt {}): {}",
                            id,
                            record.failure_count,
                            failure
                        );
                        let count = record.failure_count;
                        record
                            .options
                            .on_error
                            .clone()
                            .map(|hook| Completion::Error(hook, failure, count))
                    }
                }
            };

            let queued = std::mem::take(&mut record.poll_queued);
            let follow_up = if queued {
                self.start_poll(&mut reg, id, true)
            } else {
                if rearm {
                    self.arm(&mut reg, id);
                }
                None
            };
            (completion, follow_up)
        };

        if let Some(completion) = completion {
            let result = catch_unwind(AssertUnwindSafe(|| match &completion {
                Completion::Success(hook) => hook(),
                Completion::Error(hook, failure, count) => hook(failure, *count),
            }));
            if result.is_err() {
                tracing::error!("Hook for {} panicked", id);
            }
        }

        self.launch(follow_up);
    }

    /// `activated` reports a transition into the foreground that may not be
    /// visible in `previous -> state`
    fn apply_app_state(&self, state: AppState, activated: bool) {
        let pending = {
            let mut reg = self.registry.lock();
            let previous = reg.env.app_state;
            if reg.destroyed || (previous == state && !activated) {
                return;
            }
            reg.env.app_state = state;
            let foreground = activated || (!previous.is_active() && state.is_active());
            tracing::info!(
                "App state {:?} -> {:?} (foreground entry: {})",
                previous,
                state,
                foreground
            );

            if reg.paused {
                return;
            }

            let mut started = HashSet::new();
            let mut pending = Vec::new();
            if foreground {
                let urgent: Vec<String> = reg
                    .records
                    .iter()
                    .filter(|(_, record)| record.priority().is_urgent())
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in urgent {
                    pending.extend(self.start_poll(&mut reg, &id, false));
                    started.insert(id);
                }
                tracing::debug!("Foreground catch-up for {} subscriptions", started.len());
            }

            self.rearm_idle(&mut reg, &started);
            pending
        };

        for poll in pending {
            self.launch(Some(poll));
        }
    }

    /// `reconnected` reports a disconnected to connected transition that may
    /// not be visible in `previous -> network`
    fn apply_network_state(&self, network: NetworkState, reconnected: bool) {
        let pending = {
            let mut reg = self.registry.lock();
            let previous = reg.env.network;
            if reg.destroyed || (previous == network && !reconnected) {
                return;
            }
            reg.env.network = network;

            let restored = reconnected || (!previous.is_connected && network.is_connected);
            tracing::info!(
                "Network connected: {} -> {} ({:?}, restored: {})",
                previous.is_connected,
                network.is_connected,
                network.network_type,
                restored
            );
            if restored {
                reg.reset_failures();
            }

            if reg.paused {
                return;
            }

            if restored && network.is_connected {
                let ids: Vec<String> = reg.records.keys().cloned().collect();
                let pending: Vec<_> = ids
                    .iter()
                    .filter_map(|id| self.start_poll(&mut reg, id, false))
                    .collect();
                tracing::debug!("Reconnection catch-up for {} subscriptions", pending.len());
                pending
            } else {
                self.rearm_idle(&mut reg, &HashSet::new());
                Vec::new()
            }
        };

        for poll in pending {
            self.launch(Some(poll));
        }
    }

    fn apply_battery(&self, battery: BatteryStatus) {
        let mut reg = self.registry.lock();
        if reg.destroyed {
            return;
        }
        reg.env.battery = battery;

        let low_battery = self.config.low_battery.is_low(&battery);
        if low_battery == reg.low_battery {
            return;
        }
        reg.low_battery = low_battery;
        tracing::info!(
            "Low battery mode {} (level {:.0}%)",
            if low_battery { "on" } else { "off" },
            battery.level * 100.0
        );

        if !reg.paused {
            self.rearm_idle(&mut reg, &HashSet::new());
        }
    }

    fn spawn_listener<T, F>(&self, mut rx: watch::Receiver<T>, mut apply: F) -> JoinHandle<()>
    where
        T: Copy + Send + Sync + 'static,
        F: FnMut(&Shared, T) + Send + 'static,
    {
        let weak = self.this.clone();
        self.runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let value = *rx.borrow_and_update();
                match weak.upgrade() {
                    Some(shared) => apply(&shared, value),
                    None => break,
                }
            }
        })
    }

    fn detach_listeners(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for handle in self.listeners.get_mut().drain(..) {
            handle.abort();
        }
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
