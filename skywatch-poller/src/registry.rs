//! In-memory subscription registry
//!
//! One record per subscription id holds everything the scheduler knows about
//! it: options, failure streak, the armed timer and the in-flight poll. The
//! registry also owns the environment the manager last observed.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use skywatch_signals::EnvironmentSnapshot;
use tokio::task::JoinHandle;

use crate::priority::Priority;
use crate::schedule::ScheduleContext;
use crate::subscription::{PollCallback, SubscriptionOptions, SubscriptionStats};

/// A pending timer task
///
/// Dropping an `ArmedTimer` aborts the sleeping task, so replacing or
/// clearing `SubscriptionRecord::timer` is all it takes to cancel.
#[derive(Debug)]
pub(crate) struct ArmedTimer {
    pub token: u64,
    pub interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ArmedTimer {
    pub fn new(token: u64, interval: Duration, handle: JoinHandle<()>) -> Self {
        Self {
            token,
            interval,
            handle: Some(handle),
        }
    }

    /// Consume a timer whose task is the one currently firing
    pub fn fired(mut self) {
        self.handle.take();
    }
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub(crate) struct SubscriptionRecord {
    pub callback: PollCallback,
    pub options: SubscriptionOptions,
    /// Changes every time the id is (re)subscribed
    pub generation: u64,
    pub failure_count: u32,
    pub timer: Option<ArmedTimer>,
    /// Token of the poll currently running, if any
    pub in_flight: Option<u64>,
    /// A poll_now arrived while in flight; run it when the current poll settles
    pub poll_queued: bool,
    pub poll_count: u64,
    pub success_count: u64,
    pub failure_total: u64,
    pub deferred_count: u64,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    pub fn new(callback: PollCallback, options: SubscriptionOptions, generation: u64) -> Self {
        Self {
            callback,
            options,
            generation,
            failure_count: 0,
            timer: None,
            in_flight: None,
            poll_queued: false,
            poll_count: 0,
            success_count: 0,
            failure_total: 0,
            deferred_count: 0,
            last_polled_at: None,
            last_success_at: None,
        }
    }

    pub fn priority(&self) -> Priority {
        self.options.priority
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn stats(&self, id: &str) -> SubscriptionStats {
        SubscriptionStats {
            id: id.to_string(),
            priority: self.options.priority,
            allow_cellular: self.options.allow_cellular,
            failure_count: self.failure_count,
            poll_count: self.poll_count,
            success_count: self.success_count,
            failure_total: self.failure_total,
            deferred_count: self.deferred_count,
            in_flight: self.is_in_flight(),
            next_interval: self.timer.as_ref().map(|t| t.interval),
            last_polled_at: self.last_polled_at,
            last_success_at: self.last_success_at,
        }
    }
}

/// All mutable manager state, guarded by a single lock
pub(crate) struct Registry {
    pub env: EnvironmentSnapshot,
    pub low_battery: bool,
    pub paused: bool,
    pub destroyed: bool,
    pub records: HashMap<String, SubscriptionRecord>,
    /// Polls still running for ids that were unsubscribed, by poll token.
    /// A later subscribe under the same id waits for them.
    pub orphaned: HashMap<String, u64>,
    next_token: u64,
}

impl Registry {
    pub fn new(env: EnvironmentSnapshot, low_battery: bool) -> Self {
        Self {
            env,
            low_battery,
            paused: false,
            destroyed: false,
            records: HashMap::new(),
            orphaned: HashMap::new(),
            next_token: 0,
        }
    }

    /// Unique token for generations, timers and polls
    pub fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn schedule_context(&self) -> ScheduleContext {
        ScheduleContext {
            app_state: self.env.app_state,
            network: self.env.network,
            low_battery: self.low_battery,
        }
    }

    /// Ids of subscriptions that are idle (not in flight)
    pub fn idle_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| !record.is_in_flight())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancel every armed timer
    pub fn disarm_all(&mut self) {
        for record in self.records.values_mut() {
            record.timer = None;
        }
    }

    /// Remove a record, remembering its in-flight poll if it has one
    pub fn remove(&mut self, id: &str) -> Option<SubscriptionRecord> {
        let record = self.records.remove(id)?;
        if let Some(token) = record.in_flight {
            self.orphaned.insert(id.to_string(), token);
        }
        Some(record)
    }

    /// Forget an orphaned poll once it settles
    pub fn settle_orphan(&mut self, id: &str, token: u64) -> bool {
        if self.orphaned.get(id) == Some(&token) {
            self.orphaned.remove(id);
            true
        } else {
            false
        }
    }

    pub fn reset_failures(&mut self) {
        for record in self.records.values_mut() {
            record.failure_count = 0;
        }
    }
}
