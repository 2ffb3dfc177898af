//! Subscription options, handles and statistics

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;

use crate::error::{CallbackError, PollFailure};
use crate::manager::Shared;
use crate::priority::Priority;

/// Type-erased refresh callback stored by the manager
pub type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Hook invoked after a successful poll
pub type SuccessHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked after a failed poll with the failure and the new
/// consecutive failure count
pub type ErrorHook = Arc<dyn Fn(&PollFailure, u32) + Send + Sync>;

/// Erase a caller's async closure into a [`PollCallback`]
pub(crate) fn erase_callback<F, Fut, E>(callback: F) -> PollCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<CallbackError>,
{
    Arc::new(move || {
        callback()
            .map(|result| result.map_err(Into::<CallbackError>::into))
            .boxed()
    })
}

/// Options for a subscription
///
/// # Example
///
/// ```rust
/// use skywatch_poller::{Priority, SubscriptionOptions};
///
/// let options = SubscriptionOptions::new()
///     .with_priority(Priority::Critical)
///     .with_allow_cellular(false)
///     .on_error(|failure, count| eprintln!("refresh failed ({count} in a row): {failure}"));
/// assert_eq!(options.priority, Priority::Critical);
/// ```
#[derive(Clone)]
pub struct SubscriptionOptions {
    /// Default: `Priority::Normal`
    pub priority: Priority,

    /// When false, never poll faster than the foreground-slow tier on cellular
    /// Default: true
    pub allow_cellular: bool,

    pub on_success: Option<SuccessHook>,
    pub on_error: Option<ErrorHook>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_allow_cellular(mut self, allow_cellular: bool) -> Self {
        self.allow_cellular = allow_cellular;
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PollFailure, u32) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            allow_cellular: true,
            on_success: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("priority", &self.priority)
            .field("allow_cellular", &self.allow_cellular)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Handle returned by [`PollingManager::subscribe`](crate::PollingManager::subscribe)
///
/// Only holds a weak reference to the manager, so keeping a handle around
/// never keeps a destroyed or dropped manager alive. Dropping the handle
/// does not unsubscribe.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    manager: Weak<Shared>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: String, manager: Weak<Shared>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Same as `PollingManager::unsubscribe(id)`; safe to call repeatedly
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.manager.upgrade() {
            shared.unsubscribe(&self.id);
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}

/// Read-only view of one subscription's scheduling state
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStats {
    pub id: String,
    pub priority: Priority,
    pub allow_cellular: bool,
    /// Consecutive failures since the last success or reconnection
    pub failure_count: u32,
    /// Callback invocations
    pub poll_count: u64,
    pub success_count: u64,
    pub failure_total: u64,
    /// Timer firings skipped because the device was offline
    pub deferred_count: u64,
    pub in_flight: bool,
    /// Interval the pending timer was armed with, if one is armed
    pub next_interval: Option<Duration>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl fmt::Display for SubscriptionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] polls: {}, ok: {}, failed: {} (streak {}), deferred: {}",
            self.id,
            self.priority,
            self.poll_count,
            self.success_count,
            self.failure_total,
            self.failure_count,
            self.deferred_count
        )?;
        match (self.in_flight, self.next_interval) {
            (true, _) => write!(f, ", in flight"),
            (false, Some(interval)) => write!(f, ", next in {:?}", interval),
            (false, None) => write!(f, ", idle"),
        }
    }
}
