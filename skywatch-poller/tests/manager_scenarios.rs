//! End-to-end scheduling scenarios on a paused tokio clock.
//!
//! Every test runs with `start_paused = true`; time only moves through
//! `advance`, and `settle` lets spawned timer and poll tasks run to
//! quiescence without the runtime auto-advancing the clock.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{ready, BoxFuture, Ready};
use futures::FutureExt;
use parking_lot::Mutex;
use skywatch_poller::prelude::*;
use tokio::sync::Semaphore;

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration + Duration::from_millis(1)).await;
    settle().await;
}

/// Counts invocations and fails on demand
#[derive(Clone, Default)]
struct Fetcher {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl Fetcher {
    fn new() -> Self {
        Self::default()
    }

    fn failing() -> Self {
        let fetcher = Self::default();
        fetcher.set_failing(true);
        fetcher
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn callback(&self) -> impl Fn() -> Ready<Result<(), io::Error>> + Send + Sync + 'static {
        let fetcher = self.clone();
        move || {
            fetcher.calls.fetch_add(1, Ordering::SeqCst);
            if fetcher.failing.load(Ordering::SeqCst) {
                ready(Err(io::Error::new(io::ErrorKind::Other, "upstream returned 503")))
            } else {
                ready(Ok(()))
            }
        }
    }
}

/// A callback that blocks until the test releases it, tracking concurrency
#[derive(Clone)]
struct Gate {
    permits: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn release_one(&self) {
        self.permits.add_permits(1);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn callback(&self) -> impl Fn() -> BoxFuture<'static, Result<(), io::Error>> + Send + Sync {
        let gate = self.clone();
        move || {
            let gate = gate.clone();
            async move {
                gate.calls.fetch_add(1, Ordering::SeqCst);
                let now = gate.active.fetch_add(1, Ordering::SeqCst) + 1;
                gate.max_active.fetch_max(now, Ordering::SeqCst);

                gate.permits
                    .acquire()
                    .await
                    .expect("gate semaphore closed")
                    .forget();

                gate.active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }
}

fn next_interval(manager: &PollingManager, id: &str) -> Option<Duration> {
    manager
        .subscription_stats(id)
        .expect("subscription should exist")
        .next_interval
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_poll_in_flight() {
    let manager = PollingManager::new().unwrap();
    let gate = Gate::new();

    manager
        .subscribe("flight:BA286", gate.callback(), SubscriptionOptions::default())
        .unwrap();
    settle().await;
    assert_eq!(gate.calls(), 1);

    // Requests during flight collapse into one queued poll
    manager.poll_now("flight:BA286");
    manager.poll_now("flight:BA286");
    manager.poll_now("flight:BA286");
    advance(Duration::from_secs(120)).await;
    assert_eq!(gate.calls(), 1);
    assert_eq!(next_interval(&manager, "flight:BA286"), None);

    gate.release_one();
    settle().await;
    assert_eq!(gate.calls(), 2, "queued poll runs once the first settles");

    gate.release_one();
    settle().await;
    assert_eq!(gate.calls(), 2);
    assert_eq!(gate.max_active.load(Ordering::SeqCst), 1);

    let stats = manager.subscription_stats("flight:BA286").unwrap();
    assert!(!stats.in_flight);
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.next_interval, Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_to_ceiling_then_resets() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::failing();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);

    manager
        .subscribe(
            "airport-board",
            fetcher.callback(),
            SubscriptionOptions::default().on_error(move |_, count| sink.lock().push(count)),
        )
        .unwrap();
    settle().await;

    let mut intervals = Vec::new();
    for _ in 0..8 {
        let interval = next_interval(&manager, "airport-board").unwrap();
        intervals.push(interval.as_secs());
        advance(interval).await;
    }

    assert_eq!(intervals, vec![60, 120, 240, 480, 960, 1920, 3600, 3600]);
    assert!(intervals.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*reported.lock(), (1..=9).collect::<Vec<u32>>());
    assert_eq!(manager.failure_count("airport-board"), Some(9));

    // One success clears the streak
    fetcher.set_failing(false);
    advance(Duration::from_secs(3600)).await;
    assert_eq!(manager.failure_count("airport-board"), Some(0));
    assert_eq!(next_interval(&manager, "airport-board"), Some(Duration::from_secs(30)));
    assert_eq!(fetcher.calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_low_battery_overrides_every_priority() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::new();
    let feeds = [
        ("flight:QF1", Priority::Critical),
        ("airport-board", Priority::Normal),
        ("fleet-map", Priority::Low),
    ];
    for (id, priority) in feeds {
        manager
            .subscribe(id, fetcher.callback(), SubscriptionOptions::new().with_priority(priority))
            .unwrap();
    }
    settle().await;

    manager.apply_battery(BatteryStatus::new(0.10, false, false));
    assert!(manager.status().is_low_battery_mode);
    for (id, _) in feeds {
        assert_eq!(next_interval(&manager, id), Some(Duration::from_secs(1800)));
    }

    manager.apply_battery(BatteryStatus::new(0.90, false, false));
    assert!(!manager.status().is_low_battery_mode);
    assert_eq!(next_interval(&manager, "flight:QF1"), Some(Duration::from_secs(15)));
    assert_eq!(next_interval(&manager, "airport-board"), Some(Duration::from_secs(30)));
    assert_eq!(next_interval(&manager, "fleet-map"), Some(Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_polls_are_deferred_not_failed() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::new();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);

    manager
        .subscribe(
            "flight:EK1",
            fetcher.callback(),
            SubscriptionOptions::default().on_error(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), 1);

    manager.apply_network_state(NetworkState::disconnected());
    advance(Duration::from_secs(30)).await;
    manager.poll_now("flight:EK1");

    let stats = manager.subscription_stats("flight:EK1").unwrap();
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.deferred_count, 2);
    assert_eq!(stats.next_interval, Some(Duration::from_secs(30)));
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    // Subscribing while offline defers the first poll too
    let offline = Fetcher::new();
    manager
        .subscribe("fleet-map", offline.callback(), SubscriptionOptions::default())
        .unwrap();
    settle().await;
    assert_eq!(offline.calls(), 0);
    assert_eq!(manager.subscription_stats("fleet-map").unwrap().deferred_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_resets_failures_and_polls_everything() {
    let manager = PollingManager::new().unwrap();
    let healthy = Fetcher::new();
    let flaky_b = Fetcher::failing();
    let flaky_c = Fetcher::failing();

    manager.subscribe("a", healthy.callback(), SubscriptionOptions::default()).unwrap();
    manager.subscribe("b", flaky_b.callback(), SubscriptionOptions::default()).unwrap();
    manager.subscribe("c", flaky_c.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;
    assert_eq!(manager.failure_count("b"), Some(1));
    assert_eq!(manager.failure_count("c"), Some(1));

    manager.apply_network_state(NetworkState::disconnected());
    manager.apply_network_state(NetworkState::connected(NetworkType::Wifi));

    for id in ["a", "b", "c"] {
        assert_eq!(manager.failure_count(id), Some(0), "{} should be reset", id);
    }

    settle().await;
    assert_eq!(healthy.calls(), 2);
    assert_eq!(flaky_b.calls(), 2);
    assert_eq!(flaky_c.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_resets_failures_while_paused() {
    let manager = PollingManager::new().unwrap();
    let flaky = Fetcher::failing();
    manager.subscribe("b", flaky.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    manager.pause();
    manager.apply_network_state(NetworkState::disconnected());
    manager.apply_network_state(NetworkState::connected(NetworkType::Wifi));
    settle().await;

    assert_eq!(manager.failure_count("b"), Some(0));
    assert_eq!(flaky.calls(), 1, "no catch-up poll while paused");
}

#[tokio::test(start_paused = true)]
async fn test_foreground_catch_up_only_polls_urgent() {
    let manager = PollingManager::new().unwrap();
    let critical = Fetcher::new();
    let high = Fetcher::new();
    let normal = Fetcher::new();
    let low = Fetcher::new();

    for (id, fetcher, priority) in [
        ("a", &critical, Priority::Critical),
        ("b", &high, Priority::High),
        ("c", &normal, Priority::Normal),
        ("d", &low, Priority::Low),
    ] {
        manager
            .subscribe(id, fetcher.callback(), SubscriptionOptions::new().with_priority(priority))
            .unwrap();
    }
    settle().await;

    manager.apply_app_state(AppState::Background);
    assert_eq!(next_interval(&manager, "a"), Some(Duration::from_secs(300)));
    assert_eq!(next_interval(&manager, "c"), Some(Duration::from_secs(900)));

    manager.apply_app_state(AppState::Active);
    settle().await;

    assert_eq!(critical.calls(), 2);
    assert_eq!(high.calls(), 2);
    assert_eq!(normal.calls(), 1);
    assert_eq!(low.calls(), 1);
    assert_eq!(next_interval(&manager, "c"), Some(Duration::from_secs(30)));
    assert_eq!(next_interval(&manager, "d"), Some(Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_inactive_to_background_does_not_catch_up() {
    let manager = PollingManager::new().unwrap();
    let critical = Fetcher::new();
    manager
        .subscribe(
            "a",
            critical.callback(),
            SubscriptionOptions::new().with_priority(Priority::Critical),
        )
        .unwrap();
    settle().await;

    manager.apply_app_state(AppState::Inactive);
    manager.apply_app_state(AppState::Background);
    settle().await;
    assert_eq!(critical.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_is_idempotent() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::new();
    let handle = manager
        .subscribe("flight:SQ21", fetcher.callback(), SubscriptionOptions::default())
        .unwrap();
    settle().await;

    handle.unsubscribe();
    handle.unsubscribe();
    manager.unsubscribe("flight:SQ21");
    manager.unsubscribe("never-subscribed");

    assert!(!manager.contains("flight:SQ21"));
    advance(Duration::from_secs(3600)).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_flight_discards_result() {
    let manager = PollingManager::new().unwrap();
    let gate = Gate::new();
    let successes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&successes);

    manager
        .subscribe(
            "flight:NZ1",
            gate.callback(),
            SubscriptionOptions::default().on_success(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    settle().await;

    manager.unsubscribe("flight:NZ1");
    gate.release_one();
    settle().await;

    assert!(!manager.contains("flight:NZ1"));
    assert_eq!(successes.load(Ordering::SeqCst), 0);
    advance(Duration::from_secs(3600)).await;
    assert_eq!(gate.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_after_unsubscribe_waits_for_running_poll() {
    let manager = PollingManager::new().unwrap();
    let gate = Gate::new();

    manager.subscribe("flight:NZ2", gate.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;
    assert_eq!(gate.calls(), 1);

    manager.unsubscribe("flight:NZ2");
    manager.subscribe("flight:NZ2", gate.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;
    assert_eq!(gate.calls(), 1, "first poll queued behind the running one");

    gate.release_one();
    settle().await;
    assert_eq!(gate.calls(), 2);

    gate.release_one();
    settle().await;
    assert_eq!(gate.max_active.load(Ordering::SeqCst), 1);

    let stats = manager.subscription_stats("flight:NZ2").unwrap();
    assert_eq!(stats.poll_count, 1);
    assert_eq!(stats.success_count, 1);
    assert_eq!(next_interval(&manager, "flight:NZ2"), Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_cellular_guard() {
    let manager = PollingManager::new().unwrap();
    manager.apply_network_state(NetworkState::connected(NetworkType::Cellular));
    let fetcher = Fetcher::new();

    manager
        .subscribe(
            "guarded",
            fetcher.callback(),
            SubscriptionOptions::new()
                .with_priority(Priority::Critical)
                .with_allow_cellular(false),
        )
        .unwrap();
    manager
        .subscribe(
            "unguarded",
            fetcher.callback(),
            SubscriptionOptions::new().with_priority(Priority::Critical),
        )
        .unwrap();
    settle().await;

    assert_eq!(next_interval(&manager, "guarded"), Some(Duration::from_secs(60)));
    assert_eq!(next_interval(&manager, "unguarded"), Some(Duration::from_secs(15)));

    manager.apply_network_state(NetworkState::connected(NetworkType::Wifi));
    assert_eq!(next_interval(&manager, "guarded"), Some(Duration::from_secs(15)));
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_replaces_entry() {
    let manager = PollingManager::new().unwrap();
    let old = Fetcher::new();
    let new = Fetcher::new();

    manager.subscribe("board", old.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;
    manager
        .subscribe(
            "board",
            new.callback(),
            SubscriptionOptions::new().with_priority(Priority::Low),
        )
        .unwrap();
    settle().await;

    assert_eq!(manager.status().subscriber_count, 1);
    assert_eq!(new.calls(), 1);
    assert_eq!(next_interval(&manager, "board"), Some(Duration::from_secs(60)));

    advance(Duration::from_secs(60)).await;
    assert_eq!(old.calls(), 1, "old timer was cancelled");
    assert_eq!(new.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_during_flight_waits_for_old_poll() {
    let manager = PollingManager::new().unwrap();
    let gate = Gate::new();
    let replacement = Fetcher::new();

    manager.subscribe("board", gate.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    manager
        .subscribe("board", replacement.callback(), SubscriptionOptions::default())
        .unwrap();
    settle().await;
    assert_eq!(replacement.calls(), 0);

    gate.release_one();
    settle().await;
    assert_eq!(replacement.calls(), 1);

    let stats = manager.subscription_stats("board").unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.poll_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::new();
    manager.subscribe("feed", fetcher.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    manager.pause();
    assert!(manager.status().is_paused);
    assert_eq!(next_interval(&manager, "feed"), None);
    advance(Duration::from_secs(7200)).await;
    assert_eq!(fetcher.calls(), 1);

    // Explicit refresh still runs but does not reschedule
    manager.poll_now("feed");
    settle().await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(next_interval(&manager, "feed"), None);

    manager.resume();
    assert!(!manager.status().is_paused);
    assert_eq!(next_interval(&manager, "feed"), Some(Duration::from_secs(30)));
    advance(Duration::from_secs(30)).await;
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_terminal() {
    let manager = PollingManager::new().unwrap();
    let fetcher = Fetcher::new();
    manager.subscribe("feed", fetcher.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    manager.destroy();
    manager.destroy();

    assert_eq!(manager.status().subscriber_count, 0);
    assert!(matches!(
        manager.subscribe("feed", fetcher.callback(), SubscriptionOptions::default()),
        Err(PollerError::Destroyed)
    ));
    assert!(matches!(manager.attach(&SignalHub::new()), Err(PollerError::Destroyed)));

    advance(Duration::from_secs(3600)).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attach_follows_hub() {
    let hub = SignalHub::with_initial(EnvironmentSnapshot {
        app_state: AppState::Background,
        ..Default::default()
    });
    let manager = PollingManager::new().unwrap();
    manager.attach(&hub).unwrap();
    assert_eq!(manager.status().app_state, AppState::Background);

    let fetcher = Fetcher::new();
    manager
        .subscribe(
            "flight:AA100",
            fetcher.callback(),
            SubscriptionOptions::new().with_priority(Priority::Critical),
        )
        .unwrap();
    settle().await;
    assert_eq!(next_interval(&manager, "flight:AA100"), Some(Duration::from_secs(300)));

    hub.publish_app_state(AppState::Active);
    settle().await;
    assert_eq!(fetcher.calls(), 2, "foreground catch-up");

    hub.publish_battery(BatteryStatus::new(0.05, false, false));
    settle().await;
    assert!(manager.status().is_low_battery_mode);
    assert_eq!(next_interval(&manager, "flight:AA100"), Some(Duration::from_secs(1800)));

    assert_eq!(hub.receiver_counts(), (1, 1, 1));
    manager.destroy();
    settle().await;
    assert_eq!(hub.receiver_counts(), (0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_hub_offline_blip_triggers_reconnection() {
    let hub = SignalHub::new();
    hub.publish_network(NetworkState::connected(NetworkType::Wifi));
    let manager = PollingManager::new().unwrap();
    manager.attach(&hub).unwrap();

    let flaky = Fetcher::failing();
    manager.subscribe("board", flaky.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;
    advance(next_interval(&manager, "board").unwrap()).await;
    assert_eq!(flaky.calls(), 2);
    assert_eq!(manager.failure_count("board"), Some(2));

    // Both values land before the listener runs; it only sees the last one
    hub.publish_network(NetworkState::disconnected());
    hub.publish_network(NetworkState::connected(NetworkType::Wifi));
    settle().await;

    assert_eq!(flaky.calls(), 3, "reconnection catch-up");
    assert_eq!(manager.failure_count("board"), Some(1), "failures reset before the catch-up");
    assert!(manager.status().network_state.is_connected);
}

#[tokio::test(start_paused = true)]
async fn test_hub_background_blip_triggers_catch_up() {
    let hub = SignalHub::new();
    let manager = PollingManager::new().unwrap();
    manager.attach(&hub).unwrap();

    let critical = Fetcher::new();
    let normal = Fetcher::new();
    manager
        .subscribe("a", critical.callback(), SubscriptionOptions::new().with_priority(Priority::Critical))
        .unwrap();
    manager.subscribe("b", normal.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    hub.publish_app_state(AppState::Background);
    hub.publish_app_state(AppState::Active);
    settle().await;

    assert_eq!(critical.calls(), 2);
    assert_eq!(normal.calls(), 1);
    assert_eq!(manager.status().app_state, AppState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_set_priority_during_flight_applies_when_poll_settles() {
    let manager = PollingManager::new().unwrap();
    let gate = Gate::new();
    manager.subscribe("flight:QF1", gate.callback(), SubscriptionOptions::default()).unwrap();
    settle().await;

    manager.set_priority("flight:QF1", Priority::Critical);
    assert_eq!(next_interval(&manager, "flight:QF1"), None, "no timer while in flight");

    gate.release_one();
    settle().await;
    assert_eq!(next_interval(&manager, "flight:QF1"), Some(Duration::from_secs(15)));

    gate.release_one();
    advance(Duration::from_secs(15)).await;
    assert_eq!(gate.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_status_serializes() {
    let manager = PollingManager::new().unwrap();
    manager.apply_network_state(NetworkState::connected(NetworkType::Cellular));

    let json = serde_json::to_value(manager.status()).unwrap();
    assert_eq!(json["app_state"], "active");
    assert_eq!(json["network_state"]["network_type"], "cellular");
    assert_eq!(json["is_paused"], false);
    assert_eq!(json["subscriber_count"], 0);
}
