//! Basic Usage Example
//!
//! Subscribes two feeds, then walks the manager through a short lifecycle:
//! background, offline, reconnect and back to the foreground. Runs on real
//! time, so it takes about half a minute.
//!
//! Run with: `SKYWATCH_LOG_MODE=development cargo run -p skywatch-poller --example basic_usage`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skywatch_poller::logging::init_logging_from_env;
use skywatch_poller::prelude::*;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    println!("Skywatch polling example");
    println!("========================\n");

    let hub = SignalHub::new();
    let config = PollingConfig::new().with_foreground_intervals(
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(8),
    );
    let manager = PollingManager::with_config(config.with_backoff_bounds(
        Duration::from_secs(1),
        Duration::from_secs(3600),
    ))?;
    manager.attach(&hub)?;

    let fetches = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fetches);
    let flight = manager.subscribe(
        "flight:LH400",
        move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                println!("  fetched flight:LH400 (#{})", n);
                Ok::<(), std::io::Error>(())
            }
        },
        SubscriptionOptions::new()
            .with_priority(Priority::Critical)
            .on_success(|| println!("  flight:LH400 up to date")),
    )?;

    manager.subscribe(
        "airport-board",
        || async {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "board service timed out",
            ))
        },
        SubscriptionOptions::new().on_error(|failure, count| {
            println!("  airport-board failed {} time(s): {}", count, failure);
        }),
    )?;

    sleep(Duration::from_secs(6)).await;

    println!("\nApp goes to background");
    hub.publish_app_state(AppState::Background);
    sleep(Duration::from_secs(4)).await;

    println!("\nNetwork lost");
    hub.publish_network(NetworkState::disconnected());
    sleep(Duration::from_secs(4)).await;

    println!("\nNetwork back on wifi, app in foreground");
    hub.publish_network(NetworkState::connected(NetworkType::Wifi));
    hub.publish_app_state(AppState::Active);
    sleep(Duration::from_secs(8)).await;

    println!("\nFinal stats:");
    for stats in manager.all_stats() {
        println!("  {}", stats);
    }
    println!("  status: {:?}", manager.status());

    flight.unsubscribe();
    manager.destroy();
    println!("\nFlight fetched {} times", fetches.load(Ordering::SeqCst));
    Ok(())
}
