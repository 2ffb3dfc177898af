//! Fake data feeds
//!
//! Stand-ins for the flight, airport board and fleet map fetchers. Each
//! feed fails according to a deterministic pattern derived from the seed,
//! so a run is reproducible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use skywatch_poller::Priority;

/// Error produced by a simulated fetch
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{feed}: upstream returned {status}")]
    Upstream { feed: String, status: u16 },
}

/// A demo feed to register with the manager
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: String,
    pub priority: Priority,
    pub allow_cellular: bool,
}

/// The three demo feeds: the tracked flight, the airport board and the
/// fleet map
pub fn demo_feeds(flight: &str, board_priority: Priority) -> Vec<Feed> {
    vec![
        Feed {
            id: format!("flight:{}", flight),
            priority: Priority::Critical,
            allow_cellular: true,
        },
        Feed {
            id: "airport-board".to_string(),
            priority: board_priority,
            allow_cellular: true,
        },
        Feed {
            id: "fleet-map".to_string(),
            priority: Priority::Low,
            allow_cellular: false,
        },
    ]
}

/// Builds fetch callbacks with a seeded failure pattern
#[derive(Debug, Clone)]
pub struct FeedSimulator {
    seed: u64,
    failure_rate: f64,
    latency: Duration,
}

impl FeedSimulator {
    pub fn new(seed: u64, failure_rate: f64, latency: Duration) -> Self {
        Self {
            seed,
            failure_rate,
            latency,
        }
    }

    /// Whether attempt `attempt` of feed `feed_index` fails
    pub fn fails(&self, feed_index: u64, attempt: u64) -> bool {
        roll(self.seed, feed_index, attempt) < self.failure_rate
    }

    pub fn callback(
        &self,
        feed_index: u64,
        feed_id: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync + 'static {
        let simulator = self.clone();
        let feed_id = feed_id.to_string();
        let attempts = Arc::new(AtomicU64::new(0));

        move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let fails = simulator.fails(feed_index, attempt);
            let latency = simulator.latency;
            let feed = feed_id.clone();

            async move {
                tokio::time::sleep(latency).await;
                if fails {
                    tracing::debug!("{} fetch #{} failed", feed, attempt + 1);
                    Err(FetchError::Upstream { feed, status: 503 })
                } else {
                    tracing::trace!("{} fetch #{} ok", feed, attempt + 1);
                    Ok(())
                }
            }
            .boxed()
        }
    }
}

/// Uniform value in [0, 1) for (seed, feed, attempt)
fn roll(seed: u64, feed_index: u64, attempt: u64) -> f64 {
    let mixed = splitmix64(seed ^ feed_index.rotate_left(32) ^ splitmix64(attempt));
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
