use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

pub mod feeds;
pub mod scenario;

use feeds::{demo_feeds, FeedSimulator};
use scenario::{Preset, Scenario};
use skywatch_poller::{PollerStatus, PollingManager, Priority, SubscriptionOptions, SubscriptionStats};
use skywatch_signals::SignalHub;

/// Skywatch polling simulator
///
/// Registers the demo feeds with a polling manager, plays a scripted
/// environment timeline on a simulated clock and reports how often each feed
/// was refreshed. An hour of simulated time runs in milliseconds.
#[derive(Parser, Debug)]
#[command(name = "skywatch-sim")]
#[command(about = "Drive the skywatch polling manager through a scripted environment")]
#[command(version)]
pub struct Args {
    /// Simulated duration in seconds
    #[arg(short, long, default_value = "3600")]
    pub duration_secs: u64,

    /// Fraction of fetches that fail (0.0 - 1.0)
    #[arg(short, long, default_value = "0.1")]
    pub failure_rate: f64,

    /// Seed for the failure pattern
    #[arg(long, default_value = "1")]
    pub seed: u64,

    /// Priority of the airport board feed
    #[arg(short, long, default_value = "high")]
    pub priority: Priority,

    /// Flight number for the tracked flight feed
    #[arg(long, default_value = "LH400")]
    pub flight: String,

    /// Polling configuration preset
    #[arg(long, value_enum, default_value = "default")]
    pub preset: Preset,

    /// Environment timeline
    #[arg(short, long, value_enum, default_value = "commute")]
    pub scenario: Scenario,

    /// Simulated fetch latency in milliseconds
    #[arg(long, default_value = "250")]
    pub latency_ms: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.duration_secs == 0 {
            return Err(anyhow::anyhow!("Duration must be positive"));
        }

        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(anyhow::anyhow!(
                "Invalid failure rate {}: must be between 0.0 and 1.0",
                self.failure_rate
            ));
        }

        if self.flight.trim().is_empty() {
            return Err(anyhow::anyhow!("Flight number must not be empty"));
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub duration: Duration,
    pub failure_rate: f64,
    pub seed: u64,
    pub board_priority: Priority,
    pub flight: String,
    pub preset: Preset,
    pub scenario: Scenario,
    pub latency: Duration,
    pub log_level: String,
    pub json: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            duration: Duration::from_secs(args.duration_secs),
            failure_rate: args.failure_rate,
            seed: args.seed,
            board_priority: args.priority,
            flight: args.flight.trim().to_string(),
            preset: args.preset,
            scenario: args.scenario,
            latency: Duration::from_millis(args.latency_ms),
            log_level: args.log_level,
            json: args.json,
        }
    }
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();

        if let Ok(seed) = std::env::var("SKYWATCH_SIM_SEED") {
            args.seed = seed
                .parse()
                .context("Invalid SKYWATCH_SIM_SEED environment variable")?;
        }

        if let Ok(rate) = std::env::var("SKYWATCH_SIM_FAILURE_RATE") {
            args.failure_rate = rate
                .parse()
                .context("Invalid SKYWATCH_SIM_FAILURE_RATE environment variable")?;
        }

        if let Ok(log_level) = std::env::var("SKYWATCH_LOG_LEVEL") {
            args.log_level = log_level;
        }

        args.validate()?;

        Ok(Config::from(args))
    }

    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  Scenario: {:?}", self.scenario);
        info!("  Preset: {:?}", self.preset);
        info!("  Duration: {}s", self.duration.as_secs());
        info!("  Failure rate: {:.2} (seed {})", self.failure_rate, self.seed);
        info!("  Airport board priority: {}", self.board_priority);
        info!("  Fetch latency: {:?}", self.latency);
    }
}

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: Scenario,
    pub preset: Preset,
    pub simulated_secs: u64,
    pub events_applied: usize,
    pub status: PollerStatus,
    pub subscriptions: Vec<SubscriptionStats>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario {:?} with {:?} preset, {}s simulated, {} environment events",
            self.scenario, self.preset, self.simulated_secs, self.events_applied
        )?;
        writeln!(
            f,
            "Final state: app {:?}, connected {}, battery {:.0}%{}",
            self.status.app_state,
            self.status.network_state.is_connected,
            self.status.battery_level * 100.0,
            if self.status.is_low_battery_mode { " (low battery mode)" } else { "" }
        )?;
        for stats in &self.subscriptions {
            writeln!(f, "  {}", stats)?;
        }
        Ok(())
    }
}

/// Initialize tracing/logging with the specified log level
///
/// Logs go to stderr so `--json` output stays machine readable.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = match log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Play the scenario against a fresh manager and collect the report
///
/// Must run on a runtime with a paused clock for simulated time to pass
/// instantly.
pub async fn run_simulation(config: &Config) -> Result<Report> {
    let hub = SignalHub::new();
    let manager = PollingManager::with_config(config.preset.polling_config())
        .context("Failed to create polling manager")?;
    manager.attach(&hub)?;

    let simulator = FeedSimulator::new(config.seed, config.failure_rate, config.latency);
    for (index, feed) in demo_feeds(&config.flight, config.board_priority).iter().enumerate() {
        manager.subscribe(
            feed.id.clone(),
            simulator.callback(index as u64, &feed.id),
            SubscriptionOptions::new()
                .with_priority(feed.priority)
                .with_allow_cellular(feed.allow_cellular),
        )?;
    }

    let start = Instant::now();
    let mut events_applied = 0;
    for (offset, event) in config.scenario.timeline() {
        if offset > config.duration {
            break;
        }
        tokio::time::sleep_until(start + offset).await;
        if event.publish(&hub) {
            events_applied += 1;
            info!("[t+{:>5}s] {}", offset.as_secs(), event);
        }
    }
    tokio::time::sleep_until(start + config.duration).await;

    let report = Report {
        scenario: config.scenario,
        preset: config.preset,
        simulated_secs: config.duration.as_secs(),
        events_applied,
        status: manager.status(),
        subscriptions: manager.all_stats(),
    };
    manager.destroy();
    Ok(report)
}

fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level)?;
    config.print_summary();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .context("Failed to build simulation runtime")?;

    let report = runtime.block_on(run_simulation(&config))?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(())
}
