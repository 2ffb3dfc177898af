//! Logging setup for skywatch
//!
//! The poller logs through `tracing`: scheduling decisions at debug,
//! lifecycle and environment transitions at info, poll failures at warn.
//! Embedding apps usually install their own subscriber; these helpers exist
//! for tools and tests that don't.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed
    Silent,
    /// Compact stderr output, info and above
    Development,
    /// Verbose output with source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log mode: {0}")]
    InvalidMode(String),
}

impl std::str::FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            other => Err(LoggingError::InvalidMode(other.to_string())),
        }
    }
}

/// Initialize logging with the specified mode
///
/// Call once, early. A second call returns `LoggingError::TracingInit`.
///
/// # Environment Variables
///
/// - `SKYWATCH_LOG_LEVEL`: filter directive (e.g. `skywatch_poller=debug`)
/// - `RUST_LOG`: used when `SKYWATCH_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(create_env_filter("info"));

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(create_env_filter("debug"));

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `SKYWATCH_LOG_MODE` (silent, development, debug)
///
/// Unset means silent. An unrecognised value is an error rather than a
/// silent fallback.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("SKYWATCH_LOG_MODE") {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Silent,
    };
    init_logging(mode)
}

/// `SKYWATCH_LOG_LEVEL`, then `RUST_LOG`, then `default_level`
fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var("SKYWATCH_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
        assert!(!is_initialized());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("debug".parse::<LoggingMode>().unwrap(), LoggingMode::Debug);
        assert_eq!(" Development ".parse::<LoggingMode>().unwrap(), LoggingMode::Development);
        assert_eq!("silent".parse::<LoggingMode>().unwrap(), LoggingMode::Silent);

        let err = "loud".parse::<LoggingMode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid log mode: loud");
    }
}
