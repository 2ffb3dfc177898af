//! Error types for the skywatch-poller crate.

/// Errors returned by [`PollingManager`](crate::PollingManager) operations.
///
/// Poll failures never show up here; they are reported through the
/// subscription's `on_error` hook as a [`PollFailure`].
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// The manager has been destroyed and cannot accept new work
    #[error("Polling manager has been destroyed")]
    Destroyed,

    /// The manager was created outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Error type produced by refresh callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a single poll attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum PollFailure {
    /// The refresh callback returned an error
    #[error("Refresh failed: {0}")]
    Callback(CallbackError),

    /// The refresh callback panicked
    #[error("Refresh panicked: {0}")]
    Panicked(String),
}

/// Convenience type alias for Results using PollerError.
pub type Result<T> = std::result::Result<T, PollerError>;
