//! Subscription priority

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How urgently a subscription's data must stay fresh
///
/// Variants are declared most urgent first, so the derived `Ord` sorts
/// `Critical` before `Minimal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Data the user is actively depending on (tracked flight in the air)
    Critical,
    High,
    #[default]
    Normal,
    Low,
    /// Nice-to-have data (fleet maps, statistics)
    Minimal,
}

impl Priority {
    /// All priorities, most urgent first
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Minimal,
    ];

    /// Critical and high priority subscriptions get the fast tiers and
    /// catch-up polls when the app returns to the foreground
    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Minimal => "minimal",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown priority name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown priority '{0}' (expected critical, high, normal, low or minimal)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParsePriorityError(s.to_string()))
    }
}
