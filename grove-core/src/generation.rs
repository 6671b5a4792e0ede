//! Index generations and the phase of the reindex cycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Counts committed index swaps. A consumer holding generation `n` knows
/// its view is stale once the repository reports anything greater.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Generation of a repository that has not committed anything yet
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    /// The generation following this one
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Phase of the scan/diff/publish cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RepositoryState {
    #[default]
    Idle = 0,
    /// Directory walk in progress
    Scanning = 1,
    /// Comparing the new index against the previous one
    Diffing = 2,
    /// Update being dispatched to subscribers
    Publishing = 3,
}

impl RepositoryState {
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Acquire) {
            1 => Self::Scanning,
            2 => Self::Diffing,
            3 => Self::Publishing,
            _ => Self::Idle,
        }
    }

    pub fn store(self, atomic: &AtomicU8) {
        atomic.store(self as u8, Ordering::Release);
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Diffing => "diffing",
            Self::Publishing => "publishing",
        }
    }
}
