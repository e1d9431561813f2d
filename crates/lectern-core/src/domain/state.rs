//! Service and store states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the store pair.
///
/// State transitions:
/// - Unopened -> Opening -> Open
/// - Opening -> Unopened (either store failed to open)
/// - Open -> Closing -> Unopened
///
/// A reopen walks Closing -> Unopened -> Opening -> Open inside one task, so no
/// other task ever observes the intermediate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unopened,
    Opening,
    Open,
    Closing,
}

impl ServiceState {
    pub fn is_open(self) -> bool {
        matches!(self, ServiceState::Open)
    }

    /// Is a lifecycle task currently moving the stores?
    pub fn is_transitioning(self) -> bool {
        matches!(self, ServiceState::Opening | ServiceState::Closing)
    }
}

/// Which of the two stores an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Book metadata, bookmarks, search history, catalogs.
    Primary,
    /// Cover images.
    Blob,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Primary => f.write_str("primary"),
            StoreKind::Blob => f.write_str("blob"),
        }
    }
}
