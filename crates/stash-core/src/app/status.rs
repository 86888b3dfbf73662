//! Status - キューの状態スナップショット

use serde::{Deserialize, Serialize};

use crate::config::BackendKind;

/// Live counts of one stash, as returned by `Stash::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    pub backend: BackendKind,
    pub live: u64,
    /// `None` when no dead-letter queue is configured.
    pub dead_lettered: Option<u64>,
}

impl QueueStatus {
    /// Tasks waiting anywhere in this stash.
    pub fn total(&self) -> u64 {
        self.live + self.dead_lettered.unwrap_or(0)
    }
}
