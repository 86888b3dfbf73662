//! Drain cycle reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::CycleId;

/// Which queue a drain cycle read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainSource {
    Primary,
    DeadLetter,
}

/// How a drain cycle ended.
///
/// A cycle that hits a delivery failure does not produce a report: the
/// messaging error is returned to the caller after the batch was pushed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Another cycle on the same republisher was still running.
    Busy,
    /// The source could not be read; nothing was mutated.
    Unavailable,
    /// The source had nothing to deliver.
    Empty,
    /// Every peeked task was delivered and removed.
    Delivered,
    /// The batch could not be decoded and was pushed back.
    PushedBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub cycle: CycleId,
    /// `None` when the cycle was skipped before a source was chosen.
    pub source: Option<DrainSource>,
    pub outcome: DrainOutcome,
    pub peeked: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub reclaimed_bytes: u64,
    pub started_at: DateTime<Utc>,
}

impl DrainReport {
    pub fn new(cycle: CycleId, source: DrainSource, outcome: DrainOutcome) -> Self {
        Self {
            cycle,
            source: Some(source),
            outcome,
            peeked: 0,
            delivered: 0,
            retried: 0,
            dead_lettered: 0,
            reclaimed_bytes: 0,
            started_at: Utc::now(),
        }
    }

    /// Report for a cycle skipped because another one was still running.
    pub fn busy(cycle: CycleId) -> Self {
        Self {
            source: None,
            ..Self::new(cycle, DrainSource::Primary, DrainOutcome::Busy)
        }
    }
}
