//! Bounded record of recent pull results, newest first.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engine::PullResult;

/// Oldest entries are dropped past this cap.
pub const MAX_HISTORY: usize = 100;

/// Rolling pull record the caller can persist next to the engine snapshot.
/// Purely informational; the probability logic never consults it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullHistory {
    entries: VecDeque<PullResult>,
}

impl PullHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pull at the front, dropping the oldest past the cap.
    pub fn record(&mut self, result: PullResult) {
        self.entries.push_front(result);
        self.entries.truncate(MAX_HISTORY);
    }

    /// Record a batch in pull order, so the batch's last pull ends up most
    /// recent.
    pub fn record_batch(&mut self, results: &[PullResult]) {
        for result in results {
            self.record(result.clone());
        }
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &PullResult> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
