use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::rarity::Rarity;

/// Number of slots in the recent-rarity ring buffer.
pub const RECENT_WINDOW: usize = 10;

/// All mutable engine state, persisted as one snapshot. Every field carries a
/// serde default so partial or older snapshots hydrate without failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    #[serde(rename = "ownedCharacterIds", default)]
    pub owned_character_ids: HashSet<String>,
    #[serde(rename = "totalPulls", default)]
    pub total_pulls: u64,
    #[serde(rename = "consecutiveRStreak", default)]
    pub consecutive_r_streak: u32,
    #[serde(rename = "consecutiveSRStreak", default)]
    pub consecutive_sr_streak: u32,
    #[serde(rename = "lastRarity", default)]
    pub last_rarity: Option<Rarity>,
    #[serde(rename = "nearMissCount", default)]
    pub near_miss_count: u32,
    /// Quality values of the last ten rolls (R=1, SR=2, SSR=3), 0 when unwritten.
    #[serde(rename = "recentRarityValues", default)]
    pub recent_rarity_values: [u8; RECENT_WINDOW],
    /// Next write position in the recent-rarity ring.
    #[serde(rename = "ringIndex", default)]
    pub ring_index: usize,
    #[serde(rename = "pullsSinceGuaranteed", default)]
    pub pulls_since_guaranteed: u32,
}

impl EngineState {
    /// Write a roll outcome into the recent-rarity ring and advance the
    /// cursor with explicit wraparound.
    pub fn record_recent(&mut self, rarity: Rarity) {
        let index = self.ring_index % RECENT_WINDOW;
        self.recent_rarity_values[index] = rarity.quality_value();
        self.ring_index = (index + 1) % RECENT_WINDOW;
    }

    /// Average quality of the recent window; unwritten slots count as 0.
    pub fn recent_quality(&self) -> f64 {
        let sum: u32 = self.recent_rarity_values.iter().map(|&v| u32::from(v)).sum();
        f64::from(sum) / RECENT_WINDOW as f64
    }
}
