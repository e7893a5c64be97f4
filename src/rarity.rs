//! Streak-modified rarity roll. Consecutive R results bump the SSR rate via a
//! capped multiplier table; SR and R are rescaled so the three rates always
//! sum to 1.0. An R result whose draw landed just above the SSR cutoff is
//! flagged as a near miss.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::state::EngineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rarity {
    R,
    SR,
    SSR,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::R => "R",
            Rarity::SR => "SR",
            Rarity::SSR => "SSR",
        }
    }

    /// Numeric quality used by the recent-pull window (R=1, SR=2, SSR=3).
    pub fn quality_value(&self) -> u8 {
        match self {
            Rarity::R => 1,
            Rarity::SR => 2,
            Rarity::SSR => 3,
        }
    }

    pub fn is_sr_or_better(&self) -> bool {
        *self >= Rarity::SR
    }
}

pub const BASE_SSR_RATE: f64 = 0.007;
pub const BASE_SR_RATE: f64 = 0.08;
pub const BASE_R_RATE: f64 = 0.913;

/// Hard ceiling on the streak-boosted SSR rate.
pub const SSR_RATE_CAP: f64 = 0.025;

/// Window above the SSR cutoff in which an R draw counts as a near miss.
pub const NEAR_MISS_WINDOW: f64 = 0.015;

/// SSR-rate bonus per consecutive-R streak level, saturating at index 5.
const STREAK_BONUS_MULTIPLIERS: [f64; 6] = [1.0, 1.05, 1.12, 1.20, 1.30, 1.45];

pub fn streak_multiplier(consecutive_r_streak: u32) -> f64 {
    STREAK_BONUS_MULTIPLIERS[consecutive_r_streak.min(5) as usize]
}

/// One full probability assignment over the three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RarityRates {
    pub ssr: f64,
    pub sr: f64,
    pub r: f64,
}

/// Base rates with the streak bonus applied to SSR (capped), then SR and R
/// rescaled proportionally so the total stays exactly 1.0.
pub fn modified_rates(consecutive_r_streak: u32) -> RarityRates {
    let raw_ssr = BASE_SSR_RATE * streak_multiplier(consecutive_r_streak);
    let ssr = raw_ssr.min(SSR_RATE_CAP);
    let scale = (1.0 - ssr) / (BASE_SR_RATE + BASE_R_RATE);
    RarityRates {
        ssr,
        sr: BASE_SR_RATE * scale,
        r: BASE_R_RATE * scale,
    }
}

/// Outcome of a single rarity roll, with the counters as they stood right
/// after the roll's state transition.
#[derive(Debug, Clone, Copy)]
pub struct RollOutcome {
    pub rarity: Rarity,
    pub is_near_miss: bool,
    pub consecutive_r_streak: u32,
    pub consecutive_sr_streak: u32,
    pub near_miss_count: u32,
    /// Modified SSR rate the draw was classified against; 0 for forced rolls.
    pub applied_ssr_rate: f64,
    pub streak_multiplier: f64,
    pub is_guaranteed: bool,
}

/// Roll one rarity and update the streak counters in place.
///
/// A forced rarity short-circuits the draw: the outcome is marked guaranteed
/// and no streak, near-miss, or recent-window bookkeeping happens.
pub fn roll_rarity(state: &mut EngineState, forced: Option<Rarity>) -> RollOutcome {
    roll_rarity_with_rng(state, forced, &mut rand::thread_rng())
}

/// Inner implementation accepting any RNG — used directly in tests for
/// deterministic results.
pub fn roll_rarity_with_rng<R: Rng>(
    state: &mut EngineState,
    forced: Option<Rarity>,
    rng: &mut R,
) -> RollOutcome {
    if let Some(rarity) = forced {
        return RollOutcome {
            rarity,
            is_near_miss: false,
            consecutive_r_streak: state.consecutive_r_streak,
            consecutive_sr_streak: state.consecutive_sr_streak,
            near_miss_count: state.near_miss_count,
            applied_ssr_rate: 0.0,
            streak_multiplier: streak_multiplier(state.consecutive_r_streak),
            is_guaranteed: true,
        };
    }

    let rates = modified_rates(state.consecutive_r_streak);
    let roll: f64 = rng.gen();

    // Cumulative thresholds: [0, t_ssr) is SSR, [t_ssr, t_sr) is SR, rest R.
    let t_ssr = rates.ssr;
    let t_sr = rates.ssr + rates.sr;

    let mut is_near_miss = false;
    let rarity = if roll < t_ssr {
        state.consecutive_r_streak = 0;
        state.consecutive_sr_streak = 0;
        state.near_miss_count = 0;
        state.pulls_since_guaranteed = 0;
        Rarity::SSR
    } else if roll < t_sr {
        state.consecutive_r_streak = 0;
        state.consecutive_sr_streak += 1;
        state.pulls_since_guaranteed = 0;
        Rarity::SR
    } else {
        state.consecutive_r_streak += 1;
        state.consecutive_sr_streak = 0;
        state.pulls_since_guaranteed += 1;
        if roll <= t_ssr + NEAR_MISS_WINDOW {
            is_near_miss = true;
            state.near_miss_count += 1;
        }
        Rarity::R
    };

    state.record_recent(rarity);
    state.last_rarity = Some(rarity);

    RollOutcome {
        rarity,
        is_near_miss,
        consecutive_r_streak: state.consecutive_r_streak,
        consecutive_sr_streak: state.consecutive_sr_streak,
        near_miss_count: state.near_miss_count,
        applied_ssr_rate: rates.ssr,
        streak_multiplier: streak_multiplier(state.consecutive_r_streak),
        is_guaranteed: false,
    }
}
