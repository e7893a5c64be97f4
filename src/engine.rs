//! The pull engine: owns the mutable collection state, rolls rarities,
//! selects characters by weight, applies the multi-pull guarantee, and
//! persists a snapshot after every state change.
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::Character;
use crate::rarity::{self, Rarity, RarityRates};
use crate::state::{EngineState, RECENT_WINDOW};
use crate::store::{Snapshot, SnapshotStore, StoreError};

/// Conventional batch size; a batch with no SR-or-better result gets one
/// forced-SR replacement.
pub const MULTI_PULL_COUNT: usize = 10;

/// Weight boost for characters not yet in the collection.
const NEW_CHARACTER_WEIGHT_BONUS: f64 = 1.2;
/// Extra weight boost applied to every candidate in the SSR pool.
const SSR_WEIGHT_BONUS: f64 = 1.1;

/// Everything a caller learns from one successful pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResult {
    pub character: Character,
    pub rarity: Rarity,
    #[serde(rename = "isNew")]
    pub is_new: bool,
    #[serde(rename = "isNearMiss")]
    pub is_near_miss: bool,
    #[serde(rename = "pullNumber")]
    pub pull_number: u64,
    pub timestamp: String,
    #[serde(rename = "consecutiveRStreak")]
    pub consecutive_r_streak: u32,
    #[serde(rename = "consecutiveSRStreak")]
    pub consecutive_sr_streak: u32,
    #[serde(rename = "nearMissCount")]
    pub near_miss_count: u32,
    #[serde(rename = "appliedSSRRate")]
    pub applied_ssr_rate: f64,
    #[serde(rename = "streakMultiplier")]
    pub streak_multiplier: f64,
    #[serde(rename = "isGuaranteed")]
    pub is_guaranteed: bool,
    #[serde(rename = "pullsSinceGuaranteed")]
    pub pulls_since_guaranteed: u32,
}

/// Read-only projection of the current state for display.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    #[serde(rename = "totalOwned")]
    pub total_owned: usize,
    #[serde(rename = "totalPulls")]
    pub total_pulls: u64,
    #[serde(rename = "consecutiveRStreak")]
    pub consecutive_r_streak: u32,
    #[serde(rename = "consecutiveSRStreak")]
    pub consecutive_sr_streak: u32,
    #[serde(rename = "lastRarity")]
    pub last_rarity: Option<Rarity>,
    #[serde(rename = "nearMissCount")]
    pub near_miss_count: u32,
    /// Rates the next unforced roll would use.
    #[serde(rename = "currentRates")]
    pub current_rates: RarityRates,
    #[serde(rename = "baseSSRRate")]
    pub base_ssr_rate: f64,
    #[serde(rename = "streakLevel")]
    pub streak_level: u32,
    #[serde(rename = "streakMultiplier")]
    pub streak_multiplier: f64,
    #[serde(rename = "pullsSinceGuaranteed")]
    pub pulls_since_guaranteed: u32,
    /// Informational countdown only; the guarantee itself is applied per
    /// multi-pull batch, not by this counter.
    #[serde(rename = "guaranteedIn")]
    pub guaranteed_in: u32,
    #[serde(rename = "recentQuality")]
    pub recent_quality: f64,
}

/// Stateful pull engine over an injected snapshot store.
///
/// Store failures never surface to the caller: they are logged and the
/// in-memory state stays authoritative until the next successful persist.
pub struct GachaEngine<S: SnapshotStore> {
    state: EngineState,
    store: S,
}

impl<S: SnapshotStore> GachaEngine<S> {
    /// Hydrate from the store's snapshot if one exists, otherwise start
    /// fresh. A failing store is logged and treated as empty.
    pub fn new(store: S) -> Self {
        let state = match store.load() {
            Ok(Some(snapshot)) => snapshot.state,
            Ok(None) => EngineState::default(),
            Err(err) => {
                warn!("failed to load gacha snapshot, starting fresh: {err}");
                EngineState::default()
            }
        };
        Self { state, store }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Perform one pull against the supplied catalog. `forced` bypasses the
    /// rarity roll (used by the multi-pull guarantee).
    ///
    /// Returns `None` when the catalog has no character of the rolled rarity;
    /// the lifetime pull counter has still advanced, but ownership and the
    /// persisted snapshot are untouched.
    pub fn perform_pull(
        &mut self,
        catalog: &[Character],
        forced: Option<Rarity>,
    ) -> Option<PullResult> {
        self.perform_pull_with_rng(catalog, forced, &mut rand::thread_rng())
    }

    pub fn perform_pull_with_rng<R: Rng>(
        &mut self,
        catalog: &[Character],
        forced: Option<Rarity>,
        rng: &mut R,
    ) -> Option<PullResult> {
        self.state.total_pulls += 1;

        let outcome = rarity::roll_rarity_with_rng(&mut self.state, forced, rng);
        let character = self.select_character_with_rng(outcome.rarity, catalog, rng)?;

        // A guaranteed SR-or-better still counts as the guarantee firing.
        if outcome.is_guaranteed && outcome.rarity.is_sr_or_better() {
            self.state.pulls_since_guaranteed = 0;
        }

        let is_new = !self.state.owned_character_ids.contains(&character.id);
        self.state.owned_character_ids.insert(character.id.clone());
        self.persist();

        Some(PullResult {
            character,
            rarity: outcome.rarity,
            is_new,
            is_near_miss: outcome.is_near_miss,
            pull_number: self.state.total_pulls,
            timestamp: chrono::Utc::now().to_rfc3339(),
            consecutive_r_streak: outcome.consecutive_r_streak,
            consecutive_sr_streak: outcome.consecutive_sr_streak,
            near_miss_count: outcome.near_miss_count,
            applied_ssr_rate: outcome.applied_ssr_rate,
            streak_multiplier: outcome.streak_multiplier,
            is_guaranteed: outcome.is_guaranteed,
            pulls_since_guaranteed: self.state.pulls_since_guaranteed,
        })
    }

    /// Perform `count` independent pulls. If none of them lands SR or better,
    /// the most recent R result is replaced by a forced-SR pull that keeps
    /// the replaced slot's pull number.
    ///
    /// The replacement is a real additional pull: it advances the lifetime
    /// counter and persists like any other, only the returned sequence is
    /// patched.
    pub fn perform_multi_pull(&mut self, catalog: &[Character], count: usize) -> Vec<PullResult> {
        self.perform_multi_pull_with_rng(catalog, count, &mut rand::thread_rng())
    }

    pub fn perform_multi_pull_with_rng<R: Rng>(
        &mut self,
        catalog: &[Character],
        count: usize,
        rng: &mut R,
    ) -> Vec<PullResult> {
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(result) = self.perform_pull_with_rng(catalog, None, rng) {
                results.push(result);
            }
        }

        let has_sr_or_better = results.iter().any(|r| r.rarity.is_sr_or_better());
        if !has_sr_or_better {
            if let Some(slot) = results.iter().rposition(|r| r.rarity == Rarity::R) {
                if let Some(mut replacement) =
                    self.perform_pull_with_rng(catalog, Some(Rarity::SR), rng)
                {
                    replacement.pull_number = results[slot].pull_number;
                    results[slot] = replacement;
                }
            }
        }

        results
    }

    /// Weighted pick from the catalog slice of the given rarity: base weight
    /// 1.0, boosted for unowned characters and for the SSR pool. `None` only
    /// when the pool is empty.
    pub fn select_character(&self, rarity: Rarity, catalog: &[Character]) -> Option<Character> {
        self.select_character_with_rng(rarity, catalog, &mut rand::thread_rng())
    }

    pub fn select_character_with_rng<R: Rng>(
        &self,
        rarity: Rarity,
        catalog: &[Character],
        rng: &mut R,
    ) -> Option<Character> {
        let candidates: Vec<&Character> = catalog.iter().filter(|c| c.rarity == rarity).collect();
        if candidates.is_empty() {
            return None;
        }

        let weights: Vec<f64> = candidates
            .iter()
            .map(|c| {
                let mut weight = 1.0;
                if !self.state.owned_character_ids.contains(&c.id) {
                    weight *= NEW_CHARACTER_WEIGHT_BONUS;
                }
                if rarity == Rarity::SSR {
                    weight *= SSR_WEIGHT_BONUS;
                }
                weight
            })
            .collect();

        let total_weight: f64 = weights.iter().sum();
        let mut remaining = rng.gen::<f64>() * total_weight;
        for (candidate, weight) in candidates.iter().zip(&weights) {
            remaining -= weight;
            if remaining <= 0.0 {
                return Some((*candidate).clone());
            }
        }

        // Floating-point drift can leave a sliver of weight unconsumed.
        candidates.last().map(|c| (*c).clone())
    }

    pub fn stats(&self) -> CollectionStats {
        let streak = self.state.consecutive_r_streak;
        CollectionStats {
            total_owned: self.state.owned_character_ids.len(),
            total_pulls: self.state.total_pulls,
            consecutive_r_streak: streak,
            consecutive_sr_streak: self.state.consecutive_sr_streak,
            last_rarity: self.state.last_rarity,
            near_miss_count: self.state.near_miss_count,
            current_rates: rarity::modified_rates(streak),
            base_ssr_rate: rarity::BASE_SSR_RATE,
            streak_level: streak.min(5),
            streak_multiplier: rarity::streak_multiplier(streak),
            pulls_since_guaranteed: self.state.pulls_since_guaranteed,
            guaranteed_in: (MULTI_PULL_COUNT as u32)
                .saturating_sub(self.state.pulls_since_guaranteed),
            recent_quality: self.state.recent_quality(),
        }
    }

    /// Clear all state back to defaults and persist the empty snapshot.
    pub fn reset(&mut self) {
        debug!("resetting gacha state");
        self.state = EngineState::default();
        self.persist();
    }

    /// Plain copy of the current state, stamped with an export time.
    pub fn export_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::of_state(&self.state);
        snapshot.exported_at = Some(chrono::Utc::now().to_rfc3339());
        snapshot
    }

    /// Replace the in-memory state with an imported snapshot and persist it.
    /// Absent fields take their defaults; a blob that does not parse leaves
    /// the state untouched.
    pub fn import_snapshot(&mut self, json: &str) -> Result<(), StoreError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        debug!(version = snapshot.version, "importing gacha snapshot");
        self.state = snapshot.state;
        self.state.ring_index %= RECENT_WINDOW;
        self.persist();
        Ok(())
    }

    /// Sorted ids of every character pulled so far.
    pub fn owned_characters(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.owned_character_ids.iter().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_character_owned(&self, character_id: &str) -> bool {
        self.state.owned_character_ids.contains(character_id)
    }

    fn persist(&self) {
        let snapshot = Snapshot::of_state(&self.state);
        if let Err(err) = self.store.save(&snapshot) {
            warn!("failed to persist gacha snapshot: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn chara(id: &str, rarity: Rarity) -> Character {
        Character {
            id: id.to_string(),
            name: id.to_string(),
            rarity,
            image: None,
        }
    }

    fn full_catalog() -> Vec<Character> {
        vec![
            chara("r1", Rarity::R),
            chara("r2", Rarity::R),
            chara("r3", Rarity::R),
            chara("sr1", Rarity::SR),
            chara("sr2", Rarity::SR),
            chara("ssr1", Rarity::SSR),
        ]
    }

    fn fresh_engine() -> GachaEngine<MemoryStore> {
        GachaEngine::new(MemoryStore::new())
    }

    #[test]
    fn pull_updates_collection_and_persists() {
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(11);

        let result = engine
            .perform_pull_with_rng(&full_catalog(), None, &mut rng)
            .expect("full catalog always yields a character");

        assert_eq!(result.pull_number, 1);
        assert!(result.is_new);
        assert!(engine.is_character_owned(&result.character.id));
        assert_eq!(engine.state.total_pulls, 1);

        let stored = engine.store.load().expect("load").expect("persisted");
        assert_eq!(stored.state.total_pulls, 1);
        assert_eq!(stored.state.owned_character_ids.len(), 1);
        assert!(stored.last_saved.is_some());
    }

    #[test]
    fn repeat_character_is_not_new() {
        let mut engine = fresh_engine();
        let catalog = vec![chara("only", Rarity::R)];
        let mut rng = SmallRng::seed_from_u64(2);

        // SR/SSR rolls find an empty pool with this catalog, so retry until
        // two R pulls landed.
        let mut landed = Vec::new();
        while landed.len() < 2 {
            if let Some(result) = engine.perform_pull_with_rng(&catalog, None, &mut rng) {
                landed.push(result);
            }
        }
        assert!(landed[0].is_new);
        assert!(!landed[1].is_new);
        assert_eq!(engine.owned_characters(), vec!["only".to_string()]);
    }

    #[test]
    fn void_pull_advances_counter_without_persisting() {
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(5);

        let result = engine.perform_pull_with_rng(&[], None, &mut rng);

        assert!(result.is_none());
        assert_eq!(engine.state.total_pulls, 1);
        assert!(engine.state.owned_character_ids.is_empty());
        assert!(
            engine.store.load().expect("load").is_none(),
            "a void pull must not write a snapshot"
        );
    }

    #[test]
    fn forced_sr_pull_resets_guarantee_counter() {
        let mut engine = fresh_engine();
        engine.state.pulls_since_guaranteed = 5;
        let mut rng = SmallRng::seed_from_u64(8);

        let result = engine
            .perform_pull_with_rng(&full_catalog(), Some(Rarity::SR), &mut rng)
            .expect("SR pool is non-empty");

        assert!(result.is_guaranteed);
        assert_eq!(result.rarity, Rarity::SR);
        assert_eq!(result.applied_ssr_rate, 0.0);
        assert_eq!(result.pulls_since_guaranteed, 0);
        assert_eq!(engine.state.pulls_since_guaranteed, 0);
    }

    #[test]
    fn multi_pull_always_contains_sr_or_better() {
        let catalog = full_catalog();
        let mut saw_guaranteed = false;

        for seed in 0..200 {
            let mut engine = fresh_engine();
            let mut rng = SmallRng::seed_from_u64(seed);
            let results = engine.perform_multi_pull_with_rng(&catalog, 10, &mut rng);

            assert_eq!(results.len(), 10);
            assert!(
                results.iter().any(|r| r.rarity.is_sr_or_better()),
                "seed {seed}: batch of 10 contains no SR or better"
            );

            if results.iter().any(|r| r.is_guaranteed) {
                saw_guaranteed = true;
                // The replacement keeps the replaced slot's label, so the
                // batch still reads 1..=10 while the lifetime counter shows
                // the extra pull.
                let mut numbers: Vec<u64> = results.iter().map(|r| r.pull_number).collect();
                numbers.sort_unstable();
                assert_eq!(numbers, (1..=10).collect::<Vec<u64>>());
                assert_eq!(engine.state.total_pulls, 11);
            }
        }

        assert!(
            saw_guaranteed,
            "no all-R batch in 200 seeded sessions; guarantee path never exercised"
        );
    }

    #[test]
    fn multi_pull_on_empty_catalog_yields_nothing() {
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(1);
        let results = engine.perform_multi_pull_with_rng(&[], 10, &mut rng);
        assert!(results.is_empty());
        assert_eq!(engine.state.total_pulls, 10, "void pulls still count");
    }

    #[test]
    fn guarantee_counter_tracks_unforced_rolls() {
        let catalog = full_catalog();
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(77);

        for _ in 0..50 {
            let before = engine.state.pulls_since_guaranteed;
            let result = engine
                .perform_pull_with_rng(&catalog, None, &mut rng)
                .expect("full catalog");
            match result.rarity {
                Rarity::R => assert_eq!(engine.state.pulls_since_guaranteed, before + 1),
                Rarity::SR | Rarity::SSR => assert_eq!(engine.state.pulls_since_guaranteed, 0),
            }
        }
    }

    #[test]
    fn injected_guarantee_resets_counter_after_a_drought() {
        let catalog = vec![
            chara("a", Rarity::SSR),
            chara("b", Rarity::SR),
            chara("c", Rarity::R),
        ];
        for seed in 0..100 {
            let mut engine = fresh_engine();
            // Nine R results in a row have already driven the counter up.
            engine.state.consecutive_r_streak = 9;
            engine.state.pulls_since_guaranteed = 9;
            let mut rng = SmallRng::seed_from_u64(seed);
            let results = engine.perform_multi_pull_with_rng(&catalog, 1, &mut rng);
            assert_eq!(results.len(), 1);
            if results[0].is_guaranteed {
                assert_eq!(results[0].rarity, Rarity::SR);
                assert_eq!(engine.state.pulls_since_guaranteed, 0);
                return;
            }
        }
        panic!("single-pull batch never rolled R in 100 seeded sessions");
    }

    #[test]
    fn unowned_characters_are_favoured() {
        let mut engine = fresh_engine();
        engine.state.owned_character_ids.insert("old".to_string());
        let catalog = vec![chara("old", Rarity::R), chara("new", Rarity::R)];

        let mut rng = SmallRng::seed_from_u64(4242);
        let trials = 20_000;
        let mut new_count = 0u32;
        for _ in 0..trials {
            let picked = engine
                .select_character_with_rng(Rarity::R, &catalog, &mut rng)
                .expect("non-empty pool");
            if picked.id == "new" {
                new_count += 1;
            }
        }

        // Expected share 1.2 / 2.2 ≈ 0.545; bounds are several standard
        // deviations wide.
        let share = f64::from(new_count) / f64::from(trials);
        assert!(
            share > 0.52 && share < 0.57,
            "unowned pick share {share} outside [0.52, 0.57]"
        );
    }

    #[test]
    fn selection_from_missing_pool_is_none() {
        let engine = fresh_engine();
        let catalog = vec![chara("r1", Rarity::R)];
        let mut rng = SmallRng::seed_from_u64(6);
        assert!(engine
            .select_character_with_rng(Rarity::SSR, &catalog, &mut rng)
            .is_none());
    }

    #[test]
    fn selection_from_non_empty_pool_always_returns() {
        let engine = fresh_engine();
        let catalog = vec![chara("solo", Rarity::SSR)];
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..1_000 {
            let picked = engine
                .select_character_with_rng(Rarity::SSR, &catalog, &mut rng)
                .expect("single-candidate pool must always return");
            assert_eq!(picked.id, "solo");
        }
    }

    #[test]
    fn export_import_round_trip() {
        let catalog = full_catalog();
        let mut source = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(31);
        for _ in 0..30 {
            source.perform_pull_with_rng(&catalog, None, &mut rng);
        }

        let exported = source.export_snapshot();
        assert!(exported.exported_at.is_some());
        let json = serde_json::to_string(&exported).expect("serialize export");

        let mut target = fresh_engine();
        target.import_snapshot(&json).expect("import");

        assert_eq!(target.state, source.state);
        assert_eq!(target.owned_characters(), source.owned_characters());
    }

    #[test]
    fn import_rejects_garbage_without_mutation() {
        let catalog = full_catalog();
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(13);
        engine.perform_pull_with_rng(&catalog, None, &mut rng);
        let before = engine.state.clone();

        assert!(engine.import_snapshot("definitely not json").is_err());
        assert_eq!(engine.state, before);
    }

    #[test]
    fn import_defaults_missing_fields() {
        let mut engine = fresh_engine();
        engine
            .import_snapshot(r#"{"state": {"totalPulls": 7, "ringIndex": 42}}"#)
            .expect("partial snapshot imports");

        assert_eq!(engine.state.total_pulls, 7);
        assert_eq!(engine.state.ring_index, 2, "cursor wraps into range");
        assert_eq!(engine.state.pulls_since_guaranteed, 0);
        assert!(engine.state.owned_character_ids.is_empty());
    }

    #[test]
    fn reset_clears_state_and_persists() {
        let catalog = full_catalog();
        let mut engine = fresh_engine();
        let mut rng = SmallRng::seed_from_u64(21);
        for _ in 0..15 {
            engine.perform_pull_with_rng(&catalog, None, &mut rng);
        }

        engine.reset();

        assert_eq!(engine.state, EngineState::default());
        let stored = engine.store.load().expect("load").expect("persisted");
        assert_eq!(stored.state, EngineState::default());

        // Idempotent.
        engine.reset();
        assert_eq!(engine.state, EngineState::default());
    }

    #[test]
    fn engine_hydrates_from_existing_snapshot() {
        let store = MemoryStore::new();
        let state = EngineState {
            total_pulls: 42,
            pulls_since_guaranteed: 3,
            ..EngineState::default()
        };
        store.save(&Snapshot::of_state(&state)).expect("seed store");

        let engine = GachaEngine::new(store);
        assert_eq!(engine.state.total_pulls, 42);
        assert_eq!(engine.stats().guaranteed_in, 7);
    }

    #[test]
    fn store_failures_are_swallowed() {
        struct FailingStore;
        impl SnapshotStore for FailingStore {
            fn load(&self) -> Result<Option<Snapshot>, StoreError> {
                Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk on fire",
                )))
            }
            fn save(&self, _snapshot: &Snapshot) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk on fire",
                )))
            }
        }

        let mut engine = GachaEngine::new(FailingStore);
        assert_eq!(engine.state, EngineState::default());

        let mut rng = SmallRng::seed_from_u64(3);
        let result = engine.perform_pull_with_rng(&full_catalog(), None, &mut rng);
        assert!(result.is_some(), "a failing store must not break pulls");
        assert_eq!(engine.state.total_pulls, 1);
    }

    #[test]
    fn stats_project_current_state() {
        let mut engine = fresh_engine();
        let fresh = engine.stats();
        assert_eq!(fresh.total_owned, 0);
        assert_eq!(fresh.guaranteed_in, 10);
        assert_eq!(fresh.recent_quality, 0.0);
        assert_eq!(fresh.streak_multiplier, 1.0);
        assert_eq!(fresh.current_rates, rarity::modified_rates(0));

        engine.state.consecutive_r_streak = 4;
        engine.state.pulls_since_guaranteed = 12;
        let stats = engine.stats();
        assert_eq!(stats.streak_level, 4);
        assert_eq!(stats.current_rates, rarity::modified_rates(4));
        assert_eq!(stats.guaranteed_in, 0, "countdown floors at zero");
        assert_eq!(stats.base_ssr_rate, rarity::BASE_SSR_RATE);
    }
}
