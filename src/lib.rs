//! Gacha pull engine: streak-adjusted rarity rolls, weighted character
//! selection, a guaranteed-SR floor for multi-pull batches, and write-through
//! snapshot persistence. The caller supplies the character catalog and a
//! snapshot store; the engine owns all mutable collection state.

pub mod catalog;
pub mod engine;
pub mod history;
pub mod rarity;
pub mod state;
pub mod store;

pub use catalog::{parse_catalog, Character};
pub use engine::{CollectionStats, GachaEngine, PullResult, MULTI_PULL_COUNT};
pub use history::PullHistory;
pub use rarity::{modified_rates, Rarity, RarityRates, RollOutcome};
pub use state::EngineState;
pub use store::{FileStore, MemoryStore, Snapshot, SnapshotStore, StoreError};
