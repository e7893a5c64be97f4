//! Snapshot persistence: a versioned JSON envelope around the engine state,
//! a store contract, and file-backed plus in-memory implementations.
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::state::EngineState;

pub const SNAPSHOT_VERSION: u32 = 1;

const SAVE_FILE: &str = "snapshot.json";
const BACKUP_FILE: &str = "snapshot.json.bak";
const TMP_FILE: &str = "snapshot.json.tmp";

/// Errors surfaced by snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot store lock was poisoned")]
    LockPoisoned,
}

/// The persisted and exported representation of engine state.
///
/// `lastSaved` is stamped by stores on write; `exportedAt` by
/// [`crate::engine::GachaEngine::export_snapshot`]. Both are optional on read
/// so the two shapes import interchangeably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "lastSaved", default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<String>,
    #[serde(rename = "exportedAt", default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    #[serde(default)]
    pub state: EngineState,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    pub fn of_state(state: &EngineState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            last_saved: None,
            exported_at: None,
            state: state.clone(),
        }
    }
}

/// Contract for persisting and recovering the engine snapshot.
pub trait SnapshotStore {
    /// Load the most recent snapshot, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Persist a snapshot, stamping its save time.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// File-backed store writing pretty JSON atomically: tmp file first, previous
/// save copied to a backup, then rename over the main file. Loading falls
/// back to the backup when the main file is missing.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under the platform config directory.
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            dir: base.join("gacha-engine"),
        }
    }

    /// Store under an explicit directory, for embedding and tests.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save_path(&self) -> PathBuf {
        self.dir.join(SAVE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(TMP_FILE)
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let main = self.save_path();
        let bak = self.backup_path();

        let data = if main.exists() {
            fs::read_to_string(&main)?
        } else if bak.exists() {
            warn!("main snapshot missing, loading backup");
            fs::read_to_string(&bak)?
        } else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_str(&data)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let mut stamped = snapshot.clone();
        stamped.last_saved = Some(chrono::Utc::now().to_rfc3339());
        let json = serde_json::to_string_pretty(&stamped)?;

        let tmp = self.tmp_path();
        let main = self.save_path();
        let bak = self.backup_path();

        fs::write(&tmp, &json)?;
        if main.exists() {
            let _ = fs::copy(&main, &bak);
        }
        fs::rename(&tmp, &main)?;

        Ok(())
    }
}

/// In-memory store for tests and embedding without a filesystem.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let guard = self.snapshot.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut stamped = snapshot.clone();
        stamped.last_saved = Some(chrono::Utc::now().to_rfc3339());
        let mut guard = self.snapshot.lock().map_err(|_| StoreError::LockPoisoned)?;
        *guard = Some(stamped);
        Ok(())
    }
}
