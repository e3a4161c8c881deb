//! Position and status persistence with atomic file writes.
//!
//! Every position mutation is mirrored to disk before the engine considers
//! it complete, so a crash never leaves exposure the restarted bot does not
//! know about. Completed trades are appended to a JSONL archive.
//!
//! # Safety
//! - State writes use the write-to-temp, fsync, rename pattern
//! - Reads fall back to an empty state when the file is missing

use crate::engine::position::Position;
use crate::error::EngineError;
use crate::market::{BotStatus, PersistenceStore, TradeRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk snapshot: open positions keyed by symbol, plus the last status.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StateFile {
    positions: HashMap<String, Position>,
    status: BotStatus,
}

/// File-backed [`PersistenceStore`]. Single-process use only; an internal
/// mutex serializes writers within the process.
pub struct FileStore {
    state_path: PathBuf,
    trades_path: PathBuf,
    state: Mutex<StateFile>,
}

impl FileStore {
    /// Open (or create) the store in `dir`. Existing state is loaded
    /// eagerly; a corrupted state file is treated as empty rather than
    /// refusing to start.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| EngineError::Persistence(e.to_string()))?;
        let state_path = dir.join("bot_state.json");
        let trades_path = dir.join("trades.jsonl");

        let state = match fs::read_to_string(&state_path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => StateFile::default(),
        };

        Ok(Self {
            state_path,
            trades_path,
            state: Mutex::new(state),
        })
    }

    /// Atomic write: temp file, fsync, rename.
    fn flush(&self, state: &StateFile) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
            tmp.write_all(json.as_bytes())
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
            tmp.sync_all()
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
        }
        fs::rename(&tmp_path, &self.state_path)
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StateFile> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn load_open_positions(&self) -> Result<Vec<Position>, EngineError> {
        Ok(self.lock_state().positions.values().cloned().collect())
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = self.lock_state();
            state
                .positions
                .insert(position.symbol.clone(), position.clone());
            state.clone()
        };
        self.flush(&snapshot)
    }

    async fn remove_position(&self, symbol: &str) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = self.lock_state();
            state.positions.remove(symbol);
            state.clone()
        };
        self.flush(&snapshot)
    }

    async fn append_trade_record(&self, record: &TradeRecord) -> Result<(), EngineError> {
        let json =
            serde_json::to_string(record).map_err(|e| EngineError::Persistence(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trades_path)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        writeln!(file, "{}", json).map_err(|e| EngineError::Persistence(e.to_string()))
    }

    async fn read_bot_status(&self) -> Result<BotStatus, EngineError> {
        Ok(self.lock_state().status.clone())
    }

    async fn write_bot_status(&self, status: &BotStatus) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = self.lock_state();
            state.status = status.clone();
            state.clone()
        };
        self.flush(&snapshot)
    }
}
