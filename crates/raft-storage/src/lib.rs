//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: persists what raft-core's RaftNode / NodeHandle report, rebuilds nodes on restart
//! what: Storage trait, FileStorage, InMemoryStorage, checkpoint and recover helpers

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use raft_core::{DurableState, HardState, Log, LogEntry, LogError};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("storage encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("stored log is corrupt: {0}")]
    Corrupt(#[from] LogError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// trait for durable storage of raft state
///
/// this abstraction allows the same engine to run against:
/// - real filesystem
/// - in-memory (testing)
pub trait Storage {
    /// persist the current term and voted_for
    fn save_hard_state(&mut self, state: &HardState) -> Result<()>;

    /// load the persisted term and voted_for
    fn load_hard_state(&self) -> Result<HardState>;

    /// append entries to the log
    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()>;

    /// load all log entries (for crash recovery)
    fn load_log(&self) -> Result<Vec<LogEntry>>;

    /// truncate log from given index (for conflict resolution)
    fn truncate_log_from(&mut self, from_index: u64) -> Result<()>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> Result<()>;
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores raft state in a directory with:
/// - meta.json: term and voted_for
/// - log.json: array of log entries
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.json")
    }

    /// atomic write: write to temp file, fsync, then rename over the target
    fn write_json<T: Serialize + ?Sized>(&self, target: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let temp_path = target.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, target)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl Storage for FileStorage {
    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        self.write_json(&self.meta_path(), state)
    }

    fn load_hard_state(&self) -> Result<HardState> {
        self.read_json(&self.meta_path())
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // whole-file rewrite keeps the log file valid json at every point
        let mut log = self.load_log()?;
        log.extend_from_slice(entries);
        self.write_json(&self.log_path(), &log)
    }

    fn load_log(&self) -> Result<Vec<LogEntry>> {
        self.read_json(&self.log_path())
    }

    fn truncate_log_from(&mut self, from_index: u64) -> Result<()> {
        let mut log = self.load_log()?;
        log.retain(|e| e.index < from_index);
        self.write_json(&self.log_path(), &log)
    }

    fn clear(&mut self) -> Result<()> {
        for path in [self.meta_path(), self.log_path()] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    hard_state: HardState,
    log: Vec<LogEntry>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        self.hard_state = state.clone();
        Ok(())
    }

    fn load_hard_state(&self) -> Result<HardState> {
        Ok(self.hard_state.clone())
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()> {
        self.log.extend_from_slice(entries);
        Ok(())
    }

    fn load_log(&self) -> Result<Vec<LogEntry>> {
        Ok(self.log.clone())
    }

    fn truncate_log_from(&mut self, from_index: u64) -> Result<()> {
        self.log.retain(|e| e.index < from_index);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.hard_state = HardState::default();
        self.log.clear();
        Ok(())
    }
}

// -- engine integration --

/// Bring storage in line with a node's durable state
///
/// Writes the hard state, then rewrites only the part of the log that
/// differs: a diverged stored suffix is truncated and the missing entries
/// are appended.
pub fn checkpoint<S: Storage + ?Sized>(storage: &mut S, state: &DurableState) -> Result<()> {
    storage.save_hard_state(&state.hard_state)?;

    let stored = storage.load_log()?;
    let common = stored
        .iter()
        .zip(&state.entries)
        .take_while(|(a, b)| a == b)
        .count();

    if common < stored.len() {
        let from = common as u64 + 1;
        debug!(from, stored = stored.len(), "truncating diverged stored log");
        storage.truncate_log_from(from)?;
    }
    if common < state.entries.len() {
        storage.append_entries(&state.entries[common..])?;
    }
    Ok(())
}

/// Load what a restarted node needs from storage
///
/// The stored log must be contiguous from index 1.
pub fn recover<S: Storage + ?Sized>(storage: &S) -> Result<DurableState> {
    let hard_state = storage.load_hard_state()?;
    let entries = storage.load_log()?;
    // validate before handing it to the engine
    let log = Log::from_entries(entries)?;
    debug!(term = hard_state.term, entries = log.len(), "recovered raft state");
    Ok(DurableState {
        hard_state,
        entries: log.entries().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hard(term: u64, voted_for: Option<&str>) -> HardState {
        HardState {
            term,
            voted_for: voted_for.map(String::from),
        }
    }

    #[test]
    fn in_memory_storage_persists_hard_state() {
        let mut storage = InMemoryStorage::new();

        storage.save_hard_state(&hard(5, Some("b"))).unwrap();
        assert_eq!(storage.load_hard_state().unwrap(), hard(5, Some("b")));
    }

    #[test]
    fn in_memory_storage_truncates_log() {
        let mut storage = InMemoryStorage::new();
        let entries = vec![
            LogEntry::new(1, 1, "a"),
            LogEntry::new(1, 2, "b"),
            LogEntry::new(1, 3, "c"),
        ];
        storage.append_entries(&entries).unwrap();

        storage.truncate_log_from(2).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].index, 1);
    }

    #[test]
    fn file_storage_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_hard_state(&hard(10, Some("a"))).unwrap();
            storage
                .append_entries(&[LogEntry::new(10, 1, "command")])
                .unwrap();
        }

        {
            let storage = FileStorage::new(dir.path()).unwrap();
            assert_eq!(storage.load_hard_state().unwrap(), hard(10, Some("a")));
            assert_eq!(storage.load_log().unwrap().len(), 1);
        }
    }

    #[test]
    fn file_storage_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.clear().unwrap();
        storage.save_hard_state(&hard(1, None)).unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.load_hard_state().unwrap(), HardState::default());
    }

    #[test]
    fn checkpoint_rewrites_only_diverged_suffix() {
        let mut storage = InMemoryStorage::new();
        storage
            .append_entries(&[
                LogEntry::new(1, 1, "a"),
                LogEntry::new(1, 2, "b"),
                LogEntry::new(1, 3, "c"),
            ])
            .unwrap();

        let state = DurableState {
            hard_state: hard(2, None),
            entries: vec![
                LogEntry::new(1, 1, "a"),
                LogEntry::new(2, 2, "x"),
            ],
        };
        checkpoint(&mut storage, &state).unwrap();

        assert_eq!(storage.load_log().unwrap(), state.entries);
        assert_eq!(storage.load_hard_state().unwrap(), hard(2, None));
    }

    #[test]
    fn recover_rejects_gapped_log() {
        let mut storage = InMemoryStorage::new();
        storage
            .append_entries(&[LogEntry::new(1, 1, "a"), LogEntry::new(1, 3, "c")])
            .unwrap();

        assert!(matches!(
            recover(&storage),
            Err(StorageError::Corrupt(LogError::NonContiguous { .. }))
        ));
    }
}
