//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by node.rs for replication, persisted via raft-storage
//! what: LogEntry struct, Log store with sequential append, truncation and commit index

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The command to be applied to the state machine
    pub command: String,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: impl Into<String>) -> Self {
        Self {
            term,
            index,
            command: command.into(),
        }
    }
}

/// Ordered, 1-indexed sequence of entries plus the commit index
///
/// Entries are kept contiguous: the entry at position `i` of the backing
/// vector always has index `i + 1`. Entries at or below `commit_index` are
/// never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    entries: Vec<LogEntry>,
    commit_index: u64,
}

impl Log {
    /// Create an empty log with nothing committed
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from previously stored entries
    ///
    /// The entries must start at index 1 and have no gaps. The commit index
    /// starts at zero; it is volatile state and is relearned from the leader.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<Self, LogError> {
        for (pos, entry) in entries.iter().enumerate() {
            let expected = pos as u64 + 1;
            if entry.index != expected {
                return Err(LogError::NonContiguous {
                    expected,
                    got: entry.index,
                });
            }
        }
        Ok(Self {
            entries,
            commit_index: 0,
        })
    }

    /// The entry at the highest index, if any
    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Highest index present, 0 if empty
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Term of the last entry, 0 if empty
    pub fn last_term(&self) -> u64 {
        self.last_entry().map_or(0, |e| e.term)
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Look up the entry at `index`
    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Term of the entry at `index`
    ///
    /// Index 0 is the empty prefix every log shares and has term 0.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entry(index).map(|e| e.term)
    }

    /// Whether the log holds an entry with exactly this index and term
    ///
    /// `(0, 0)` always matches.
    pub fn contains(&self, index: u64, term: u64) -> bool {
        self.term_at(index) == Some(term)
    }

    /// All entries from `index` onwards, empty when `index` is past the end
    pub fn entries_from(&self, index: u64) -> &[LogEntry] {
        let start = index.max(1) - 1;
        if start >= self.last_index() {
            return &[];
        }
        &self.entries[start as usize..]
    }

    /// Append one entry at `index`
    ///
    /// Succeeds only when `index == last_index() + 1`; otherwise the log is
    /// left untouched and `IndexMismatch` is returned.
    pub fn append(
        &mut self,
        term: u64,
        index: u64,
        command: impl Into<String>,
    ) -> Result<&LogEntry, LogError> {
        let expected = self.last_index() + 1;
        if index != expected {
            return Err(LogError::IndexMismatch {
                expected,
                got: index,
            });
        }
        self.entries.push(LogEntry::new(term, index, command));
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Remove the entry at `index` and everything after it, returning what is left
    ///
    /// A truncation point past the end removes nothing. Truncating into the
    /// committed prefix is refused.
    pub fn truncate_from(&mut self, index: u64) -> Result<&[LogEntry], LogError> {
        let index = index.max(1);
        if index <= self.commit_index {
            return Err(LogError::TruncateCommitted {
                index,
                commit_index: self.commit_index,
            });
        }
        self.entries.truncate((index - 1) as usize);
        Ok(&self.entries)
    }

    /// True iff the last entry has exactly this `(index, term)` pair
    pub fn matches_last(&self, index: u64, term: u64) -> bool {
        self.last_entry()
            .map_or(false, |e| e.index == index && e.term == term)
    }

    /// Move the commit index to `min(leader_commit, last_index())`
    ///
    /// Never moves it backwards. Returns the resulting commit index.
    pub fn advance_commit(&mut self, leader_commit: u64) -> u64 {
        let target = leader_commit.min(self.last_index());
        if target > self.commit_index {
            self.commit_index = target;
        }
        self.commit_index
    }
}
