// SPDX-License-Identifier: GPL-3.0-only

//! Shared, ordered record of side effects
//!
//! The backend and the fake driver append to the same journal so tests can
//! assert on the order in which the engine touched the table and the
//! filesystem.

use std::sync::{Arc, Mutex, MutexGuard};

use partitions_types::{FsAction, FsKind, Sector, TableEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A table was written (whether or not the commit then settled).
    Commit {
        device: String,
        entries: Vec<TableEntry>,
    },
    /// Signatures were wiped in `start..start + length`.
    Erase {
        device: String,
        start: Sector,
        length: Sector,
    },
    /// A driver action ran against `start..=end`. For resizes `end` is the
    /// last sector of the new filesystem size.
    Driver {
        kind: FsKind,
        action: FsAction,
        start: Sector,
        end: Sector,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, entry: JournalEntry) {
        tracing::debug!("journal: {:?}", entry);
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    /// Index of the first entry matching `pred`.
    pub fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&JournalEntry) -> bool,
    {
        self.lock().iter().position(pred)
    }

    pub fn driver_actions(&self) -> Vec<FsAction> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Driver { action, .. } => Some(*action),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, JournalEntry::Commit { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
