// SPDX-License-Identifier: GPL-3.0-only

//! [`DiskBackend`] that keeps partition tables in memory
//!
//! Filesystem data lives in real image files (see [`crate::DiskImage`]);
//! only the table is simulated. Commits are recorded in the shared
//! [`Journal`] and can be made to time out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use partitions_contracts::{DiskBackend, DiskSession, EngineError, FsProbe, Result};
use partitions_sys::blockio;
use partitions_types::{DeviceGeometry, PartitionTable, Sector, TableType};

use crate::image::{DiskImage, FakeSignature};
use crate::journal::{Journal, JournalEntry};

#[derive(Debug)]
struct DiskState {
    geometry: DeviceGeometry,
    table: Option<PartitionTable>,
    open: bool,
    commits: usize,
    /// Upcoming commits that write the table but never settle.
    unsettled_commits: usize,
}

type Disks = Arc<Mutex<HashMap<String, DiskState>>>;

fn lock(disks: &Disks) -> MutexGuard<'_, HashMap<String, DiskState>> {
    disks.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    disks: Disks,
    journal: Journal,
    holders: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            disks: Disks::default(),
            journal,
            holders: Arc::default(),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn add_disk(&self, geometry: DeviceGeometry, table: Option<PartitionTable>) {
        lock(&self.disks).insert(
            geometry.path.clone(),
            DiskState {
                geometry,
                table,
                open: false,
                commits: 0,
                unsettled_commits: 0,
            },
        );
    }

    /// Register an image with the given table.
    pub fn attach(&self, image: &DiskImage, table: Option<PartitionTable>) {
        self.add_disk(image.geometry(), table);
    }

    /// The last committed table of `path`.
    pub fn table(&self, path: &str) -> Option<PartitionTable> {
        lock(&self.disks).get(path).and_then(|d| d.table.clone())
    }

    pub fn commit_count(&self, path: &str) -> usize {
        lock(&self.disks).get(path).map(|d| d.commits).unwrap_or(0)
    }

    /// Make the next `count` commits on `path` report `CommitTimeout` after
    /// writing the table.
    pub fn fail_commits(&self, path: &str, count: usize) {
        if let Some(disk) = lock(&self.disks).get_mut(path) {
            disk.unsettled_commits = count;
        }
    }

    pub fn is_open(&self, path: &str) -> bool {
        lock(&self.disks).get(path).is_some_and(|d| d.open)
    }

    /// Stack `holder` (e.g. `dm-0`) on the partition node `partition_path`.
    pub fn hold(&self, partition_path: &str, holder: &str) {
        self.holders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(partition_path.to_string())
            .or_default()
            .push(holder.to_string());
    }
}

impl DiskBackend for MemoryBackend {
    fn open(&self, path: &str) -> Result<Box<dyn DiskSession>> {
        let mut disks = lock(&self.disks);
        let disk = disks
            .get_mut(path)
            .ok_or_else(|| EngineError::DeviceNotFound(path.to_string()))?;
        if disk.open {
            return Err(EngineError::DeviceBusy(path.to_string()));
        }
        disk.open = true;
        Ok(Box::new(MemorySession {
            path: path.to_string(),
            geometry: disk.geometry.clone(),
            table: disk.table.clone(),
            disks: self.disks.clone(),
            journal: self.journal.clone(),
        }))
    }

    fn holders(&self, partition_path: &str) -> Vec<String> {
        self.holders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(partition_path)
            .cloned()
            .unwrap_or_default()
    }
}

/// Working copy of one disk; written back on commit, released on drop.
pub struct MemorySession {
    path: String,
    geometry: DeviceGeometry,
    table: Option<PartitionTable>,
    disks: Disks,
    journal: Journal,
}

impl DiskSession for MemorySession {
    fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    fn table(&self) -> Option<&PartitionTable> {
        self.table.as_ref()
    }

    fn table_mut(&mut self) -> Option<&mut PartitionTable> {
        self.table.as_mut()
    }

    fn set_disklabel(&mut self, table_type: TableType) -> Result<()> {
        self.table = Some(PartitionTable::new(
            table_type,
            self.geometry.sector_size,
            self.geometry.length,
        ));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut disks = lock(&self.disks);
        let disk = disks
            .get_mut(&self.path)
            .ok_or_else(|| EngineError::DeviceNotFound(self.path.clone()))?;
        disk.table = self.table.clone();
        disk.commits += 1;
        self.journal.record(JournalEntry::Commit {
            device: self.path.clone(),
            entries: self
                .table
                .as_ref()
                .map(|t| t.entries().to_vec())
                .unwrap_or_default(),
        });

        if disk.unsettled_commits > 0 {
            disk.unsettled_commits -= 1;
            return Err(EngineError::CommitTimeout {
                device: self.path.clone(),
                waited: Duration::ZERO,
            });
        }
        Ok(())
    }

    fn probe_filesystem(&self, start: Sector, _length: Sector) -> Result<FsProbe> {
        let signature = FakeSignature::read_at(&self.path, start * self.geometry.sector_size)?;
        Ok(signature
            .map(|s| FsProbe {
                kind: Some(s.kind),
                label: s.label,
                uuid: s.uuid,
            })
            .unwrap_or_default())
    }

    fn erase_signatures(&mut self, start: Sector, length: Sector) -> Result<()> {
        let sector_size = self.geometry.sector_size;
        let file = blockio::open_for_write(&self.path)?;
        blockio::erase_signatures(&file, start * sector_size, length * sector_size)?;
        self.journal.record(JournalEntry::Erase {
            device: self.path.clone(),
            start,
            length,
        });
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(disk) = lock(&self.disks).get_mut(&self.path) {
            disk.open = false;
        }
    }
}
