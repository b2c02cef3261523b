// SPDX-License-Identifier: GPL-3.0-only

//! [`DiskBackend`] over real block devices and disk images

use std::time::Duration;

use partitions_contracts::{DiskBackend, DiskSession, FsProbe, Result};
use partitions_types::{DeviceGeometry, PartitionTable, Sector, TableType};

use crate::blockio::{erase_signatures, open_for_read, open_for_write};
use crate::command::run_command;
use crate::lock::DeviceLock;
use crate::{blkid, settle, sfdisk, sysfs};

/// Backend that reads tables with `sfdisk` and waits for the kernel after
/// every commit.
#[derive(Debug, Clone)]
pub struct SysBackend {
    settle_timeout: Duration,
}

impl SysBackend {
    pub fn new(settle_timeout: Duration) -> Self {
        Self { settle_timeout }
    }
}

impl DiskBackend for SysBackend {
    fn open(&self, path: &str) -> Result<Box<dyn DiskSession>> {
        let geometry = sysfs::read_geometry(path)?;
        let lock = DeviceLock::acquire(path, open_for_read(path)?)?;
        let table = sfdisk::read_table(path, &geometry)?;
        tracing::debug!(
            "Opened {} ({} sectors of {} bytes, table {:?})",
            path,
            geometry.length,
            geometry.sector_size,
            table.as_ref().map(|t| t.table_type)
        );
        Ok(Box::new(SysSession {
            is_block: sysfs::is_block_device(path),
            geometry,
            table,
            settle_timeout: self.settle_timeout,
            _lock: lock,
        }))
    }

    fn holders(&self, partition_path: &str) -> Vec<String> {
        sysfs::holders(partition_path)
    }
}

/// An open device. The lock is released when the session is dropped.
pub struct SysSession {
    geometry: DeviceGeometry,
    table: Option<PartitionTable>,
    is_block: bool,
    settle_timeout: Duration,
    _lock: DeviceLock,
}

impl SysSession {
    fn path(&self) -> &str {
        &self.geometry.path
    }
}

impl DiskSession for SysSession {
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
        let Some(table) = &self.table else {
            return Ok(());
        };
        let path = self.path().to_string();
        sfdisk::write_table(&path, table)?;

        if self.is_block {
            // partx only touches partitions that changed, so mounted
            // neighbours do not block the update.
            run_command("partx", &["--update", &path])?;
            settle::wait_for_table(&path, table, self.settle_timeout)?;
        }
        tracing::info!("Committed partition table to {}", path);
        Ok(())
    }

    fn probe_filesystem(&self, start: Sector, length: Sector) -> Result<FsProbe> {
        let sector_size = self.geometry.sector_size;
        Ok(blkid::probe(
            self.path(),
            start * sector_size,
            length * sector_size,
        )?)
    }

    fn erase_signatures(&mut self, start: Sector, length: Sector) -> Result<()> {
        let sector_size = self.geometry.sector_size;
        let file = open_for_write(self.path())?;
        erase_signatures(&file, start * sector_size, length * sector_size)?;
        Ok(())
    }
}
