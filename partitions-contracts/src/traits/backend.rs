// SPDX-License-Identifier: GPL-3.0-only

use partitions_types::{DeviceGeometry, FsKind, PartitionTable, Sector, TableType};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Filesystem signature found in a region.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FsProbe {
    pub kind: Option<FsKind>,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

/// Opens devices for reading and changing their partition table.
pub trait DiskBackend: Send + Sync {
    /// Open `path` for exclusive use. Fails with `DeviceNotFound` or
    /// `DeviceBusy`. The session holds the device until dropped.
    fn open(&self, path: &str) -> Result<Box<dyn DiskSession>>;

    /// Block device node of partition `number` on `device`.
    fn partition_path(&self, device: &str, number: u32) -> String {
        default_partition_path(device, number)
    }

    /// Devices the kernel has stacked on `partition_path`, such as an open
    /// dm-crypt mapping. A partition with holders is in use.
    fn holders(&self, _partition_path: &str) -> Vec<String> {
        Vec::new()
    }
}

/// An open device with its in-memory partition table.
///
/// Table edits only touch memory until [`DiskSession::commit`].
pub trait DiskSession: Send {
    fn geometry(&self) -> &DeviceGeometry;

    /// `None` when the device has no recognised partition table.
    fn table(&self) -> Option<&PartitionTable>;

    fn table_mut(&mut self) -> Option<&mut PartitionTable>;

    /// Replace the table with an empty one of `table_type`. Every existing
    /// partition is lost on commit.
    fn set_disklabel(&mut self, table_type: TableType) -> Result<()>;

    /// Write the table to the device, then wait until the kernel's view of
    /// the partitions matches. Fails with `CommitTimeout` when the system
    /// does not settle in time; the on-disk table may or may not be correct
    /// in that case.
    fn commit(&mut self) -> Result<()>;

    /// Detect the filesystem in `start..start + length` (sectors).
    fn probe_filesystem(&self, start: Sector, length: Sector) -> Result<FsProbe>;

    /// Wipe filesystem signatures in `start..start + length` (sectors).
    fn erase_signatures(&mut self, start: Sector, length: Sector) -> Result<()>;
}

/// `/dev/sda` + 1 → `/dev/sda1`, `/dev/nvme0n1` + 1 → `/dev/nvme0n1p1`.
pub fn default_partition_path(device: &str, number: u32) -> String {
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", device, number)
    } else {
        format!("{}{}", device, number)
    }
}
