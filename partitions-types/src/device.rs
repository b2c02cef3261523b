// SPDX-License-Identifier: GPL-3.0-only

//! Device model
//!
//! A [`Device`] is always read fresh from hardware. It is never carried
//! across a change without re-reading.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{MEBIBYTE, Sector};
use crate::partition::{Partition, PartitionKind};

/// Partition table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Msdos,
    Gpt,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::Msdos => "msdos",
            TableType::Gpt => "gpt",
        }
    }

    pub fn parse(s: &str) -> Option<TableType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msdos" | "dos" | "mbr" => Some(TableType::Msdos),
            "gpt" => Some(TableType::Gpt),
            _ => None,
        }
    }

    pub fn max_primary(&self) -> u32 {
        match self {
            TableType::Msdos => 4,
            TableType::Gpt => 128,
        }
    }

    pub fn supports_extended(&self) -> bool {
        matches!(self, TableType::Msdos)
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical properties of a block device, as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    // === Identity ===
    /// Device path (e.g., "/dev/sda") or image file path
    pub path: String,

    /// Model string, empty when unknown
    pub model: String,

    // === Size ===
    /// Logical sector size in bytes
    pub sector_size: u64,

    /// Total length in sectors
    pub length: Sector,

    // === Legacy CHS ===
    pub heads: u64,
    pub sectors: u64,
    pub cylinders: u64,

    // === I/O topology ===
    /// Offset of the first naturally aligned sector, in bytes
    pub alignment_offset: u64,

    /// Optimal I/O size in bytes, 0 when not reported
    pub optimal_io_size: u64,

    pub readonly: bool,
}

impl DeviceGeometry {
    /// Build geometry with the conventional 255 heads / 63 sectors layout.
    pub fn new(path: impl Into<String>, sector_size: u64, length: Sector) -> Self {
        let heads = 255;
        let sectors = 63;
        Self {
            path: path.into(),
            model: String::new(),
            sector_size,
            length,
            heads,
            sectors,
            cylinders: length / (heads * sectors),
            alignment_offset: 0,
            optimal_io_size: 0,
            readonly: false,
        }
    }

    /// Sectors per cylinder.
    pub fn cylsize(&self) -> Sector {
        (self.heads * self.sectors).max(1)
    }

    /// Sectors per mebibyte.
    pub fn mebibyte_sectors(&self) -> Sector {
        (MEBIBYTE / self.sector_size.max(1)).max(1)
    }

    /// Grain and offset (in sectors) of the device-reported optimal
    /// alignment.
    ///
    /// An optimal I/O size that already divides 1 MiB adds nothing over
    /// mebibyte alignment, so the grain falls back to 1 MiB in that case.
    pub fn optimal_alignment(&self) -> (Sector, Sector) {
        let sector_size = self.sector_size.max(1);
        let grain = if self.optimal_io_size > 0 && MEBIBYTE % self.optimal_io_size != 0 {
            (self.optimal_io_size / sector_size).max(1)
        } else {
            self.mebibyte_sectors()
        };
        let offset = (self.alignment_offset / sector_size) % grain;
        (grain, offset)
    }

    pub fn byte_size(&self) -> u64 {
        self.length * self.sector_size
    }
}

/// A block device with its partition layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub geometry: DeviceGeometry,

    /// `None` when the device carries no partition table.
    pub table_type: Option<TableType>,

    pub max_primary: u32,

    /// First and last sector partitions may occupy.
    pub first_usable: Sector,
    pub last_usable: Sector,

    /// Ordered by start sector; includes unallocated gaps.
    pub partitions: Vec<Partition>,
}

impl Device {
    pub fn path(&self) -> &str {
        &self.geometry.path
    }

    pub fn sector_size(&self) -> u64 {
        self.geometry.sector_size
    }

    pub fn length(&self) -> Sector {
        self.geometry.length
    }

    pub fn cylsize(&self) -> Sector {
        self.geometry.cylsize()
    }

    pub fn readonly(&self) -> bool {
        self.geometry.readonly
    }

    /// Find a partition by table number, looking inside the extended
    /// partition too.
    pub fn partition(&self, number: u32) -> Option<&Partition> {
        self.all_partitions().find(|p| p.number == Some(number))
    }

    /// Iterate every entry, logicals included, in table order.
    pub fn all_partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions
            .iter()
            .flat_map(|p| std::iter::once(p).chain(p.logicals.iter()))
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.kind == PartitionKind::Extended)
    }

    /// Number of primary and extended entries.
    pub fn primary_count(&self) -> u32 {
        self.partitions
            .iter()
            .filter(|p| matches!(p.kind, PartitionKind::Primary | PartitionKind::Extended))
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimal_alignment_defaults_to_mebibyte() {
        let geometry = DeviceGeometry::new("/dev/sda", 512, 1_000_000);
        assert_eq!(geometry.optimal_alignment(), (2048, 0));
    }

    #[test]
    fn optimal_alignment_uses_odd_io_size() {
        let mut geometry = DeviceGeometry::new("/dev/md0", 512, 1_000_000);
        geometry.optimal_io_size = 3 * 64 * 1024;
        geometry.alignment_offset = 512 * 7;
        assert_eq!(geometry.optimal_alignment(), (384, 7));
    }

    #[test]
    fn legacy_geometry_has_63_sector_tracks() {
        let geometry = DeviceGeometry::new("/dev/sda", 512, 16065 * 10);
        assert_eq!(geometry.cylsize(), 16065);
        assert_eq!(geometry.cylinders, 10);
    }

    #[test]
    fn table_type_parses_aliases() {
        assert_eq!(TableType::parse("dos"), Some(TableType::Msdos));
        assert_eq!(TableType::parse("GPT"), Some(TableType::Gpt));
        assert_eq!(TableType::parse("sun"), None);
    }
}
