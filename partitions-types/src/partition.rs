// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::common::{Sector, format_size};
use crate::filesystem::FsKind;
use crate::flags::PartitionFlag;

/// Slot type of a partition in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Primary,
    Logical,
    Extended,
    Unallocated,
}

/// Planning state of a partition description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
    /// Exists on disk as described.
    #[default]
    Real,
    /// Will be created by a pending operation.
    New,
    /// Will be created by a pending copy.
    Copy,
    /// Exists on disk but will be reformatted.
    Formatted,
}

/// Boundary alignment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Legacy cylinder boundaries (heads × sectors).
    Cylinder,
    /// 1 MiB boundaries.
    #[default]
    Mebibyte,
    /// Device-reported optimal I/O alignment.
    Optimal,
    /// Boundaries are used exactly as given.
    Strict,
}

impl Alignment {
    pub fn parse(s: &str) -> Option<Alignment> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cylinder" => Some(Alignment::Cylinder),
            "mebibyte" | "mib" => Some(Alignment::Mebibyte),
            "optimal" => Some(Alignment::Optimal),
            "strict" | "none" => Some(Alignment::Strict),
            _ => None,
        }
    }
}

/// One region of a device: a real partition, a planned one, or free space.
///
/// `sector_start` and `sector_end` are absolute and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub device_path: String,

    /// Block device node of the partition (empty for unallocated space).
    pub path: String,

    /// Table slot number, `None` for unallocated space.
    pub number: Option<u32>,

    pub kind: PartitionKind,
    pub status: PartitionStatus,
    pub fs: FsKind,
    pub alignment: Alignment,

    pub sector_start: Sector,
    pub sector_end: Sector,
    pub sector_size: u64,

    /// Sectors in use by the filesystem, `None` when unknown.
    pub sectors_used: Option<Sector>,
    pub sectors_unused: Option<Sector>,

    pub label: Option<String>,
    pub uuid: Option<String>,

    #[serde(default)]
    pub flags: BTreeSet<PartitionFlag>,

    pub inside_extended: bool,

    /// Keep `sector_start` unchanged while aligning.
    #[serde(default)]
    pub strict_start: bool,

    /// Mounted or otherwise held open by the system.
    #[serde(default)]
    pub busy: bool,

    /// Logical partitions of an extended partition.
    #[serde(default)]
    pub logicals: Vec<Partition>,

    /// Diagnostics collected while probing.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl Partition {
    pub fn new(
        device_path: impl Into<String>,
        number: u32,
        kind: PartitionKind,
        fs: FsKind,
        sector_start: Sector,
        sector_end: Sector,
        sector_size: u64,
    ) -> Self {
        Self {
            device_path: device_path.into(),
            path: String::new(),
            number: Some(number),
            kind,
            status: PartitionStatus::Real,
            fs,
            alignment: Alignment::Strict,
            sector_start,
            sector_end,
            sector_size,
            sectors_used: None,
            sectors_unused: None,
            label: None,
            uuid: None,
            flags: BTreeSet::new(),
            inside_extended: kind == PartitionKind::Logical,
            strict_start: false,
            busy: false,
            logicals: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn new_unallocated(
        device_path: impl Into<String>,
        sector_start: Sector,
        sector_end: Sector,
        sector_size: u64,
        inside_extended: bool,
    ) -> Self {
        Self {
            device_path: device_path.into(),
            path: String::new(),
            number: None,
            kind: PartitionKind::Unallocated,
            status: PartitionStatus::Real,
            fs: FsKind::Unallocated,
            alignment: Alignment::Strict,
            sector_start,
            sector_end,
            sector_size,
            sectors_used: None,
            sectors_unused: None,
            label: None,
            uuid: None,
            flags: BTreeSet::new(),
            inside_extended,
            strict_start: false,
            busy: false,
            logicals: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn sector_length(&self) -> Sector {
        if self.sector_end < self.sector_start {
            return 0;
        }
        self.sector_end - self.sector_start + 1
    }

    pub fn byte_length(&self) -> u64 {
        self.sector_length() * self.sector_size
    }

    pub fn byte_offset(&self) -> u64 {
        self.sector_start * self.sector_size
    }

    pub fn is_unallocated(&self) -> bool {
        self.kind == PartitionKind::Unallocated
    }

    pub fn is_extended(&self) -> bool {
        self.kind == PartitionKind::Extended
    }

    pub fn is_logical(&self) -> bool {
        self.kind == PartitionKind::Logical
    }

    /// True when the inclusive ranges share at least one sector.
    pub fn overlaps(&self, other: &Partition) -> bool {
        self.sector_start <= other.sector_end && other.sector_start <= self.sector_end
    }

    /// True when `other` lies completely inside this region.
    pub fn contains(&self, other: &Partition) -> bool {
        self.sector_start <= other.sector_start && other.sector_end <= self.sector_end
    }

    /// Record filesystem usage.
    ///
    /// `fs_size` is the size the filesystem believes it has (`None` meaning
    /// "the whole partition") and `fs_unused` its free sectors. Values that
    /// do not fit the partition leave usage unknown.
    pub fn set_sector_usage(&mut self, fs_size: Option<Sector>, fs_unused: Sector) {
        let length = self.sector_length();
        match fs_size {
            Some(size) if size <= length && fs_unused <= size => {
                self.sectors_used = Some(size - fs_unused);
                self.sectors_unused = Some(fs_unused);
            }
            None if fs_unused <= length => {
                self.sectors_used = Some(length - fs_unused);
                self.sectors_unused = Some(fs_unused);
            }
            _ => {
                self.sectors_used = None;
                self.sectors_unused = None;
            }
        }
    }

    /// Smallest length in sectors the partition may shrink to.
    pub fn min_sectors(&self) -> Sector {
        self.sectors_used.unwrap_or(0)
    }

    pub fn display_path(&self) -> String {
        if !self.path.is_empty() {
            return self.path.clone();
        }
        match self.number {
            Some(number) => format!("{} #{}", self.device_path, number),
            None => "unallocated".to_string(),
        }
    }

    pub fn display_size(&self) -> String {
        format_size(self.sector_length(), self.sector_size)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}..{}] {} {}",
            self.display_path(),
            self.sector_start,
            self.sector_end,
            self.fs,
            self.display_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(start: Sector, end: Sector) -> Partition {
        Partition::new("/dev/sda", 1, PartitionKind::Primary, FsKind::Ext4, start, end, 512)
    }

    #[test]
    fn length_is_inclusive() {
        let p = part(2048, 4095);
        assert_eq!(p.sector_length(), 2048);
        assert_eq!(p.byte_length(), 1024 * 1024);
    }

    #[test]
    fn overlap_detects_shared_sector() {
        assert!(part(0, 100).overlaps(&part(100, 200)));
        assert!(!part(0, 99).overlaps(&part(100, 200)));
        assert!(part(0, 1000).contains(&part(100, 200)));
    }

    #[test]
    fn sector_usage_with_known_fs_size() {
        let mut p = part(0, 999);
        p.set_sector_usage(Some(800), 300);
        assert_eq!(p.sectors_used, Some(500));
        assert_eq!(p.sectors_unused, Some(300));
    }

    #[test]
    fn sector_usage_spanning_partition() {
        let mut p = part(0, 999);
        p.set_sector_usage(None, 0);
        assert_eq!(p.sectors_used, Some(1000));
    }

    #[test]
    fn sector_usage_out_of_range_is_unknown() {
        let mut p = part(0, 999);
        p.set_sector_usage(Some(2000), 0);
        assert_eq!(p.sectors_used, None);
        assert_eq!(p.min_sectors(), 0);
    }
}
