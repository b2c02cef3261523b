// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem kinds and their capability descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content kind of a partition region.
///
/// The first four variants are not real filesystems: they describe free space,
/// an unrecognised signature, a region intentionally left without a
/// filesystem, and the container entry of an msdos extended partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsKind {
    Unallocated,
    Unknown,
    Cleared,
    Extended,
    Ext2,
    Ext3,
    Ext4,
    Fat16,
    Fat32,
    Ntfs,
    Xfs,
    Btrfs,
    LinuxSwap,
    Luks,
}

impl FsKind {
    /// Every kind that a driver can be registered for.
    pub const FILESYSTEMS: [FsKind; 10] = [
        FsKind::Ext2,
        FsKind::Ext3,
        FsKind::Ext4,
        FsKind::Fat16,
        FsKind::Fat32,
        FsKind::Ntfs,
        FsKind::Xfs,
        FsKind::Btrfs,
        FsKind::LinuxSwap,
        FsKind::Luks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Unallocated => "unallocated",
            FsKind::Unknown => "unknown",
            FsKind::Cleared => "cleared",
            FsKind::Extended => "extended",
            FsKind::Ext2 => "ext2",
            FsKind::Ext3 => "ext3",
            FsKind::Ext4 => "ext4",
            FsKind::Fat16 => "fat16",
            FsKind::Fat32 => "fat32",
            FsKind::Ntfs => "ntfs",
            FsKind::Xfs => "xfs",
            FsKind::Btrfs => "btrfs",
            FsKind::LinuxSwap => "linux-swap",
            FsKind::Luks => "luks",
        }
    }

    /// Parse a kind name as reported by blkid or written by a user.
    ///
    /// `vfat` cannot be told apart without the FAT version, so it maps to
    /// fat32; callers with a `VERSION` tag should use [`FsKind::from_blkid`].
    pub fn parse(s: &str) -> FsKind {
        match s.trim().to_ascii_lowercase().as_str() {
            "unallocated" => FsKind::Unallocated,
            "cleared" => FsKind::Cleared,
            "extended" => FsKind::Extended,
            "ext2" => FsKind::Ext2,
            "ext3" => FsKind::Ext3,
            "ext4" => FsKind::Ext4,
            "fat16" | "fat12" => FsKind::Fat16,
            "fat32" | "vfat" => FsKind::Fat32,
            "ntfs" | "ntfs3" => FsKind::Ntfs,
            "xfs" => FsKind::Xfs,
            "btrfs" => FsKind::Btrfs,
            "linux-swap" | "swap" => FsKind::LinuxSwap,
            "luks" | "crypto_luks" => FsKind::Luks,
            _ => FsKind::Unknown,
        }
    }

    /// Map a blkid `TYPE`/`VERSION` pair to a kind.
    pub fn from_blkid(fs_type: &str, version: Option<&str>) -> FsKind {
        if fs_type.eq_ignore_ascii_case("vfat") {
            return match version.map(|v| v.to_ascii_uppercase()) {
                Some(v) if v == "FAT16" || v == "FAT12" => FsKind::Fat16,
                _ => FsKind::Fat32,
            };
        }
        FsKind::parse(fs_type)
    }

    /// True for kinds that hold an actual filesystem (or container) a driver
    /// can act upon.
    pub fn is_filesystem(&self) -> bool {
        !matches!(
            self,
            FsKind::Unallocated | FsKind::Unknown | FsKind::Cleared | FsKind::Extended
        )
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performs an action for a filesystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    /// Not available on this host.
    #[default]
    None,
    /// Done by the engine itself (block copy).
    Engine,
    /// Done by an external tool the driver invokes.
    External,
}

impl Support {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Support::None)
    }
}

/// A single named capability, used for lookups and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAction {
    Create,
    Read,
    ReadLabel,
    WriteLabel,
    ReadUuid,
    WriteUuid,
    Grow,
    Shrink,
    Move,
    Copy,
    Check,
    Remove,
}

impl FsAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsAction::Create => "create",
            FsAction::Read => "read usage",
            FsAction::ReadLabel => "read label",
            FsAction::WriteLabel => "write label",
            FsAction::ReadUuid => "read uuid",
            FsAction::WriteUuid => "write uuid",
            FsAction::Grow => "grow",
            FsAction::Shrink => "shrink",
            FsAction::Move => "move",
            FsAction::Copy => "copy",
            FsAction::Check => "check",
            FsAction::Remove => "remove",
        }
    }
}

impl fmt::Display for FsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability descriptor for one filesystem kind.
///
/// Built by a driver while the registry probes the host and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCapabilities {
    pub kind: FsKind,
    pub create: Support,
    pub read: Support,
    pub read_label: Support,
    pub write_label: Support,
    pub read_uuid: Support,
    pub write_uuid: Support,
    pub grow: Support,
    pub shrink: Support,
    #[serde(rename = "move")]
    pub move_: Support,
    pub copy: Support,
    pub check: Support,
    pub remove: Support,
    pub online_grow: bool,
    pub online_shrink: bool,
    /// Smallest filesystem the create/shrink tools accept, in bytes.
    pub min_size: Option<u64>,
    /// Largest filesystem the format supports, in bytes.
    pub max_size: Option<u64>,
}

impl FsCapabilities {
    /// A descriptor with every action unsupported.
    pub fn none(kind: FsKind) -> Self {
        Self {
            kind,
            create: Support::None,
            read: Support::None,
            read_label: Support::None,
            write_label: Support::None,
            read_uuid: Support::None,
            write_uuid: Support::None,
            grow: Support::None,
            shrink: Support::None,
            move_: Support::None,
            copy: Support::None,
            check: Support::None,
            remove: Support::None,
            online_grow: false,
            online_shrink: false,
            min_size: None,
            max_size: None,
        }
    }

    pub fn support(&self, action: FsAction) -> Support {
        match action {
            FsAction::Create => self.create,
            FsAction::Read => self.read,
            FsAction::ReadLabel => self.read_label,
            FsAction::WriteLabel => self.write_label,
            FsAction::ReadUuid => self.read_uuid,
            FsAction::WriteUuid => self.write_uuid,
            FsAction::Grow => self.grow,
            FsAction::Shrink => self.shrink,
            FsAction::Move => self.move_,
            FsAction::Copy => self.copy,
            FsAction::Check => self.check,
            FsAction::Remove => self.remove,
        }
    }

    pub fn supports(&self, action: FsAction) -> bool {
        self.support(action).is_supported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_blkid_names() {
        assert_eq!(FsKind::parse("swap"), FsKind::LinuxSwap);
        assert_eq!(FsKind::parse("crypto_LUKS"), FsKind::Luks);
        assert_eq!(FsKind::parse("zfs_member"), FsKind::Unknown);
        assert_eq!(FsKind::from_blkid("vfat", Some("FAT16")), FsKind::Fat16);
        assert_eq!(FsKind::from_blkid("vfat", Some("FAT32")), FsKind::Fat32);
    }

    #[test]
    fn as_str_round_trips_for_real_filesystems() {
        for kind in FsKind::FILESYSTEMS {
            assert_eq!(FsKind::parse(kind.as_str()), kind);
            assert!(kind.is_filesystem());
        }
        assert!(!FsKind::Unallocated.is_filesystem());
    }

    #[test]
    fn empty_capabilities_support_nothing() {
        let caps = FsCapabilities::none(FsKind::Xfs);
        assert!(!caps.supports(FsAction::Grow));
        assert_eq!(caps.support(FsAction::Move), Support::None);
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&FsKind::LinuxSwap).unwrap();
        assert_eq!(json, "\"linux-swap\"");
    }
}
