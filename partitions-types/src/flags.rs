// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::TableType;

/// A user-toggleable partition flag.
///
/// On msdos tables most flags are encoded in the partition type byte, on gpt
/// either in the type GUID or in the attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFlag {
    Boot,
    Esp,
    Hidden,
    Lvm,
    Raid,
    BiosGrub,
    LegacyBoot,
    Msftres,
    Diag,
}

impl PartitionFlag {
    pub const ALL: [PartitionFlag; 9] = [
        PartitionFlag::Boot,
        PartitionFlag::Esp,
        PartitionFlag::Hidden,
        PartitionFlag::Lvm,
        PartitionFlag::Raid,
        PartitionFlag::BiosGrub,
        PartitionFlag::LegacyBoot,
        PartitionFlag::Msftres,
        PartitionFlag::Diag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionFlag::Boot => "boot",
            PartitionFlag::Esp => "esp",
            PartitionFlag::Hidden => "hidden",
            PartitionFlag::Lvm => "lvm",
            PartitionFlag::Raid => "raid",
            PartitionFlag::BiosGrub => "bios_grub",
            PartitionFlag::LegacyBoot => "legacy_boot",
            PartitionFlag::Msftres => "msftres",
            PartitionFlag::Diag => "diag",
        }
    }

    pub fn parse(s: &str) -> Option<PartitionFlag> {
        PartitionFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Flags a table type can store.
    pub fn available_flags(table_type: TableType) -> Vec<PartitionFlag> {
        match table_type {
            TableType::Msdos => vec![
                PartitionFlag::Boot,
                PartitionFlag::Esp,
                PartitionFlag::Hidden,
                PartitionFlag::Lvm,
                PartitionFlag::Raid,
                PartitionFlag::Diag,
            ],
            TableType::Gpt => vec![
                PartitionFlag::Boot,
                PartitionFlag::Esp,
                PartitionFlag::Hidden,
                PartitionFlag::Lvm,
                PartitionFlag::Raid,
                PartitionFlag::BiosGrub,
                PartitionFlag::LegacyBoot,
                PartitionFlag::Msftres,
                PartitionFlag::Diag,
            ],
        }
    }

    /// Flags that replace the partition type when set. At most one of these
    /// can be active on an entry.
    pub fn is_type_flag(&self, table_type: TableType) -> bool {
        match table_type {
            TableType::Msdos => matches!(
                self,
                PartitionFlag::Esp | PartitionFlag::Lvm | PartitionFlag::Raid | PartitionFlag::Diag
            ),
            TableType::Gpt => matches!(
                self,
                PartitionFlag::Boot
                    | PartitionFlag::Esp
                    | PartitionFlag::Lvm
                    | PartitionFlag::Raid
                    | PartitionFlag::BiosGrub
                    | PartitionFlag::Msftres
                    | PartitionFlag::Diag
            ),
        }
    }
}

impl fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
