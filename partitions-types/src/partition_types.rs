// SPDX-License-Identifier: GPL-3.0-only

//! Partition type codes for DOS/MBR and GPT tables
//!
//! DOS codes are lowercase hex without leading zeros, the way `sfdisk --json`
//! prints them. GPT codes are uppercase type GUIDs.

use crate::device::TableType;
use crate::filesystem::FsKind;
use crate::flags::PartitionFlag;

const GPT_LINUX_DATA: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
const GPT_LINUX_SWAP: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";
const GPT_LINUX_LUKS: &str = "CA7D7CCB-63ED-4C53-861C-1742536059CC";
const GPT_MS_BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";
const GPT_ESP: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
const GPT_BIOS_BOOT: &str = "21686148-6449-6E6F-744E-656564454649";
const GPT_LINUX_LVM: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
const GPT_LINUX_RAID: &str = "A19D880F-05FC-4D3B-A006-743F0F84911E";
const GPT_MS_RESERVED: &str = "E3C9E316-0B5C-4DB8-817D-F92DF00215AE";
const GPT_MS_RECOVERY: &str = "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC";

/// Extended container types on msdos tables.
pub const DOS_EXTENDED_TYPES: [&str; 3] = ["5", "f", "85"];

/// Default type code for a filesystem kind.
pub fn type_code_for_fs(table_type: TableType, fs: FsKind) -> &'static str {
    match table_type {
        TableType::Msdos => match fs {
            FsKind::Extended => "5",
            FsKind::LinuxSwap => "82",
            FsKind::Fat16 => "e",
            FsKind::Fat32 => "c",
            FsKind::Ntfs => "7",
            _ => "83",
        },
        TableType::Gpt => match fs {
            FsKind::LinuxSwap => GPT_LINUX_SWAP,
            FsKind::Fat16 | FsKind::Fat32 | FsKind::Ntfs => GPT_MS_BASIC_DATA,
            FsKind::Luks => GPT_LINUX_LUKS,
            _ => GPT_LINUX_DATA,
        },
    }
}

/// Type code implied by a flag, for flags stored as the partition type.
pub fn type_code_for_flag(table_type: TableType, flag: PartitionFlag) -> Option<&'static str> {
    match (table_type, flag) {
        (TableType::Msdos, PartitionFlag::Esp) => Some("ef"),
        (TableType::Msdos, PartitionFlag::Lvm) => Some("8e"),
        (TableType::Msdos, PartitionFlag::Raid) => Some("fd"),
        (TableType::Msdos, PartitionFlag::Diag) => Some("27"),
        (TableType::Gpt, PartitionFlag::Boot | PartitionFlag::Esp) => Some(GPT_ESP),
        (TableType::Gpt, PartitionFlag::BiosGrub) => Some(GPT_BIOS_BOOT),
        (TableType::Gpt, PartitionFlag::Lvm) => Some(GPT_LINUX_LVM),
        (TableType::Gpt, PartitionFlag::Raid) => Some(GPT_LINUX_RAID),
        (TableType::Gpt, PartitionFlag::Msftres) => Some(GPT_MS_RESERVED),
        (TableType::Gpt, PartitionFlag::Diag) => Some(GPT_MS_RECOVERY),
        _ => None,
    }
}

/// Reverse lookup of [`type_code_for_flag`]. On gpt the ESP type yields both
/// `boot` and `esp`.
pub fn flag_for_type_code(table_type: TableType, code: &str) -> Vec<PartitionFlag> {
    let code = normalize_type_code(table_type, code);
    PartitionFlag::ALL
        .into_iter()
        .filter(|flag| type_code_for_flag(table_type, *flag) == Some(code.as_str()))
        .collect()
}

/// Canonical spelling of a type code (`0x0C` → `c`, GUIDs uppercased).
pub fn normalize_type_code(table_type: TableType, code: &str) -> String {
    match table_type {
        TableType::Msdos => {
            let trimmed = code.trim().trim_start_matches("0x").trim_start_matches("0X");
            let trimmed = trimmed.trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_ascii_lowercase()
            }
        }
        TableType::Gpt => code.trim().to_ascii_uppercase(),
    }
}

/// Best guess of the filesystem a type code was created for.
pub fn fs_hint_for_type_code(table_type: TableType, code: &str) -> FsKind {
    let code = normalize_type_code(table_type, code);
    match table_type {
        TableType::Msdos => match code.as_str() {
            "5" | "f" | "85" => FsKind::Extended,
            "82" => FsKind::LinuxSwap,
            "e" | "6" | "4" => FsKind::Fat16,
            "b" | "c" => FsKind::Fat32,
            "7" => FsKind::Ntfs,
            _ => FsKind::Unknown,
        },
        TableType::Gpt => match code.as_str() {
            GPT_LINUX_SWAP => FsKind::LinuxSwap,
            GPT_LINUX_LUKS => FsKind::Luks,
            _ => FsKind::Unknown,
        },
    }
}

pub fn is_extended_type(table_type: TableType, code: &str) -> bool {
    table_type == TableType::Msdos
        && DOS_EXTENDED_TYPES.contains(&normalize_type_code(table_type, code).as_str())
}
