// SPDX-License-Identifier: GPL-3.0-only

//! In-memory partition table
//!
//! [`PartitionTable`] holds the entries exactly as stored on disk and
//! validates every change against the table rules (usable range, overlap,
//! extended containment, slot limits). Reading and writing it is the job of
//! a backend; this model never touches a device.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::common::Sector;
use crate::device::TableType;
use crate::flags::PartitionFlag;
use crate::partition::PartitionKind;
use crate::partition_types::{normalize_type_code, type_code_for_flag};

/// First logical partition number on msdos tables.
pub const FIRST_LOGICAL: u32 = 5;

/// Bytes reserved by one copy of the GPT entry array.
const GPT_ENTRIES_BYTES: u64 = 16384;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("Partition #{0} not found")]
    NotFound(u32),

    #[error("Invalid geometry: start sector {start} is after end sector {end}")]
    InvalidGeometry { start: Sector, end: Sector },

    #[error("Sectors {start}..{end} are outside the usable range {first}..{last}")]
    OutOfBounds {
        start: Sector,
        end: Sector,
        first: Sector,
        last: Sector,
    },

    #[error("Sectors {start}..{end} overlap partition #{other}")]
    Overlap { start: Sector, end: Sector, other: u32 },

    #[error("No free primary partition slot (maximum {0})")]
    NoFreeSlot(u32),

    #[error("An extended partition already exists")]
    ExtendedExists,

    #[error("Extended partitions are not supported on {0} tables")]
    ExtendedUnsupported(TableType),

    #[error("A logical partition requires an extended partition")]
    NoExtended,

    #[error("Sectors {start}..{end} are outside the extended partition")]
    OutsideExtended { start: Sector, end: Sector },

    #[error("Extended partition would no longer contain logical partition #{0}")]
    OrphanedLogical(u32),

    #[error("Extended partition still contains logical partitions")]
    ExtendedNotEmpty,

    #[error("Cannot add a table entry of kind {0:?}")]
    InvalidKind(PartitionKind),

    #[error("Flag {flag} is not available on {table} tables")]
    FlagUnavailable { flag: PartitionFlag, table: TableType },
}

/// One entry of a partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub number: u32,
    pub kind: PartitionKind,
    pub start: Sector,
    pub end: Sector,

    /// Type code without flag overrides (see [`TableEntry::effective_type_code`]).
    pub type_code: String,

    #[serde(default)]
    pub flags: BTreeSet<PartitionFlag>,

    /// GPT partition name.
    pub name: Option<String>,

    /// GPT partition UUID.
    pub uuid: Option<String>,
}

impl TableEntry {
    pub fn length(&self) -> Sector {
        self.end - self.start + 1
    }

    /// Type code as it must be written: a set type flag wins over the base
    /// type.
    pub fn effective_type_code(&self, table_type: TableType) -> String {
        self.flags
            .iter()
            .find_map(|flag| type_code_for_flag(table_type, *flag))
            .map(str::to_string)
            .unwrap_or_else(|| self.type_code.clone())
    }
}

/// Request for a new entry; the number is assigned by the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub kind: PartitionKind,
    pub start: Sector,
    pub end: Sector,
    pub type_code: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    pub table_type: TableType,
    pub sector_size: u64,
    pub first_usable: Sector,
    pub last_usable: Sector,

    /// Disk identifier (msdos signature or GPT disk GUID).
    pub disk_id: Option<String>,

    entries: Vec<TableEntry>,
}

impl PartitionTable {
    /// An empty table for a device of `length` sectors.
    pub fn new(table_type: TableType, sector_size: u64, length: Sector) -> Self {
        let (first_usable, last_usable) = match table_type {
            TableType::Msdos => (1, length.saturating_sub(1)),
            TableType::Gpt => {
                let array = GPT_ENTRIES_BYTES / sector_size.max(1);
                (2 + array, length.saturating_sub(2 + array))
            }
        };
        Self {
            table_type,
            sector_size,
            first_usable,
            last_usable,
            disk_id: None,
            entries: Vec::new(),
        }
    }

    /// Assemble a table read from disk. Entries are kept as given apart from
    /// ordering, no validation is applied.
    pub fn from_entries(
        table_type: TableType,
        sector_size: u64,
        first_usable: Sector,
        last_usable: Sector,
        mut entries: Vec<TableEntry>,
    ) -> Self {
        entries.sort_by_key(|e| (e.start, e.number));
        Self {
            table_type,
            sector_size,
            first_usable,
            last_usable,
            disk_id: None,
            entries,
        }
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn entry(&self, number: u32) -> Option<&TableEntry> {
        self.entries.iter().find(|e| e.number == number)
    }

    fn entry_mut(&mut self, number: u32) -> Result<&mut TableEntry, TableError> {
        self.entries
            .iter_mut()
            .find(|e| e.number == number)
            .ok_or(TableError::NotFound(number))
    }

    pub fn extended(&self) -> Option<&TableEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == PartitionKind::Extended)
    }

    pub fn logicals(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == PartitionKind::Logical)
    }

    pub fn max_primary(&self) -> u32 {
        self.table_type.max_primary()
    }

    /// Check that entry `number` (or a new entry when `None`) could occupy
    /// `start..=end`.
    pub fn validate(
        &self,
        number: Option<u32>,
        kind: PartitionKind,
        start: Sector,
        end: Sector,
    ) -> Result<(), TableError> {
        if start > end {
            return Err(TableError::InvalidGeometry { start, end });
        }
        if start < self.first_usable || end > self.last_usable {
            return Err(TableError::OutOfBounds {
                start,
                end,
                first: self.first_usable,
                last: self.last_usable,
            });
        }

        let others = self.entries.iter().filter(|e| Some(e.number) != number);
        match kind {
            PartitionKind::Primary | PartitionKind::Extended => {
                for other in others.filter(|e| e.kind != PartitionKind::Logical) {
                    if start <= other.end && other.start <= end {
                        return Err(TableError::Overlap {
                            start,
                            end,
                            other: other.number,
                        });
                    }
                }
                if kind == PartitionKind::Extended {
                    // Every logical needs its EBR sector inside the container.
                    for logical in self.logicals() {
                        if logical.start <= start || logical.end > end {
                            return Err(TableError::OrphanedLogical(logical.number));
                        }
                    }
                }
            }
            PartitionKind::Logical => {
                let extended = self.extended().ok_or(TableError::NoExtended)?;
                if start <= extended.start || end > extended.end {
                    return Err(TableError::OutsideExtended { start, end });
                }
                // The sector before each logical holds its EBR.
                for other in others.filter(|e| e.kind == PartitionKind::Logical) {
                    if start - 1 <= other.end && other.start - 1 <= end {
                        return Err(TableError::Overlap {
                            start,
                            end,
                            other: other.number,
                        });
                    }
                }
            }
            PartitionKind::Unallocated => return Err(TableError::InvalidKind(kind)),
        }
        Ok(())
    }

    /// Clamp `start..=end` to what entry `number` may occupy and validate the
    /// result. The range only ever shrinks. Nothing is modified.
    pub fn constrain(
        &self,
        number: Option<u32>,
        kind: PartitionKind,
        start: Sector,
        end: Sector,
    ) -> Result<(Sector, Sector), TableError> {
        let (mut first, mut last) = (self.first_usable, self.last_usable);
        if kind == PartitionKind::Logical {
            let extended = self.extended().ok_or(TableError::NoExtended)?;
            first = first.max(extended.start + 1);
            last = last.min(extended.end);
        }
        let start = start.max(first);
        let end = end.min(last);
        self.validate(number, kind, start, end)?;
        Ok((start, end))
    }

    /// Add an entry with exactly the requested geometry and return its
    /// number.
    pub fn add(&mut self, request: NewEntry) -> Result<u32, TableError> {
        let number = match request.kind {
            PartitionKind::Primary | PartitionKind::Extended => {
                if request.kind == PartitionKind::Extended {
                    if !self.table_type.supports_extended() {
                        return Err(TableError::ExtendedUnsupported(self.table_type));
                    }
                    if self.extended().is_some() {
                        return Err(TableError::ExtendedExists);
                    }
                }
                self.free_primary_slot()
                    .ok_or(TableError::NoFreeSlot(self.max_primary()))?
            }
            PartitionKind::Logical => {
                if !self.table_type.supports_extended() {
                    return Err(TableError::ExtendedUnsupported(self.table_type));
                }
                // Placeholder, fixed up by renumbering.
                u32::MAX
            }
            PartitionKind::Unallocated => return Err(TableError::InvalidKind(request.kind)),
        };

        self.validate(None, request.kind, request.start, request.end)?;

        self.entries.push(TableEntry {
            number,
            kind: request.kind,
            start: request.start,
            end: request.end,
            type_code: normalize_type_code(self.table_type, &request.type_code),
            flags: BTreeSet::new(),
            name: request.name,
            uuid: None,
        });
        self.entries.sort_by_key(|e| (e.start, e.number));

        if request.kind == PartitionKind::Logical {
            self.renumber_logicals();
            return self
                .entries
                .iter()
                .find(|e| e.kind == PartitionKind::Logical && e.start == request.start)
                .map(|e| e.number)
                .ok_or(TableError::InvalidGeometry {
                    start: request.start,
                    end: request.end,
                });
        }
        Ok(number)
    }

    /// Remove an entry. Logical partitions after it move down one number,
    /// the way the kernel numbers the EBR chain.
    pub fn remove(&mut self, number: u32) -> Result<TableEntry, TableError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.number == number)
            .ok_or(TableError::NotFound(number))?;
        if self.entries[index].kind == PartitionKind::Extended && self.logicals().next().is_some() {
            return Err(TableError::ExtendedNotEmpty);
        }
        let removed = self.entries.remove(index);
        if removed.kind == PartitionKind::Logical {
            self.renumber_logicals();
        }
        Ok(removed)
    }

    /// Move entry `number` to exactly `start..=end`.
    pub fn set_geometry(&mut self, number: u32, start: Sector, end: Sector) -> Result<(), TableError> {
        let kind = self
            .entry(number)
            .map(|e| e.kind)
            .ok_or(TableError::NotFound(number))?;
        self.validate(Some(number), kind, start, end)?;
        let entry = self.entry_mut(number)?;
        entry.start = start;
        entry.end = end;
        self.entries.sort_by_key(|e| (e.start, e.number));
        Ok(())
    }

    pub fn set_flag(&mut self, number: u32, flag: PartitionFlag, state: bool) -> Result<(), TableError> {
        let table_type = self.table_type;
        if !PartitionFlag::available_flags(table_type).contains(&flag) {
            return Err(TableError::FlagUnavailable {
                flag,
                table: table_type,
            });
        }
        let entry = self.entry_mut(number)?;

        // On gpt `boot` and `esp` are the same type GUID.
        let linked: Vec<PartitionFlag> = match (table_type, flag) {
            (TableType::Gpt, PartitionFlag::Boot | PartitionFlag::Esp) => {
                vec![PartitionFlag::Boot, PartitionFlag::Esp]
            }
            _ => vec![flag],
        };

        if state {
            if flag.is_type_flag(table_type) {
                entry.flags.retain(|f| !f.is_type_flag(table_type));
            }
            entry.flags.extend(linked);
        } else {
            for f in linked {
                entry.flags.remove(&f);
            }
        }
        Ok(())
    }

    pub fn set_type(&mut self, number: u32, type_code: &str) -> Result<(), TableError> {
        let code = normalize_type_code(self.table_type, type_code);
        self.entry_mut(number)?.type_code = code;
        Ok(())
    }

    pub fn set_name(&mut self, number: u32, name: Option<String>) -> Result<(), TableError> {
        self.entry_mut(number)?.name = name;
        Ok(())
    }

    fn free_primary_slot(&self) -> Option<u32> {
        let used: BTreeSet<u32> = self
            .entries
            .iter()
            .filter(|e| e.kind != PartitionKind::Logical)
            .map(|e| e.number)
            .collect();
        (1..=self.max_primary()).find(|n| !used.contains(n))
    }

    fn renumber_logicals(&mut self) {
        let mut next = FIRST_LOGICAL;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.kind == PartitionKind::Logical)
        {
            entry.number = next;
            next += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: PartitionKind, start: Sector, end: Sector) -> NewEntry {
        NewEntry {
            kind,
            start,
            end,
            type_code: "83".to_string(),
            name: None,
        }
    }

    fn msdos() -> PartitionTable {
        PartitionTable::new(TableType::Msdos, 512, 1_000_000)
    }

    #[test]
    fn gpt_reserves_entry_arrays() {
        let table = PartitionTable::new(TableType::Gpt, 512, 1_000_000);
        assert_eq!(table.first_usable, 34);
        assert_eq!(table.last_usable, 1_000_000 - 34);
    }

    #[test]
    fn add_assigns_lowest_free_primary_slot() {
        let mut table = msdos();
        assert_eq!(table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap(), 1);
        assert_eq!(table.add(entry(PartitionKind::Primary, 8192, 9999)).unwrap(), 2);
        table.remove(1).unwrap();
        assert_eq!(table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap(), 1);
    }

    #[test]
    fn add_rejects_overlap() {
        let mut table = msdos();
        table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap();
        let err = table.add(entry(PartitionKind::Primary, 4095, 8191)).unwrap_err();
        assert_eq!(
            err,
            TableError::Overlap {
                start: 4095,
                end: 8191,
                other: 1
            }
        );
    }

    #[test]
    fn msdos_allows_only_four_primaries() {
        let mut table = msdos();
        for i in 0..4 {
            table
                .add(entry(PartitionKind::Primary, 2048 + i * 2048, 4095 + i * 2048))
                .unwrap();
        }
        let err = table.add(entry(PartitionKind::Primary, 20480, 30000)).unwrap_err();
        assert_eq!(err, TableError::NoFreeSlot(4));
    }

    #[test]
    fn logicals_are_renumbered_by_position() {
        let mut table = msdos();
        table.add(entry(PartitionKind::Extended, 2048, 99_999)).unwrap();
        assert_eq!(table.add(entry(PartitionKind::Logical, 40_960, 59_999)).unwrap(), 5);
        assert_eq!(table.add(entry(PartitionKind::Logical, 4096, 20_479)).unwrap(), 5);
        assert_eq!(table.entry(6).unwrap().start, 40_960);

        table.remove(5).unwrap();
        assert_eq!(table.entry(5).unwrap().start, 40_960);
        assert!(table.entry(6).is_none());
    }

    #[test]
    fn logical_needs_room_for_its_ebr() {
        let mut table = msdos();
        table.add(entry(PartitionKind::Extended, 2048, 99_999)).unwrap();
        let err = table.add(entry(PartitionKind::Logical, 2048, 4095)).unwrap_err();
        assert!(matches!(err, TableError::OutsideExtended { .. }));

        table.add(entry(PartitionKind::Logical, 4096, 8191)).unwrap();
        let err = table.add(entry(PartitionKind::Logical, 8192, 9999)).unwrap_err();
        assert!(matches!(err, TableError::Overlap { other: 5, .. }));
        table.add(entry(PartitionKind::Logical, 8193, 9999)).unwrap();
    }

    #[test]
    fn extended_must_keep_its_logicals() {
        let mut table = msdos();
        let ext = table.add(entry(PartitionKind::Extended, 2048, 99_999)).unwrap();
        table.add(entry(PartitionKind::Logical, 50_000, 60_000)).unwrap();
        assert_eq!(
            table.set_geometry(ext, 2048, 55_000).unwrap_err(),
            TableError::OrphanedLogical(5)
        );
        assert_eq!(table.remove(ext).unwrap_err(), TableError::ExtendedNotEmpty);
        table.set_geometry(ext, 2048, 60_000).unwrap();
    }

    #[test]
    fn extended_rejected_on_gpt() {
        let mut table = PartitionTable::new(TableType::Gpt, 512, 1_000_000);
        let err = table.add(entry(PartitionKind::Extended, 2048, 9999)).unwrap_err();
        assert_eq!(err, TableError::ExtendedUnsupported(TableType::Gpt));
    }

    #[test]
    fn constrain_clamps_without_mutating() {
        let mut table = PartitionTable::new(TableType::Gpt, 512, 100_000);
        table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap();
        let (start, end) = table
            .constrain(Some(1), PartitionKind::Primary, 0, 200_000)
            .unwrap();
        assert_eq!((start, end), (34, 100_000 - 34));
        assert_eq!(table.entry(1).unwrap().start, 2048);
    }

    #[test]
    fn type_flags_are_exclusive() {
        let mut table = msdos();
        table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap();
        table.set_flag(1, PartitionFlag::Lvm, true).unwrap();
        table.set_flag(1, PartitionFlag::Raid, true).unwrap();
        table.set_flag(1, PartitionFlag::Boot, true).unwrap();
        let e = table.entry(1).unwrap();
        assert!(!e.flags.contains(&PartitionFlag::Lvm));
        assert!(e.flags.contains(&PartitionFlag::Raid));
        assert!(e.flags.contains(&PartitionFlag::Boot));
        assert_eq!(e.effective_type_code(TableType::Msdos), "fd");

        table.set_flag(1, PartitionFlag::Raid, false).unwrap();
        assert_eq!(table.entry(1).unwrap().effective_type_code(TableType::Msdos), "83");
    }

    #[test]
    fn gpt_boot_and_esp_toggle_together() {
        let mut table = PartitionTable::new(TableType::Gpt, 512, 100_000);
        table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap();
        table.set_flag(1, PartitionFlag::Boot, true).unwrap();
        assert!(table.entry(1).unwrap().flags.contains(&PartitionFlag::Esp));
        table.set_flag(1, PartitionFlag::Esp, false).unwrap();
        assert!(table.entry(1).unwrap().flags.is_empty());
    }

    #[test]
    fn unavailable_flag_is_rejected() {
        let mut table = msdos();
        table.add(entry(PartitionKind::Primary, 2048, 4095)).unwrap();
        assert!(matches!(
            table.set_flag(1, PartitionFlag::BiosGrub, true),
            Err(TableError::FlagUnavailable { .. })
        ));
    }
}
