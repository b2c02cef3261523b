// SPDX-License-Identifier: GPL-3.0-only

//! Device layout as seen by the planner
//!
//! Turns the raw table of an open [`DiskSession`] into the ordered
//! [`Partition`] sequence of a [`Device`]: one entry per table entry, the
//! logicals nested inside their extended partition, and synthetic
//! unallocated entries filling every gap. Nothing here is cached; callers
//! re-read after every commit.

use partitions_contracts::{DiskBackend, DiskSession, Result};
use partitions_types::{
    Device, FsAction, FsKind, Partition, PartitionKind, PartitionTable, Sector, TableEntry,
    flag_for_type_code, fs_hint_for_type_code,
};

use crate::registry::Registry;

const PROC_MOUNTS: &str = "/proc/mounts";
const PROC_SWAPS: &str = "/proc/swaps";

/// Layout of the device behind `session`, without filesystem usage.
pub fn layout(session: &dyn DiskSession, backend: &dyn DiskBackend) -> Device {
    let geometry = session.geometry().clone();
    let path = geometry.path.clone();
    let sector_size = geometry.sector_size;

    let Some(table) = session.table() else {
        let last = geometry.length.saturating_sub(1);
        return Device {
            partitions: vec![Partition::new_unallocated(&path, 0, last, sector_size, false)],
            geometry,
            table_type: None,
            max_primary: 0,
            first_usable: 0,
            last_usable: last,
        };
    };

    let active = active_nodes();
    let mut partitions = Vec::new();
    let mut extended: Option<Partition> = None;
    for entry in table.entries() {
        let mut partition = from_entry(session, backend, table, entry);
        partition.busy = in_use(backend, &active, &partition.path);
        match entry.kind {
            PartitionKind::Logical => {
                if let Some(ext) = extended.as_mut() {
                    ext.logicals.push(partition);
                }
            }
            PartitionKind::Extended => extended = Some(partition),
            _ => partitions.push(partition),
        }
    }
    if let Some(mut ext) = extended {
        let logicals = std::mem::take(&mut ext.logicals);
        ext.busy = logicals.iter().any(|l| l.busy);
        // The first sector holds the extended boot record.
        ext.logicals = fill_gaps(&path, sector_size, logicals, ext.sector_start + 1, ext.sector_end, true);
        partitions.push(ext);
    }
    partitions.sort_by_key(|p| p.sector_start);

    Device {
        partitions: fill_gaps(
            &path,
            sector_size,
            partitions,
            table.first_usable,
            table.last_usable,
            false,
        ),
        geometry,
        table_type: Some(table.table_type),
        max_primary: table.max_primary(),
        first_usable: table.first_usable,
        last_usable: table.last_usable,
    }
}

/// Full layout with filesystem usage, labels and UUIDs.
pub fn read(session: &dyn DiskSession, backend: &dyn DiskBackend, registry: &Registry) -> Device {
    let mut device = layout(session, backend);
    for partition in device.partitions.iter_mut() {
        read_usage(registry, partition);
        for logical in partition.logicals.iter_mut() {
            read_usage(registry, logical);
        }
    }
    device
}

/// Describe one table entry, probing the signature in its range.
pub fn from_entry(
    session: &dyn DiskSession,
    backend: &dyn DiskBackend,
    table: &PartitionTable,
    entry: &TableEntry,
) -> Partition {
    let device_path = session.geometry().path.clone();
    let mut fs = fs_hint_for_type_code(table.table_type, &entry.type_code);
    let mut label = None;
    let mut uuid = None;
    let mut messages = Vec::new();

    if entry.kind == PartitionKind::Extended {
        fs = FsKind::Extended;
    } else {
        match session.probe_filesystem(entry.start, entry.length()) {
            Ok(probe) => {
                if let Some(kind) = probe.kind {
                    fs = kind;
                }
                label = probe.label;
                uuid = probe.uuid;
            }
            Err(e) => messages.push(e.to_string()),
        }
    }

    let mut partition = Partition::new(
        &device_path,
        entry.number,
        entry.kind,
        fs,
        entry.start,
        entry.end,
        table.sector_size,
    )
    .with_path(backend.partition_path(&device_path, entry.number));
    partition.label = label;
    partition.uuid = uuid;
    partition.flags = entry.flags.clone();
    partition
        .flags
        .extend(flag_for_type_code(table.table_type, &entry.type_code));
    partition.messages = messages;
    partition
}

/// Ask the registered driver for usage, and for label and UUID when the
/// signature probe did not provide them. Failures become messages.
pub fn read_usage(registry: &Registry, partition: &mut Partition) {
    if !partition.fs.is_filesystem() {
        return;
    }
    if let Ok(driver) = registry.lookup(partition.fs, FsAction::Read) {
        if let Err(e) = driver.set_used_sectors(partition) {
            partition.messages.push(e.to_string());
        }
    }
    if partition.label.is_none() {
        if let Ok(driver) = registry.lookup(partition.fs, FsAction::ReadLabel) {
            if let Err(e) = driver.read_label(partition) {
                partition.messages.push(e.to_string());
            }
        }
    }
    if partition.uuid.is_none() {
        if let Ok(driver) = registry.lookup(partition.fs, FsAction::ReadUuid) {
            if let Err(e) = driver.read_uuid(partition) {
                partition.messages.push(e.to_string());
            }
        }
    }
}

/// Insert an unallocated entry for every uncovered range of
/// `first..=last`. `partitions` must be sorted by start.
fn fill_gaps(
    device_path: &str,
    sector_size: u64,
    partitions: Vec<Partition>,
    first: Sector,
    last: Sector,
    inside_extended: bool,
) -> Vec<Partition> {
    let mut filled = Vec::with_capacity(partitions.len() * 2 + 1);
    let mut next = first;
    for partition in partitions {
        if partition.sector_start > next {
            filled.push(Partition::new_unallocated(
                device_path,
                next,
                partition.sector_start - 1,
                sector_size,
                inside_extended,
            ));
        }
        next = next.max(partition.sector_end + 1);
        filled.push(partition);
    }
    if next <= last {
        filled.push(Partition::new_unallocated(
            device_path,
            next,
            last,
            sector_size,
            inside_extended,
        ));
    }
    filled
}

/// True when `path` is mounted, used as swap, or held by a stacked device
/// such as an open dm-crypt mapping.
pub(crate) fn is_busy(backend: &dyn DiskBackend, path: &str) -> bool {
    in_use(backend, &active_nodes(), path)
}

fn in_use(backend: &dyn DiskBackend, active: &[String], path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if active.iter().any(|node| node == path) {
        return true;
    }
    let holders = backend.holders(path);
    if !holders.is_empty() {
        tracing::debug!("{} is held by {}", path, holders.join(", "));
        return true;
    }
    false
}

/// Device nodes that are mounted or used as swap.
fn active_nodes() -> Vec<String> {
    let mut nodes = Vec::new();
    for (file, skip) in [(PROC_MOUNTS, 0), (PROC_SWAPS, 1)] {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        nodes.extend(
            content
                .lines()
                .skip(skip)
                .filter_map(|line| line.split_whitespace().next())
                .filter(|node| node.starts_with('/'))
                .map(str::to_string),
        );
    }
    nodes
}

/// Partitions inside an open LUKS container, read from its mapping.
///
/// `None` when `partition` is not a container or is not open. The result is
/// derived fresh on every call.
#[cfg(feature = "fs-luks")]
pub fn contained_partitions(
    backend: &dyn DiskBackend,
    registry: &Registry,
    partition: &Partition,
) -> Result<Option<Vec<Partition>>> {
    if partition.fs != FsKind::Luks {
        return Ok(None);
    }
    let mut probe = partition.clone();
    let Some(mapping) = crate::filesystems::luks::mapping(&mut probe)? else {
        return Ok(None);
    };
    let session = backend.open(&mapping.mapper_path())?;
    let inner = read(session.as_ref(), backend, registry);
    Ok(Some(inner.partitions))
}

#[cfg(not(feature = "fs-luks"))]
pub fn contained_partitions(
    _backend: &dyn DiskBackend,
    _registry: &Registry,
    _partition: &Partition,
) -> Result<Option<Vec<Partition>>> {
    Ok(None)
}
