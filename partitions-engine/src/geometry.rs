// SPDX-License-Identifier: GPL-3.0-only

//! Partition boundary alignment
//!
//! Pure functions of a [`Device`] layout and a candidate [`Partition`]. The
//! input is never modified; a snapped copy is returned or the request is
//! refused with `AlignmentImpossible` or `Overlap`.

use partitions_contracts::{EngineError, Result};
use partitions_types::{Alignment, Device, Partition, PartitionKind, PartitionStatus, TableType};

/// Sectors the kernel reserves for an EBR (it assumes two, to leave room
/// for a boot loader).
const EBR_SECTORS: i64 = 2;

/// Snap `partition` to the policy it carries and check the result against
/// the device and its neighbours.
pub fn snap_to_alignment(device: &Device, partition: &Partition) -> Result<Partition> {
    let snapped = match partition.alignment {
        Alignment::Cylinder => snap_to_cylinder(device, partition)?,
        Alignment::Mebibyte => snap_to_mebibyte(device, partition)?,
        Alignment::Optimal => snap_to_optimal(device, partition)?,
        Alignment::Strict => partition.clone(),
    };
    tracing::debug!(
        "Aligned {} ({:?}): {}..{} -> {}..{}",
        partition.display_path(),
        partition.alignment,
        partition.sector_start,
        partition.sector_end,
        snapped.sector_start,
        snapped.sector_end
    );
    check_fits(device, &snapped)?;
    check_overlap(device, &snapped)?;
    Ok(snapped)
}

/// Round to whole cylinders (heads × sectors per track).
pub fn snap_to_cylinder(device: &Device, partition: &Partition) -> Result<Partition> {
    let cylsize = device.cylsize() as i64;
    let track = device.geometry.sectors as i64;
    let mut start = partition.sector_start as i64;
    let mut end = partition.sector_end as i64;
    let less_than_half_cylinder = end - start < cylsize / 2;

    // Logicals and the first primary start one track after their boot
    // record, as does the first partition after a GPT header.
    let diff = if partition.kind == PartitionKind::Logical || start == track {
        (start - track).rem_euclid(cylsize)
    } else if start == 34 {
        (start - 34).rem_euclid(cylsize)
    } else {
        start.rem_euclid(cylsize)
    };
    if diff != 0 && !partition.strict_start {
        if diff < cylsize / 2 || less_than_half_cylinder {
            start -= diff;
        } else {
            start += cylsize - diff;
        }
    }

    let diff = (end + 1).rem_euclid(cylsize);
    if diff != 0 {
        if diff < cylsize / 2 && !less_than_half_cylinder {
            end -= diff;
        } else {
            end += cylsize - diff;
        }
    }

    if start < device.first_usable as i64 && !partition.strict_start {
        start += cylsize;
    }
    if end > device.last_usable as i64 {
        end -= cylsize;
    }
    bounded(partition, start, end)
}

/// Round to 1 MiB boundaries.
pub fn snap_to_mebibyte(device: &Device, partition: &Partition) -> Result<Partition> {
    let grain = device.geometry.mebibyte_sectors() as i64;
    snap_to_grain(device, partition, grain, 0)
}

/// Round to the device-reported optimal I/O alignment.
pub fn snap_to_optimal(device: &Device, partition: &Partition) -> Result<Partition> {
    let (grain, offset) = device.geometry.optimal_alignment();
    snap_to_grain(device, partition, grain as i64, offset as i64)
}

fn snap_to_grain(device: &Device, partition: &Partition, grain: i64, offset: i64) -> Result<Partition> {
    let mut start = partition.sector_start as i64;
    let mut end = partition.sector_end as i64;
    let logicals = || {
        device
            .extended()
            .into_iter()
            .flat_map(|e| e.logicals.iter())
            .filter(|l| l.kind == PartitionKind::Logical)
    };

    // Room for the MBR or the EBR in front of the partition.
    if (start < EBR_SECTORS || partition.kind == PartitionKind::Logical)
        && !partition.strict_start
        && partition.status != PartitionStatus::Formatted
    {
        start += EBR_SECTORS;
    }

    let diff = (start - offset).rem_euclid(grain);
    let may_move_start = !partition.strict_start
        || matches!(partition.status, PartitionStatus::New | PartitionStatus::Copy);
    if diff != 0 && may_move_start {
        start += grain - diff;
        if partition.kind == PartitionKind::Extended
            && logicals().any(|l| (l.sector_start as i64) - start < EBR_SECTORS)
        {
            start -= grain;
        }
    }

    let diff = (end + 1 - offset).rem_euclid(grain);
    if diff != 0 {
        end -= diff;
    }

    if partition.kind == PartitionKind::Logical {
        // Leave room for the EBR of a following logical.
        if logicals().any(|l| {
            let next = l.sector_start as i64;
            l.number != partition.number && next > end && next - end < EBR_SECTORS
        }) {
            end -= grain;
        }
        if let Some(extended) = device.extended() {
            if end > extended.sector_end as i64 {
                end -= grain;
            }
        }
    }

    if matches!(partition.kind, PartitionKind::Primary | PartitionKind::Extended)
        && partition.status == PartitionStatus::Real
    {
        for other in device.partitions.iter().filter(|p| {
            matches!(p.kind, PartitionKind::Primary | PartitionKind::Extended)
                && p.number != partition.number
        }) {
            let other_start = other.sector_start as i64;
            if other_start > start && other_start <= end {
                end -= grain;
            }
        }
    }

    if partition.kind == PartitionKind::Extended {
        for logical in partition.logicals.iter().filter(|l| l.kind == PartitionKind::Logical) {
            end = end.max(logical.sector_end as i64);
        }
    }

    // Backup GPT header and entries.
    if device.table_type == Some(TableType::Gpt) {
        while end > device.last_usable as i64 {
            end -= grain;
        }
    } else if end > device.last_usable as i64 {
        end -= grain;
    }

    bounded(partition, start, end)
}

fn bounded(partition: &Partition, start: i64, end: i64) -> Result<Partition> {
    let length = end - start + 1;
    if start < 0 || length <= 0 {
        return Err(EngineError::AlignmentImpossible(format!(
            "A partition cannot have a length of {} sectors",
            length
        )));
    }
    let mut snapped = partition.clone();
    snapped.sector_start = start as u64;
    snapped.sector_end = end as u64;
    Ok(snapped)
}

fn check_fits(device: &Device, partition: &Partition) -> Result<()> {
    if partition.sector_end < partition.sector_start {
        return Err(EngineError::AlignmentImpossible(format!(
            "A partition cannot have a length of {} sectors",
            partition.sector_end as i64 - partition.sector_start as i64 + 1
        )));
    }
    if partition.sector_start < device.first_usable || partition.sector_end > device.last_usable {
        return Err(EngineError::AlignmentImpossible(format!(
            "Sectors {}..{} are outside the usable range {}..{} of {}",
            partition.sector_start,
            partition.sector_end,
            device.first_usable,
            device.last_usable,
            device.path()
        )));
    }
    if let Some(used) = partition.sectors_used {
        if partition.sector_length() < used {
            return Err(EngineError::AlignmentImpossible(format!(
                "A partition with used sectors ({}) greater than its length ({}) is not valid",
                used,
                partition.sector_length()
            )));
        }
    }
    if partition.kind == PartitionKind::Logical {
        let inside = device
            .extended()
            .is_some_and(|e| partition.sector_start > e.sector_start && partition.sector_end <= e.sector_end);
        if !inside {
            return Err(EngineError::AlignmentImpossible(format!(
                "Logical partition {}..{} does not fit inside the extended partition",
                partition.sector_start, partition.sector_end
            )));
        }
    }
    Ok(())
}

fn check_overlap(device: &Device, partition: &Partition) -> Result<()> {
    let same = |other: &Partition| partition.number.is_some() && other.number == partition.number;
    let collides = |other: &Partition| match partition.kind {
        PartitionKind::Logical => {
            other.kind == PartitionKind::Logical
                && partition.sector_start - 1 <= other.sector_end
                && other.sector_start.saturating_sub(1) <= partition.sector_end
        }
        _ => {
            matches!(other.kind, PartitionKind::Primary | PartitionKind::Extended)
                && partition.overlaps(other)
        }
    };
    match device.all_partitions().find(|other| !same(other) && collides(other)) {
        Some(other) => Err(EngineError::Overlap(format!(
            "{} ({}..{}) would overlap {}",
            partition.display_path(),
            partition.sector_start,
            partition.sector_end,
            other
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partitions_types::{DeviceGeometry, FsKind};

    const DEV: &str = "/dev/sdx";

    fn device(table_type: TableType, length: u64, partitions: Vec<Partition>) -> Device {
        let geometry = DeviceGeometry::new(DEV, 512, length);
        let (first_usable, last_usable) = match table_type {
            TableType::Msdos => (1, length - 1),
            TableType::Gpt => (34, length - 34),
        };
        Device {
            geometry,
            table_type: Some(table_type),
            max_primary: table_type.max_primary(),
            first_usable,
            last_usable,
            partitions,
        }
    }

    fn part(number: u32, kind: PartitionKind, start: u64, end: u64) -> Partition {
        Partition::new(DEV, number, kind, FsKind::Ext4, start, end, 512)
    }

    fn planned(kind: PartitionKind, start: u64, end: u64, alignment: Alignment) -> Partition {
        let mut p = Partition::new(DEV, 0, kind, FsKind::Ext4, start, end, 512);
        p.number = None;
        p.status = PartitionStatus::New;
        p.alignment = alignment;
        p
    }

    #[test]
    fn new_partition_at_disk_start_moves_to_first_mebibyte() {
        let dev = device(TableType::Msdos, 409_600, vec![]);
        let snapped =
            snap_to_alignment(&dev, &planned(PartitionKind::Primary, 1, 204_799, Alignment::Mebibyte)).unwrap();
        assert_eq!((snapped.sector_start, snapped.sector_end), (2048, 204_799));
    }

    #[test]
    fn mebibyte_end_rounds_down() {
        let dev = device(TableType::Msdos, 409_600, vec![]);
        let snapped =
            snap_to_alignment(&dev, &planned(PartitionKind::Primary, 2048, 104_857, Alignment::Mebibyte)).unwrap();
        assert_eq!(snapped.sector_end, 104_447);
        assert_eq!((snapped.sector_end + 1) % 2048, 0);
    }

    #[test]
    fn strict_keeps_boundaries() {
        let dev = device(TableType::Msdos, 409_600, vec![]);
        let request = planned(PartitionKind::Primary, 2048, 104_857, Alignment::Strict);
        assert_eq!(snap_to_alignment(&dev, &request).unwrap(), request);
    }

    #[test]
    fn logical_reserves_room_for_its_ebr() {
        let mut extended = part(2, PartitionKind::Extended, 204_800, 409_599);
        extended.logicals.push(part(5, PartitionKind::Logical, 206_848, 307_199));
        let dev = device(TableType::Msdos, 409_600, vec![extended]);

        let request = planned(PartitionKind::Logical, 307_200, 409_599, Alignment::Mebibyte);
        let snapped = snap_to_alignment(&dev, &request).unwrap();
        assert_eq!(snapped.sector_start, 309_248);
        assert_eq!(snapped.sector_end, 409_599);
    }

    #[test]
    fn gpt_keeps_clear_of_the_backup_header() {
        let dev = device(TableType::Gpt, 409_600, vec![]);
        let snapped =
            snap_to_alignment(&dev, &planned(PartitionKind::Primary, 34, 409_599, Alignment::Mebibyte)).unwrap();
        assert_eq!(snapped.sector_start, 2048);
        assert_eq!(snapped.sector_end, 407_551);
    }

    #[test]
    fn resize_of_existing_partition_stops_before_next_primary() {
        let first = part(1, PartitionKind::Primary, 2048, 104_447);
        let second = part(2, PartitionKind::Primary, 204_800, 409_599);
        let dev = device(TableType::Msdos, 409_600, vec![first.clone(), second]);

        let mut grown = first.clone();
        grown.alignment = Alignment::Mebibyte;
        grown.strict_start = true;
        grown.sector_end = 206_847;
        let snapped = snap_to_alignment(&dev, &grown).unwrap();
        assert_eq!(snapped.sector_end, 204_799);
    }

    #[test]
    fn overlap_with_neighbour_is_refused() {
        let dev = device(
            TableType::Msdos,
            409_600,
            vec![part(1, PartitionKind::Primary, 2048, 204_799)],
        );
        let request = planned(PartitionKind::Primary, 100_000, 300_000, Alignment::Strict);
        assert!(matches!(
            snap_to_alignment(&dev, &request),
            Err(EngineError::Overlap(_))
        ));
    }

    #[test]
    fn too_small_for_used_sectors_is_impossible() {
        let dev = device(TableType::Msdos, 409_600, vec![]);
        let mut request = planned(PartitionKind::Primary, 2048, 4095, Alignment::Strict);
        request.sectors_used = Some(5000);
        assert!(matches!(
            snap_to_alignment(&dev, &request),
            Err(EngineError::AlignmentImpossible(_))
        ));
    }

    #[test]
    fn region_smaller_than_a_mebibyte_cannot_align() {
        let dev = device(TableType::Msdos, 409_600, vec![]);
        let request = planned(PartitionKind::Primary, 2100, 3000, Alignment::Mebibyte);
        assert!(matches!(
            snap_to_alignment(&dev, &request),
            Err(EngineError::AlignmentImpossible(_))
        ));
    }

    #[test]
    fn cylinder_rounds_to_whole_cylinders() {
        let dev = device(TableType::Msdos, 16_065 * 20, vec![]);
        let request = planned(PartitionKind::Primary, 63, 16_065 * 5 + 100, Alignment::Cylinder);
        let snapped = snap_to_alignment(&dev, &request).unwrap();
        assert_eq!(snapped.sector_start, 63);
        assert_eq!((snapped.sector_end + 1) % 16_065, 0);
    }

    #[test]
    fn optimal_uses_reported_io_size() {
        let mut dev = device(TableType::Gpt, 1_000_000, vec![]);
        dev.geometry.optimal_io_size = 3 * 512 * 1024;
        let request = planned(PartitionKind::Primary, 34, 900_000, Alignment::Optimal);
        let snapped = snap_to_alignment(&dev, &request).unwrap();
        assert_eq!(snapped.sector_start % 3072, 0);
        assert_eq!((snapped.sector_end + 1) % 3072, 0);
    }

    #[test]
    fn mebibyte_results_are_aligned_or_refused() {
        let dev = device(
            TableType::Msdos,
            2_000_000,
            vec![part(1, PartitionKind::Primary, 1_000_000, 1_499_999)],
        );
        for start in (1..600_000u64).step_by(37_813) {
            for len in [1u64, 1000, 2047, 2048, 50_001, 700_000] {
                let mut request =
                    planned(PartitionKind::Primary, start, start + len - 1, Alignment::Mebibyte);
                request.sectors_used = Some(len / 4);
                match snap_to_alignment(&dev, &request) {
                    Ok(p) => {
                        assert_eq!(p.sector_start % 2048, 0);
                        assert_eq!((p.sector_end + 1) % 2048, 0);
                        assert!(p.sector_length() >= len / 4);
                        assert!(p.sector_end < 1_000_000 || p.sector_start > 1_499_999);
                    }
                    Err(EngineError::AlignmentImpossible(_)) | Err(EngineError::Overlap(_)) => {}
                    Err(other) => panic!("unexpected error {other}"),
                }
                assert_eq!(request.sector_start, start);
            }
        }
    }
}
