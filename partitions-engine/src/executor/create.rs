// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::Result;
use partitions_types::{FsAction, FsKind, NewEntry, OperationDetail, Partition, PartitionStatus, type_code_for_fs};

use super::{Context, geometry_lines, step};
use crate::geometry;

pub(super) fn create(ctx: &mut Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let fs = partition.fs;
    let driver = if fs.is_filesystem() {
        ctx.ensure_size(fs, partition)?;
        Some(ctx.driver(fs, FsAction::Create)?)
    } else {
        None
    };

    let created = create_partition(ctx, partition, fs, detail)?;
    if created.is_extended() {
        return Ok(());
    }
    ctx.erase_signatures(&created, detail)?;
    match driver {
        Some(driver) => step(detail, format!("create new {} file system", fs), |step| {
            driver.create(&created, step)
        }),
        None => Ok(()),
    }
}

/// Add a table entry for `partition`, aligned to its policy and clamped to
/// what the table allows, and commit it. The type code is chosen for
/// `type_fs`. Returns the partition as written.
pub(super) fn create_partition(
    ctx: &mut Context<'_>,
    partition: &Partition,
    type_fs: FsKind,
    detail: &mut OperationDetail,
) -> Result<Partition> {
    step(detail, "create empty partition", |step| {
        let aligned = geometry::snap_to_alignment(&ctx.layout(), partition)?;
        let table = ctx.table()?;
        let table_type = table.table_type;
        let (start, end) = table.constrain(None, aligned.kind, aligned.sector_start, aligned.sector_end)?;
        let type_fs = if aligned.is_extended() {
            FsKind::Extended
        } else {
            type_fs
        };

        let number = ctx.table_mut()?.add(NewEntry {
            kind: aligned.kind,
            start,
            end,
            type_code: type_code_for_fs(table_type, type_fs).to_string(),
            name: None,
        })?;
        ctx.commit()?;

        let device_path = ctx.device_path();
        let mut created = aligned;
        created.number = Some(number);
        created.sector_start = start;
        created.sector_end = end;
        created.status = PartitionStatus::Real;
        created.path = ctx.backend.partition_path(&device_path, number);
        step.add_output(format!("path: {}", created.path));
        geometry_lines(step, "", &created);
        Ok(created)
    })
}
