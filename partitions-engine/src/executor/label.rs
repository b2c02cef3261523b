// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::Result;
use partitions_types::{FsAction, OperationDetail, Partition};

use super::{Context, step};

/// Write `partition.label`; an empty or missing label clears it.
pub(super) fn write_label(ctx: &mut Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let driver = ctx.driver(partition.fs, FsAction::WriteLabel)?;
    let mut target = ctx.calibrate(partition, detail)?;
    target.fs = partition.fs;
    target.label = partition.label.clone().filter(|l| !l.is_empty());

    let description = match &target.label {
        Some(label) => format!(
            "set file system label to \"{}\" on {}",
            label,
            target.display_path()
        ),
        None => format!("clear file system label on {}", target.display_path()),
    };
    step(detail, description, |step| driver.write_label(&target, step))
}

pub(super) fn change_uuid(ctx: &mut Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let driver = ctx.driver(partition.fs, FsAction::WriteUuid)?;
    let mut target = ctx.calibrate(partition, detail)?;
    target.fs = partition.fs;
    step(
        detail,
        format!("set a new random UUID on {}", target.display_path()),
        |step| driver.write_uuid(&target, step),
    )
}
