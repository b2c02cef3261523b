// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::Result;
use partitions_types::{FsAction, OperationDetail, Partition};

use super::flags::set_partition_type;
use super::{Context, step};

/// Replace the file system of `old` with an empty one of `new.fs`.
/// Formatting to a non-filesystem kind only wipes the old signatures.
pub(super) fn format(
    ctx: &mut Context<'_>,
    old: &Partition,
    new: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let driver = if new.fs.is_filesystem() {
        Some(ctx.driver(new.fs, FsAction::Create)?)
    } else {
        None
    };

    let mut target = ctx.calibrate(old, detail)?;
    ctx.ensure_idle(&target)?;
    let Some(driver) = driver else {
        return ctx.erase_signatures(&target, detail);
    };
    ctx.ensure_size(new.fs, &target)?;

    target.fs = new.fs;
    target.label = new.label.clone();
    target.uuid = None;
    set_partition_type(ctx, &target, detail)?;
    ctx.erase_signatures(&target, detail)?;
    step(detail, format!("create new {} file system", new.fs), |step| {
        driver.create(&target, step)
    })
}
