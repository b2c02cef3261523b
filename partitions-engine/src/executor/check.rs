// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::Result;
use partitions_types::{FsAction, OperationDetail, Partition};

use super::resize::maximize;
use super::{Context, step};

/// Check and repair, then grow the file system to fill its partition.
pub(super) fn check_repair(ctx: &mut Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    ctx.driver(partition.fs, FsAction::Check)?;
    let target = ctx.calibrate(partition, detail)?;
    ctx.ensure_idle(&target)?;
    check_filesystem(ctx, &target, detail)?;
    maximize(ctx, &target, detail)
}

/// Run the driver's check when it has one; kinds without a checker pass.
pub(super) fn check_filesystem(ctx: &Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let Ok(driver) = ctx.driver(partition.fs, FsAction::Check) else {
        tracing::debug!("No checker for {}, skipping check of {}", partition.fs, partition.display_path());
        return Ok(());
    };
    step(
        detail,
        format!(
            "check file system on {} for errors and (if possible) fix them",
            partition.display_path()
        ),
        |step| driver.check_repair(partition, step),
    )
}
