// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::{EngineError, Result};
use partitions_types::{FsAction, OperationDetail, Partition};

use super::{Context, step};

/// Remove the entry of `partition`. File system data is left in place;
/// drivers holding something outside the partition release it first.
pub(super) fn delete(ctx: &mut Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let target = ctx.calibrate(partition, detail)?;
    ctx.ensure_idle(&target)?;
    let number = target
        .number
        .ok_or_else(|| EngineError::InvalidInput(format!("{} has no number", target.display_path())))?;

    if target.fs.is_filesystem() {
        if let Ok(driver) = ctx.driver(target.fs, FsAction::Remove) {
            step(detail, format!("remove {} file system", target.fs), |step| {
                driver.remove(&target, step)
            })?;
        }
    }

    step(detail, format!("delete {}", target.display_path()), |_| {
        ctx.table_mut()?.remove(number)?;
        ctx.commit()
    })
}
