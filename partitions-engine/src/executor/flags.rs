// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::{EngineError, Result};
use partitions_types::{OperationDetail, Partition, PartitionFlag, type_code_for_fs};

use super::{Context, step};

fn number_of(partition: &Partition) -> Result<u32> {
    partition
        .number
        .ok_or_else(|| EngineError::InvalidInput(format!("{} has no number", partition.display_path())))
}

pub(super) fn toggle_flag(
    ctx: &mut Context<'_>,
    partition: &Partition,
    flag: PartitionFlag,
    state: bool,
    detail: &mut OperationDetail,
) -> Result<()> {
    let target = ctx.calibrate(partition, detail)?;
    let number = number_of(&target)?;
    let description = format!(
        "set flag {} on {} to {}",
        flag,
        target.display_path(),
        if state { "on" } else { "off" }
    );
    step(detail, description, |_| {
        ctx.table_mut()?.set_flag(number, flag, state)?;
        ctx.commit()
    })
}

/// Set the type code of the entry to match `partition.fs`.
pub(super) fn change_partition_type(
    ctx: &mut Context<'_>,
    partition: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let mut target = ctx.calibrate(partition, detail)?;
    target.fs = partition.fs;
    set_partition_type(ctx, &target, detail)
}

pub(super) fn set_partition_type(
    ctx: &mut Context<'_>,
    partition: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let number = number_of(partition)?;
    step(
        detail,
        format!("set partition type on {}", partition.display_path()),
        |step| {
            let table = ctx.table_mut()?;
            let code = type_code_for_fs(table.table_type, partition.fs);
            table.set_type(number, code)?;
            step.add_output(format!("new partition type: {}", code));
            ctx.commit()
        },
    )
}
