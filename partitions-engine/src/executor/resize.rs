// SPDX-License-Identifier: GPL-3.0-only

//! Resize and move
//!
//! A request is first reduced to exact geometry against the live table.
//! Same start means a resize, same length a move; anything else goes
//! through an intermediate partition so the file system never extends past
//! the smaller of the old and new boundaries: growing moves first and then
//! resizes, shrinking resizes first and then moves.

use partitions_contracts::{EngineError, Result};
use partitions_types::{FsAction, FsKind, OperationDetail, Partition, ResizeAction, Support};

use super::check::check_filesystem;
use super::{Context, copy, geometry_lines, step, warn, with_geometry};
use crate::geometry;

pub(super) fn resize_move(
    ctx: &mut Context<'_>,
    old: &Partition,
    new: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let old = ctx.calibrate(old, detail)?;

    let mut requested = with_geometry(&old, new.sector_start, new.sector_end);
    requested.alignment = new.alignment;
    requested.strict_start = new.strict_start;
    let requested = geometry::snap_to_alignment(&ctx.layout(), &requested)?;
    let new = calculate_exact_geometry(ctx, &old, requested, detail)?;

    if old.is_extended() {
        return resize_move_partition(ctx, &old, &new, detail);
    }
    ctx.ensure_idle(&old)?;

    let action = ResizeAction::classify(&old, &new);
    if action == ResizeAction::None {
        return Ok(());
    }
    preflight(ctx, &old, &new)?;

    let carries_data = old.fs.is_filesystem();
    if carries_data && ctx.config.check_before_resize {
        check_filesystem(ctx, &old, detail)?;
    }

    let (old_len, new_len) = (old.sector_length(), new.sector_length());
    if new.sector_start == old.sector_start {
        resize(ctx, &old, &new, detail)
    } else if new_len == old_len {
        move_partition(ctx, &old, &new, detail)
    } else if new_len > old_len {
        let moved = with_geometry(&old, new.sector_start, new.sector_start + old_len - 1);
        move_partition(ctx, &old, &moved, detail)?;
        resize(ctx, &moved, &new, detail)
    } else {
        let shrunk = with_geometry(&old, old.sector_start, old.sector_start + new_len - 1);
        resize(ctx, &old, &shrunk, detail)?;
        move_partition(ctx, &shrunk, &new, detail)
    }
}

/// Refuse, before anything is written, requests the driver cannot carry
/// out.
fn preflight(ctx: &Context<'_>, old: &Partition, new: &Partition) -> Result<()> {
    let shrinks = new.sector_length() < old.sector_length();
    let moves = new.sector_start != old.sector_start;
    if old.fs == FsKind::Unknown {
        return match (moves, shrinks) {
            (true, _) => Err(EngineError::capability_missing(old.fs, FsAction::Move)),
            (false, true) => Err(EngineError::capability_missing(old.fs, FsAction::Shrink)),
            _ => Ok(()),
        };
    }
    if !old.fs.is_filesystem() {
        return Ok(());
    }
    if shrinks {
        ctx.driver(old.fs, FsAction::Shrink)?;
        if old.sectors_used.is_none() && old.fs != FsKind::LinuxSwap {
            return Err(EngineError::InvalidInput(format!(
                "The used space of {} is unknown, refusing to shrink it",
                old.display_path()
            )));
        }
        ctx.ensure_size(old.fs, new)?;
    }
    if moves {
        ctx.driver(old.fs, FsAction::Move)?;
    }
    Ok(())
}

/// Clamp the request to what the table accepts, without writing anything.
fn calculate_exact_geometry(
    ctx: &Context<'_>,
    old: &Partition,
    mut new: Partition,
    detail: &mut OperationDetail,
) -> Result<Partition> {
    step(
        detail,
        format!("calculate new size and position of {}", old.display_path()),
        |step| {
            geometry_lines(step, "requested", &new);
            let (start, end) =
                ctx.table()?
                    .constrain(old.number, new.kind, new.sector_start, new.sector_end)?;
            new.sector_start = start;
            new.sector_end = end;
            if new.sector_length() < old.min_sectors() {
                return Err(EngineError::AlignmentImpossible(format!(
                    "A partition with used sectors ({}) greater than its length ({}) is not valid",
                    old.min_sectors(),
                    new.sector_length()
                )));
            }
            geometry_lines(step, "new", &new);
            Ok(new)
        },
    )
}

/// Resize in place. The file system shrinks before the entry does and
/// grows after it.
fn resize(ctx: &mut Context<'_>, old: &Partition, new: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let carries_data = old.fs.is_filesystem();
    if carries_data && new.sector_length() < old.sector_length() {
        resize_filesystem(ctx, old, new, false, detail)?;
    }
    resize_move_partition(ctx, old, new, detail)?;
    if carries_data && new.sector_length() > old.sector_length() {
        maximize(ctx, new, detail)?;
    }
    Ok(())
}

fn move_partition(ctx: &mut Context<'_>, old: &Partition, new: &Partition, detail: &mut OperationDetail) -> Result<()> {
    if !old.fs.is_filesystem() {
        return resize_move_partition(ctx, old, new, detail);
    }

    if ctx.registry.capabilities(old.fs).move_ == Support::External {
        let driver = ctx.driver(old.fs, FsAction::Move)?;
        resize_move_partition(ctx, old, new, detail)?;
        let moved = step(detail, "move file system", |step| {
            driver.move_filesystem(new, old, step)
        });
        if let Err(e) = moved {
            rollback_partition(ctx, new, old, detail);
            return Err(e);
        }
        return Ok(());
    }

    if !old.overlaps(new) {
        copy::move_filesystem(ctx, old, new, detail)?;
        resize_move_partition(ctx, old, new, detail)?;
        return verify_move(ctx, old, new, detail);
    }

    // Cover both ranges while the data is in flight.
    let span = with_geometry(
        old,
        old.sector_start.min(new.sector_start),
        old.sector_end.max(new.sector_end),
    );
    resize_move_partition(ctx, old, &span, detail)?;
    if let Err(e) = copy::move_filesystem(ctx, old, new, detail) {
        rollback_partition(ctx, &span, old, detail);
        if let Err(check) = check_filesystem(ctx, old, detail) {
            tracing::warn!("Check after rollback of {} failed: {}", old.display_path(), check);
        }
        return Err(e);
    }
    resize_move_partition(ctx, &span, new, detail)?;
    verify_move(ctx, old, new, detail)
}

/// Re-read usage at the new position. A block copy must not change it.
fn verify_move(ctx: &Context<'_>, old: &Partition, new: &Partition, detail: &mut OperationDetail) -> Result<()> {
    let (Some(expected), Ok(driver)) = (old.sectors_used, ctx.driver(old.fs, FsAction::Read)) else {
        return Ok(());
    };
    step(detail, format!("verify file system on {}", new.display_path()), |step| {
        let mut moved = new.clone();
        driver.set_used_sectors(&mut moved)?;
        match moved.sectors_used {
            Some(used) if used == expected => {
                step.add_output(format!("used sectors: {}", used));
                Ok(())
            }
            found => Err(EngineError::Io(format!(
                "used sectors changed during the move: expected {}, found {}",
                expected,
                found.map_or_else(|| "unknown".to_string(), |used| used.to_string())
            ))),
        }
    })
}

/// Put the entry back to `old`. Failures are reported in `detail` only.
fn rollback_partition(ctx: &mut Context<'_>, current: &Partition, old: &Partition, detail: &mut OperationDetail) {
    let result = step(detail, "rollback last change to the partition table", |step| {
        resize_move_partition(ctx, current, old, step)
    });
    if let Err(e) = result {
        tracing::warn!("Rollback of the table entry of {} failed: {}", old.display_path(), e);
    }
}

/// Rewrite the table entry of `old` with the boundaries of `new`.
fn resize_move_partition(
    ctx: &mut Context<'_>,
    old: &Partition,
    new: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let number = old
        .number
        .ok_or_else(|| EngineError::InvalidInput(format!("{} has no number", old.display_path())))?;
    let action = ResizeAction::classify(old, new);
    step(detail, action.partition_step(), |step| {
        geometry_lines(step, "old", old);
        ctx.table_mut()?
            .set_geometry(number, new.sector_start, new.sector_end)?;
        ctx.commit()?;
        geometry_lines(step, "new", new);
        Ok(())
    })
}

/// Grow the file system to fill `partition`. Kinds that cannot grow are
/// skipped with a warning.
pub(super) fn maximize(ctx: &Context<'_>, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
    resize_filesystem(ctx, partition, partition, true, detail)
}

fn resize_filesystem(
    ctx: &Context<'_>,
    old: &Partition,
    new: &Partition,
    fill_partition: bool,
    detail: &mut OperationDetail,
) -> Result<()> {
    let grow = fill_partition || new.sector_length() > old.sector_length();
    let (action, description) = match (grow, fill_partition) {
        (true, true) => (FsAction::Grow, "grow file system to fill the partition"),
        (true, false) => (FsAction::Grow, "grow file system"),
        _ => (FsAction::Shrink, "shrink file system"),
    };
    let driver = match ctx.driver(new.fs, action) {
        Ok(driver) => driver,
        Err(_) if grow => {
            warn(
                detail,
                description,
                format!("growing is not available for {} file systems", new.fs),
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    step(detail, description, |step| {
        step.add_output(format!(
            "new size: {} sectors ({})",
            new.sector_length(),
            new.display_size()
        ));
        driver.resize(new, fill_partition, step)
    })
}
