// SPDX-License-Identifier: GPL-3.0-only

//! Block copy engine
//!
//! Copies a filesystem byte for byte, either into a new partition or to a
//! new position on the same device. An in-place move can be rehearsed with
//! a read-only pass first, and a move interrupted half way is undone by
//! copying the transferred blocks back.

use std::ops::ControlFlow;

use tokio_util::sync::CancellationToken;

use partitions_contracts::{DiskSession, EngineError, Result};
use partitions_sys::{BlockCopier, CopyDirection, CopyRequest, SysError, open_for_read, open_for_write};
use partitions_types::{CopyProgress, FsAction, OperationDetail, Partition, Support};

use super::create::create_partition;
use super::resize::maximize;
use super::{Context, step};

/// A copy that did not finish. The first `bytes_done` bytes, in visiting
/// order, reached the destination.
#[derive(Debug)]
struct CopyFailure {
    bytes_done: u64,
    error: EngineError,
}

impl CopyFailure {
    fn before_start(error: impl Into<EngineError>) -> Self {
        Self {
            bytes_done: 0,
            error: error.into(),
        }
    }
}

/// Copy `source` into a new partition created from `destination`.
pub(super) fn copy(
    ctx: &mut Context<'_>,
    source: &Partition,
    destination: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let driver = ctx.driver(source.fs, FsAction::Copy)?;
    // Held until the copy and any cleanup are done.
    let (source, _source_session) = calibrate_source(ctx, source, detail)?;
    ctx.ensure_idle(&source)?;
    if destination.sector_length() < source.sector_length() {
        return Err(EngineError::InvalidInput(format!(
            "The destination ({}) is smaller than the source partition {} ({})",
            destination.display_size(),
            source.display_path(),
            source.display_size()
        )));
    }

    let mut wanted = destination.clone();
    wanted.fs = source.fs;
    wanted.label = source.label.clone();
    wanted.uuid = source.uuid.clone();
    let created = create_partition(ctx, &wanted, source.fs, detail)?;

    let result = step(
        detail,
        format!(
            "copy file system of {} to {}",
            source.display_path(),
            created.display_path()
        ),
        |step| {
            if created.sector_length() < source.sector_length() {
                return Err(EngineError::AlignmentImpossible(format!(
                    "{} was created smaller than {}",
                    created.display_path(),
                    source.display_path()
                )));
            }
            if driver.capabilities().copy == Support::External {
                return driver.copy(&source.path, &created.path, step);
            }
            let request = request(ctx, &source, &created, false);
            run_copy(&source.device_path, &created.device_path, request, ctx.cancel, step)
                .map(|_| ())
                .map_err(|failure| failure.error)
        },
    );

    if let Err(e) = result {
        remove_partial_copy(ctx, &created, detail);
        return Err(e);
    }
    if created.sector_length() > source.sector_length() {
        maximize(ctx, &created, detail)?;
    }
    Ok(())
}

/// Calibrate the source. When it lives on another device, that device is
/// opened and its session returned; dropping it releases the device.
fn calibrate_source(
    ctx: &Context<'_>,
    source: &Partition,
    detail: &mut OperationDetail,
) -> Result<(Partition, Option<Box<dyn DiskSession>>)> {
    if source.device_path.is_empty() || source.device_path == ctx.device_path() {
        return Ok((ctx.calibrate(source, detail)?, None));
    }
    let other = Context {
        backend: ctx.backend,
        registry: ctx.registry,
        config: ctx.config,
        cancel: ctx.cancel,
        session: ctx.backend.open(&source.device_path)?,
    };
    let calibrated = other.calibrate(source, detail)?;
    Ok((calibrated, Some(other.session)))
}

/// Undo a failed copy: wipe whatever reached the destination and drop its
/// table entry. Problems are logged; the copy error is what gets reported.
fn remove_partial_copy(ctx: &mut Context<'_>, created: &Partition, detail: &mut OperationDetail) {
    let result = step(
        detail,
        format!("remove partially copied partition {}", created.display_path()),
        |step| {
            ctx.erase_signatures(created, step)?;
            if let Some(number) = created.number {
                ctx.table_mut()?.remove(number)?;
                ctx.commit()?;
            }
            Ok(())
        },
    );
    if let Err(e) = result {
        tracing::warn!("Could not remove {} after a failed copy: {}", created.display_path(), e);
    }
}

/// Move the filesystem of `old` to the start of `new` on the same device.
pub(super) fn move_filesystem(
    ctx: &Context<'_>,
    old: &Partition,
    new: &Partition,
    detail: &mut OperationDetail,
) -> Result<()> {
    let direction = if new.sector_start > old.sector_start {
        "right"
    } else {
        "left"
    };
    step(detail, format!("move file system to the {}", direction), |moving| {
        if ctx.config.simulate_before_move && old.overlaps(new) {
            let rehearsal = request(ctx, old, new, true);
            step(moving, "perform read-only test", |test| {
                run_copy(&old.device_path, &new.device_path, rehearsal, ctx.cancel, test)
                    .map_err(|failure| failure.error)
            })?;
        }

        let real = request(ctx, old, new, false);
        let mut interrupted = 0;
        let moved = step(moving, "perform real move", |pass| {
            run_copy(&old.device_path, &new.device_path, real, ctx.cancel, pass).map_err(|failure| {
                interrupted = failure.bytes_done;
                failure.error
            })
        });
        if let Err(e) = moved {
            if interrupted > 0 && old.overlaps(new) {
                tracing::warn!(
                    "Move of {} stopped after {} bytes, rolling back",
                    old.display_path(),
                    interrupted
                );
                rollback_transaction(old, new, real, interrupted, moving);
            }
            return Err(e);
        }
        Ok(())
    })
}

/// Copy the `done` bytes of an interrupted move back to where they came
/// from. Runs to completion regardless of the operation's cancellation.
fn rollback_transaction(
    old: &Partition,
    new: &Partition,
    request: CopyRequest,
    done: u64,
    detail: &mut OperationDetail,
) {
    let relative = match request.direction() {
        CopyDirection::Backward => request.length - done,
        CopyDirection::Forward => 0,
    };
    let undo = CopyRequest {
        src_offset: request.dst_offset + relative,
        dst_offset: request.src_offset + relative,
        length: done,
        ..request
    };
    let result = step(detail, "rollback last transaction", |step| {
        run_copy(&new.device_path, &old.device_path, undo, &CancellationToken::new(), step)
            .map(|_| ())
            .map_err(|failure| failure.error)
    });
    if let Err(e) = result {
        tracing::error!("Rollback of {} failed: {}", old.display_path(), e);
    }
}

fn request(ctx: &Context<'_>, src: &Partition, dst: &Partition, readonly: bool) -> CopyRequest {
    CopyRequest {
        src_offset: src.byte_offset(),
        dst_offset: dst.byte_offset(),
        length: src.byte_length(),
        block_size: ctx.config.copy_block_size,
        sector_size: src.sector_size,
        readonly,
    }
}

/// Run one pass of the block copier, reporting progress on `detail`.
fn run_copy(
    src_path: &str,
    dst_path: &str,
    request: CopyRequest,
    cancel: &CancellationToken,
    detail: &mut OperationDetail,
) -> std::result::Result<u64, CopyFailure> {
    let writer;
    let reader;
    let (src, dst) = if request.readonly {
        reader = open_for_read(src_path).map_err(CopyFailure::before_start)?;
        (&reader, None)
    } else if src_path == dst_path {
        writer = open_for_write(dst_path).map_err(CopyFailure::before_start)?;
        (&writer, Some(&writer))
    } else {
        reader = open_for_read(src_path).map_err(CopyFailure::before_start)?;
        writer = open_for_write(dst_path).map_err(CopyFailure::before_start)?;
        (&reader, Some(&writer))
    };

    tracing::debug!(
        "Copying {} bytes from {}@{} to {}@{} (readonly: {})",
        request.length,
        src_path,
        request.src_offset,
        dst_path,
        request.dst_offset,
        request.readonly
    );
    let copier = BlockCopier::new(src, dst, request);
    let result = copier.run(|done, elapsed| {
        detail.set_progress(CopyProgress {
            bytes_done: done,
            bytes_total: request.length,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        if cancel.is_cancelled() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    match result {
        Ok(copied) => {
            let summary = CopyProgress {
                bytes_done: copied,
                bytes_total: request.length,
                elapsed_ms: 0,
            };
            detail.add_output(summary.final_summary());
            Ok(copied)
        }
        Err(e) => {
            let error = match e.cause {
                SysError::Cancelled => EngineError::Cancelled,
                cause => cause.into(),
            };
            Err(CopyFailure {
                bytes_done: e.bytes_done,
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved_request(src: u64, dst: u64) -> CopyRequest {
        CopyRequest {
            src_offset: src,
            dst_offset: dst,
            length: 4096,
            block_size: 1024,
            sector_size: 512,
            readonly: false,
        }
    }

    #[test]
    fn readonly_pass_only_opens_source() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(16 * 1024).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let mut detail = OperationDetail::new("test");
        let request = CopyRequest {
            readonly: true,
            ..moved_request(0, 2048)
        };

        let copied = run_copy(&path, "/nonexistent/destination", request, &CancellationToken::new(), &mut detail)
            .unwrap();
        assert_eq!(copied, 4096);
        assert_eq!(detail.output, vec!["4.00 KiB (4,096 B) copied"]);
    }

    #[test]
    fn cancelled_copy_reports_cancelled() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(16 * 1024).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut detail = OperationDetail::new("test");

        let failure = run_copy(&path, &path, moved_request(0, 8192), &cancel, &mut detail).unwrap_err();
        assert_eq!(failure.error, EngineError::Cancelled);
        assert_eq!(failure.bytes_done, 1024);
    }
}
