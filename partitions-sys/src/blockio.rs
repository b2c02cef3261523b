// SPDX-License-Identifier: GPL-3.0-only

//! Raw block I/O using positioned reads and writes
//!
//! These functions handle byte-level copying between regions of block devices
//! or disk image files.

use std::fs::{File, OpenOptions};
use std::io;
use std::ops::ControlFlow;
use std::os::unix::fs::FileExt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::{Result, SysError};

/// Bytes wiped at the start of a region; covers every superblock up to the
/// btrfs one at 64 KiB.
const ERASE_HEAD_BYTES: u64 = 68 * 1024;
/// Bytes wiped at the end of a region (backup boot sectors, md metadata).
const ERASE_TAIL_BYTES: u64 = 4 * 1024;

fn open_error(path: &str, action: &str, e: io::Error) -> SysError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            SysError::PermissionDenied(format!("Cannot open {} for {}", path, action))
        }
        io::ErrorKind::NotFound => SysError::DeviceNotFound(path.to_string()),
        _ => SysError::Io(e),
    }
}

/// Open a block device or image for reading.
pub fn open_for_read(path: &str) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| open_error(path, "reading", e))
}

/// Open a block device or image for reading and writing.
pub fn open_for_write(path: &str) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| open_error(path, "writing", e))
}

/// Order in which blocks are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Lowest offset first. Safe when the destination lies before the source.
    Forward,
    /// Highest offset first. Safe when the destination lies after the source.
    Backward,
}

impl CopyDirection {
    pub fn for_offsets(src_offset: u64, dst_offset: u64) -> Self {
        if dst_offset > src_offset {
            CopyDirection::Backward
        } else {
            CopyDirection::Forward
        }
    }
}

/// Geometry of one copy, all values in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRequest {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub length: u64,
    pub block_size: u64,
    /// Smallest unit a failing block is split into before giving up.
    pub sector_size: u64,
    /// Read every block but write nothing.
    pub readonly: bool,
}

impl CopyRequest {
    pub fn direction(&self) -> CopyDirection {
        CopyDirection::for_offsets(self.src_offset, self.dst_offset)
    }

    /// `(relative offset, length)` of every block in visiting order. The
    /// grid is the same in both directions; only a trailing partial block
    /// differs in size.
    pub fn blocks(&self) -> Blocks {
        let block = self.block_size.max(self.sector_size).max(1);
        Blocks {
            length: self.length,
            block,
            count: self.length.div_ceil(block),
            visited: 0,
            backward: self.direction() == CopyDirection::Backward,
        }
    }
}

/// Block offsets of a [`CopyRequest`], computed one step at a time.
#[derive(Debug, Clone)]
pub struct Blocks {
    length: u64,
    block: u64,
    count: u64,
    visited: u64,
    backward: bool,
}

impl Iterator for Blocks {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.visited >= self.count {
            return None;
        }
        let index = if self.backward {
            self.count - 1 - self.visited
        } else {
            self.visited
        };
        self.visited += 1;
        let offset = index * self.block;
        Some((offset, self.block.min(self.length - offset)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.count - self.visited).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

/// A copy that stopped early. `bytes_done` bytes were fully transferred.
#[derive(Debug, Error)]
#[error("copy stopped after {bytes_done} bytes: {cause}")]
pub struct CopyError {
    pub bytes_done: u64,
    pub cause: SysError,
}

/// Block-by-block copier over positioned I/O.
pub struct BlockCopier<'a> {
    src: &'a File,
    dst: Option<&'a File>,
    request: CopyRequest,
}

impl<'a> BlockCopier<'a> {
    /// `dst` may be `None` only for a read-only pass.
    pub fn new(src: &'a File, dst: Option<&'a File>, request: CopyRequest) -> Self {
        Self { src, dst, request }
    }

    /// Copy every block, calling `on_block(bytes_done, elapsed)` after each.
    /// Returning `ControlFlow::Break` from the callback stops the copy with
    /// [`SysError::Cancelled`].
    pub fn run<F>(&self, mut on_block: F) -> std::result::Result<u64, CopyError>
    where
        F: FnMut(u64, Duration) -> ControlFlow<()>,
    {
        let started = Instant::now();
        let request = self.request;
        let dst = match (self.dst, request.readonly) {
            (Some(dst), _) => Some(dst),
            (None, true) => None,
            (None, false) => {
                return Err(CopyError {
                    bytes_done: 0,
                    cause: SysError::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "no destination for a writing copy",
                    )),
                });
            }
        };

        let mut buffer = vec![0u8; request.block_size.max(request.sector_size).max(1) as usize];
        let mut done = 0u64;
        for (offset, len) in request.blocks() {
            let buf = &mut buffer[..len as usize];

            if let Err(e) = read_block(self.src, request.src_offset + offset, buf, request.sector_size) {
                return Err(CopyError {
                    bytes_done: done,
                    cause: SysError::Io(e),
                });
            }
            if let (Some(dst), false) = (dst, request.readonly) {
                if let Err(e) = write_block(dst, request.dst_offset + offset, buf, request.sector_size) {
                    return Err(CopyError {
                        bytes_done: done,
                        cause: SysError::Io(e),
                    });
                }
            }
            done += len;

            if on_block(done, started.elapsed()).is_break() {
                return Err(CopyError {
                    bytes_done: done,
                    cause: SysError::Cancelled,
                });
            }
        }

        if let (Some(dst), false) = (dst, request.readonly) {
            dst.sync_all().map_err(|e| CopyError {
                bytes_done: done,
                cause: SysError::Io(e),
            })?;
        }
        Ok(done)
    }
}

/// Split point of a failing chunk, rounded to whole sectors.
fn half(len: usize, sector_size: u64) -> usize {
    let sector = sector_size.max(1) as usize;
    (len / 2).div_ceil(sector) * sector
}

/// Read `buf.len()` bytes at `offset`, splitting the range on error down to
/// single sectors.
fn read_block(file: &File, offset: u64, buf: &mut [u8], sector_size: u64) -> io::Result<()> {
    match file.read_exact_at(buf, offset) {
        Ok(()) => Ok(()),
        Err(err) if buf.len() as u64 > sector_size => {
            let mid = half(buf.len(), sector_size);
            tracing::warn!(
                "Read of {} bytes at {} failed ({}), retrying in smaller blocks",
                buf.len(),
                offset,
                err
            );
            let (head, tail) = buf.split_at_mut(mid);
            read_block(file, offset, head, sector_size)?;
            read_block(file, offset + mid as u64, tail, sector_size)
        }
        Err(err) => Err(err),
    }
}

fn write_block(file: &File, offset: u64, buf: &[u8], sector_size: u64) -> io::Result<()> {
    match file.write_all_at(buf, offset) {
        Ok(()) => Ok(()),
        Err(err) if buf.len() as u64 > sector_size => {
            let mid = half(buf.len(), sector_size);
            tracing::warn!(
                "Write of {} bytes at {} failed ({}), retrying in smaller blocks",
                buf.len(),
                offset,
                err
            );
            let (head, tail) = buf.split_at(mid);
            write_block(file, offset, head, sector_size)?;
            write_block(file, offset + mid as u64, tail, sector_size)
        }
        Err(err) => Err(err),
    }
}

/// Zero the areas of `offset..offset + length` (bytes) where filesystem
/// signatures live.
pub fn erase_signatures(file: &File, offset: u64, length: u64) -> Result<()> {
    let head = ERASE_HEAD_BYTES.min(length);
    file.write_all_at(&vec![0u8; head as usize], offset)?;

    let tail = ERASE_TAIL_BYTES.min(length);
    file.write_all_at(&vec![0u8; tail as usize], offset + length - tail)?;
    file.sync_all()?;
    Ok(())
}
