// SPDX-License-Identifier: GPL-3.0-only

//! XFS through xfsprogs
//!
//! XFS can only grow, and only while mounted, so growing mounts the
//! filesystem on a private temporary directory for the duration.

use std::path::PathBuf;

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, MEBIBYTE, OperationDetail, Partition, Support};

use super::{blocks_to_sectors, execute, external_if, query};
use crate::registry::ToolLocator;

pub struct Xfs {
    capabilities: FsCapabilities,
}

impl Xfs {
    pub fn probe(tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(FsKind::Xfs);
        caps.create = external_if(tools, "mkfs.xfs");
        caps.read = external_if(tools, "xfs_db");
        caps.read_label = external_if(tools, "xfs_admin");
        caps.write_label = caps.read_label;
        caps.read_uuid = caps.read_label;
        caps.write_uuid = caps.read_label;
        caps.check = external_if(tools, "xfs_repair");
        if tools.has("xfs_growfs") && tools.has("mount") && tools.has("umount") {
            caps.grow = Support::External;
            caps.online_grow = true;
        }
        if caps.read.is_supported() {
            caps.move_ = Support::Engine;
            caps.copy = Support::Engine;
        }
        caps.min_size = Some(300 * MEBIBYTE);
        Self { capabilities: caps }
    }
}

/// Value of `key = value` where the key matches exactly.
fn db_value(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}

/// `xfs_db` prints → (block size, data blocks, free data blocks).
fn parse_superblock(output: &str) -> Option<(u64, u64, u64)> {
    Some((
        db_value(output, "blocksize")?.parse().ok()?,
        db_value(output, "dblocks")?.parse().ok()?,
        db_value(output, "fdblocks")?.parse().ok()?,
    ))
}

fn grow_mounted(partition: &Partition, mount_point: &str, detail: &mut OperationDetail) -> Result<()> {
    execute(detail, "mount", &["-v", "-t", "xfs", &partition.path, mount_point])?;
    let grown = execute(detail, "xfs_growfs", &[mount_point]);
    let unmounted = execute(detail, "umount", &["-v", mount_point]);
    grown?;
    unmounted.map(|_| ())
}

impl FileSystemDriver for Xfs {
    fn kind(&self) -> FsKind {
        FsKind::Xfs
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let output = query(
            "xfs_db",
            &[
                "-r",
                "-c",
                "sb 0",
                "-c",
                "print blocksize",
                "-c",
                "print dblocks",
                "-c",
                "print fdblocks",
                &partition.path,
            ],
        )?;
        match parse_superblock(&output) {
            Some((block_size, blocks, free)) => partition.set_sector_usage(
                Some(blocks_to_sectors(blocks, block_size, partition)),
                blocks_to_sectors(free, block_size, partition),
            ),
            None => partition
                .messages
                .push(format!("Failed parsing output of 'xfs_db -r {}'", partition.path)),
        }
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let output = query("xfs_admin", &["-l", &partition.path])?;
        partition.label = db_value(&output, "label").filter(|l| !l.is_empty());
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().filter(|l| !l.is_empty()).unwrap_or("--");
        execute(detail, "xfs_admin", &["-L", label, &partition.path]).map(|_| ())
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        let output = query("xfs_admin", &["-u", &partition.path])?;
        partition.uuid = db_value(&output, "UUID");
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "xfs_admin", &["-U", "generate", &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "mkfs.xfs", &["-f", "-L", label, &partition.path]).map(|_| ())
    }

    /// Always grows to fill the partition.
    fn resize(
        &self,
        partition_new: &Partition,
        _fill_partition: bool,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("partitions-xfs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir(&dir)?;
        let mount_point = dir.to_string_lossy().to_string();
        let result = grow_mounted(partition_new, &mount_point, detail);
        if let Err(e) = std::fs::remove_dir(&dir) {
            tracing::warn!("Failed to remove temporary mount point {}: {}", mount_point, e);
        }
        result
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "xfs_repair", &["-v", &partition.path]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partitions_types::FsAction;

    #[test]
    fn superblock_keys_match_exactly() {
        let output = "blocksize = 4096\ndblocks = 262144\nfdblocks = 250000\n";
        assert_eq!(parse_superblock(output), Some((4096, 262_144, 250_000)));
        assert_eq!(db_value("label = \"home\"", "label").as_deref(), Some("home"));
    }

    #[test]
    fn xfs_never_shrinks() {
        let xfs = Xfs::probe(&|_: &str| true);
        assert!(xfs.capabilities().supports(FsAction::Grow));
        assert!(!xfs.capabilities().supports(FsAction::Shrink));
    }
}
