// SPDX-License-Identifier: GPL-3.0-only

//! ext2, ext3 and ext4 through e2fsprogs

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, OperationDetail, Partition, Support};

use super::{blocks_to_sectors, execute, execute_accepting, external_if, field, kibibytes, query};
use crate::registry::ToolLocator;

pub struct Ext {
    capabilities: FsCapabilities,
}

impl Ext {
    pub fn probe(kind: FsKind, tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(kind);
        caps.create = external_if(tools, Self::mkfs(kind));
        caps.read = external_if(tools, "dumpe2fs");
        caps.read_label = external_if(tools, "e2label");
        caps.write_label = caps.read_label;
        caps.read_uuid = external_if(tools, "tune2fs");
        caps.write_uuid = caps.read_uuid;
        if tools.has("resize2fs") {
            caps.grow = Support::External;
            caps.shrink = Support::External;
            caps.online_grow = kind != FsKind::Ext2;
        }
        caps.check = external_if(tools, "e2fsck");
        if caps.read.is_supported() {
            caps.move_ = Support::Engine;
            caps.copy = Support::Engine;
        }
        caps.max_size = Some(16 * partitions_types::TEBIBYTE);
        Self { capabilities: caps }
    }

    fn mkfs(kind: FsKind) -> &'static str {
        match kind {
            FsKind::Ext2 => "mkfs.ext2",
            FsKind::Ext3 => "mkfs.ext3",
            _ => "mkfs.ext4",
        }
    }
}

/// `dumpe2fs -h` header → (block count, free blocks, block size).
fn parse_header(output: &str) -> Option<(u64, u64, u64)> {
    Some((
        field(output, "Block count")?,
        field(output, "Free blocks")?,
        field(output, "Block size")?,
    ))
}

impl FileSystemDriver for Ext {
    fn kind(&self) -> FsKind {
        self.capabilities.kind
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let output = query("dumpe2fs", &["-h", &partition.path])?;
        match parse_header(&output) {
            Some((count, free, block_size)) => partition.set_sector_usage(
                Some(blocks_to_sectors(count, block_size, partition)),
                blocks_to_sectors(free, block_size, partition),
            ),
            None => partition
                .messages
                .push(format!("Failed parsing output of 'dumpe2fs -h {}'", partition.path)),
        }
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let label = query("e2label", &[&partition.path])?.trim().to_string();
        partition.label = (!label.is_empty()).then_some(label);
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "e2label", &[&partition.path, label]).map(|_| ())
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        let output = query("tune2fs", &["-l", &partition.path])?;
        partition.uuid = field(&output, "Filesystem UUID");
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "tune2fs", &["-U", "random", &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, Self::mkfs(self.kind()), &["-F", "-L", label, &partition.path]).map(|_| ())
    }

    fn resize(
        &self,
        partition_new: &Partition,
        fill_partition: bool,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        if fill_partition {
            return execute(detail, "resize2fs", &["-p", &partition_new.path]).map(|_| ());
        }
        let size = kibibytes(partition_new);
        execute(detail, "resize2fs", &["-p", &partition_new.path, &size]).map(|_| ())
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        // 1 and 2 mean errors were corrected.
        execute_accepting(detail, "e2fsck", &["-f", "-y", "-v", &partition.path], &[1, 2]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partitions_types::FsAction;

    const DUMPE2FS: &str = "\
Filesystem volume name:   root
Filesystem UUID:          2f8a6c71-2c9e-4d5b-a6b0-0d3c8c1b9e11
Block count:              262144
Reserved block count:     13107
Free blocks:              200000
Block size:               4096
";

    #[test]
    fn header_gives_usage_in_blocks() {
        assert_eq!(parse_header(DUMPE2FS), Some((262_144, 200_000, 4096)));
        assert_eq!(
            field::<String>(DUMPE2FS, "Filesystem UUID").as_deref(),
            Some("2f8a6c71-2c9e-4d5b-a6b0-0d3c8c1b9e11")
        );
    }

    #[test]
    fn nothing_is_supported_without_tools() {
        let ext = Ext::probe(FsKind::Ext4, &|_: &str| false);
        assert!(!ext.capabilities().supports(FsAction::Grow));
        assert!(!ext.capabilities().supports(FsAction::Move));
    }

    #[test]
    fn resize2fs_enables_both_directions() {
        let ext = Ext::probe(FsKind::Ext3, &|tool: &str| tool == "resize2fs" || tool == "dumpe2fs");
        assert!(ext.capabilities().supports(FsAction::Grow));
        assert!(ext.capabilities().supports(FsAction::Shrink));
        assert_eq!(ext.capabilities().move_, Support::Engine);
        assert!(ext.capabilities().online_grow);
    }
}
