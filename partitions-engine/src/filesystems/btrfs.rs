// SPDX-License-Identifier: GPL-3.0-only

//! btrfs through btrfs-progs
//!
//! btrfs resizes only while mounted; offline resizing is not offered.

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, MEBIBYTE, OperationDetail, Partition, Support, sectors_for_bytes};

use super::{execute, external_if, field, query};
use crate::registry::ToolLocator;

pub struct Btrfs {
    capabilities: FsCapabilities,
}

impl Btrfs {
    pub fn probe(tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(FsKind::Btrfs);
        caps.create = external_if(tools, "mkfs.btrfs");
        caps.read = external_if(tools, "btrfs");
        caps.read_label = caps.read;
        caps.write_label = caps.read;
        caps.read_uuid = caps.read;
        caps.check = caps.read;
        caps.write_uuid = external_if(tools, "btrfstune");
        if caps.read.is_supported() {
            caps.move_ = Support::Engine;
            caps.copy = Support::Engine;
        }
        caps.min_size = Some(256 * MEBIBYTE);
        Self { capabilities: caps }
    }
}

/// `dump-super` → (total bytes, bytes used).
fn parse_super(output: &str) -> Option<(u64, u64)> {
    Some((field(output, "total_bytes")?, field(output, "bytes_used")?))
}

impl FileSystemDriver for Btrfs {
    fn kind(&self) -> FsKind {
        FsKind::Btrfs
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let output = query("btrfs", &["inspect-internal", "dump-super", &partition.path])?;
        match parse_super(&output) {
            Some((total, used)) => {
                let size = sectors_for_bytes(total, partition.sector_size);
                let used = sectors_for_bytes(used, partition.sector_size).min(size);
                partition.set_sector_usage(Some(size), size - used);
            }
            None => partition.messages.push(format!(
                "Failed parsing output of 'btrfs inspect-internal dump-super {}'",
                partition.path
            )),
        }
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let label = query("btrfs", &["filesystem", "label", &partition.path])?
            .trim()
            .to_string();
        partition.label = (!label.is_empty()).then_some(label);
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "btrfs", &["filesystem", "label", &partition.path, label]).map(|_| ())
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        let output = query("btrfs", &["inspect-internal", "dump-super", &partition.path])?;
        partition.uuid = field(&output, "fsid");
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "btrfstune", &["-f", "-u", &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "mkfs.btrfs", &["-f", "-L", label, &partition.path]).map(|_| ())
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "btrfs", &["check", "--repair", &partition.path]).map(|_| ())
    }
}
