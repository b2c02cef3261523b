// SPDX-License-Identifier: GPL-3.0-only

//! Linux swap through util-linux
//!
//! Swap has no content worth keeping, so resizing recreates the signature
//! with the old label and UUID.

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, KIBIBYTE, OperationDetail, Partition, Support, sectors_for_bytes};

use super::{execute, external_if, field, query};
use crate::registry::ToolLocator;

const PROC_SWAPS: &str = "/proc/swaps";

pub struct Swap {
    capabilities: FsCapabilities,
}

impl Swap {
    pub fn probe(tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(FsKind::LinuxSwap);
        caps.read = Support::Engine;
        caps.create = external_if(tools, "mkswap");
        caps.grow = caps.create;
        caps.shrink = caps.create;
        caps.read_label = external_if(tools, "swaplabel");
        caps.write_label = caps.read_label;
        caps.read_uuid = caps.read_label;
        caps.write_uuid = caps.read_label;
        caps.move_ = Support::Engine;
        caps.copy = Support::Engine;
        caps.min_size = Some(40 * KIBIBYTE);
        Self { capabilities: caps }
    }
}

/// Used KiB of `path` in `/proc/swaps` content, `None` when inactive.
fn active_usage(proc_swaps: &str, path: &str) -> Option<u64> {
    proc_swaps.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 4 && fields[0] == path {
            fields[3].parse().ok()
        } else {
            None
        }
    })
}

impl FileSystemDriver for Swap {
    fn kind(&self) -> FsKind {
        FsKind::LinuxSwap
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    /// Inactive swap holds nothing; active swap reports its use.
    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let proc_swaps = std::fs::read_to_string(PROC_SWAPS).unwrap_or_default();
        let used_kib = active_usage(&proc_swaps, &partition.path).unwrap_or(0);
        let used = sectors_for_bytes(used_kib * KIBIBYTE, partition.sector_size)
            .min(partition.sector_length());
        partition.set_sector_usage(None, partition.sector_length() - used);
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let output = query("swaplabel", &[&partition.path])?;
        partition.label = field(&output, "LABEL");
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "swaplabel", &["-L", label, &partition.path]).map(|_| ())
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        let output = query("swaplabel", &[&partition.path])?;
        partition.uuid = field(&output, "UUID");
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let uuid = uuid::Uuid::new_v4().to_string();
        execute(detail, "swaplabel", &["-U", &uuid, &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "mkswap", &["-L", label, &partition.path]).map(|_| ())
    }

    fn resize(
        &self,
        partition_new: &Partition,
        _fill_partition: bool,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        let label = partition_new.label.as_deref().unwrap_or("");
        let mut args = vec!["-L", label];
        if let Some(uuid) = partition_new.uuid.as_deref() {
            args.extend(["-U", uuid]);
        }
        args.push(&partition_new.path);
        execute(detail, "mkswap", &args).map(|_| ())
    }
}
