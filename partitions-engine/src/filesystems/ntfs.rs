// SPDX-License-Identifier: GPL-3.0-only

//! NTFS through ntfs-3g's ntfsprogs

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, OperationDetail, Partition, Support, sectors_for_bytes};

use super::{execute, external_if, field, query};
use crate::registry::ToolLocator;

pub struct Ntfs {
    capabilities: FsCapabilities,
}

impl Ntfs {
    pub fn probe(tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(FsKind::Ntfs);
        caps.create = external_if(tools, "mkntfs");
        caps.read = external_if(tools, "ntfsresize");
        caps.check = caps.read;
        caps.read_label = external_if(tools, "ntfslabel");
        caps.write_label = caps.read_label;
        caps.write_uuid = caps.read_label;
        if caps.read.is_supported() {
            caps.grow = Support::External;
            caps.shrink = Support::External;
            caps.move_ = Support::Engine;
            caps.copy = Support::Engine;
        }
        Self { capabilities: caps }
    }
}

/// `ntfsresize --info` → (volume bytes, bytes that must be kept).
fn parse_info(output: &str) -> Option<(u64, u64)> {
    let size = field(output, "Current volume size")?;
    let minimum = field(output, "You might resize at")?;
    Some((size, minimum))
}

impl FileSystemDriver for Ntfs {
    fn kind(&self) -> FsKind {
        FsKind::Ntfs
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let output = query(
            "ntfsresize",
            &["--info", "--force", "--no-progress-bar", &partition.path],
        )?;
        match parse_info(&output) {
            Some((size, minimum)) => {
                let size = sectors_for_bytes(size, partition.sector_size);
                let used = sectors_for_bytes(minimum, partition.sector_size).min(size);
                partition.set_sector_usage(Some(size), size - used);
            }
            None => partition
                .messages
                .push(format!("Failed parsing output of 'ntfsresize --info {}'", partition.path)),
        }
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let label = query("ntfslabel", &["--force", &partition.path])?.trim().to_string();
        partition.label = (!label.is_empty()).then_some(label);
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "ntfslabel", &["--force", &partition.path, label]).map(|_| ())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "ntfslabel", &["--new-serial", &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let label = partition.label.as_deref().unwrap_or("");
        execute(detail, "mkntfs", &["-Q", "-v", "-F", "-L", label, &partition.path]).map(|_| ())
    }

    fn resize(
        &self,
        partition_new: &Partition,
        fill_partition: bool,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        let size = partition_new.byte_length().to_string();
        let mut args = vec!["--force", "--force"];
        if !fill_partition {
            args.extend(["--size", size.as_str()]);
        }
        args.push(&partition_new.path);

        // Dry run first; ntfsresize refuses most problems only at this stage.
        let mut dry_run = vec!["--no-action"];
        dry_run.extend(args.iter().copied());
        let step = detail.add_child("run simulation");
        let simulated = execute(step, "ntfsresize", &dry_run);
        step.finish(simulated.is_ok());
        simulated?;

        let step = detail.add_child("real resize");
        let resized = execute(step, "ntfsresize", &args);
        step.finish(resized.is_ok());
        resized.map(|_| ())
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "ntfsresize", &["-P", "-i", "-f", "-v", &partition.path]).map(|_| ())
    }
}
