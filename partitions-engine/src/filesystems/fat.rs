// SPDX-License-Identifier: GPL-3.0-only

//! FAT16 and FAT32 through dosfstools and fatresize

use partitions_contracts::{FileSystemDriver, Result};
use partitions_types::{FsCapabilities, FsKind, MEBIBYTE, GIBIBYTE, OperationDetail, Partition, Support};

use super::{blocks_to_sectors, execute, execute_accepting, external_if, query};
use crate::registry::ToolLocator;

pub struct Fat {
    capabilities: FsCapabilities,
    mkfs: &'static str,
    fsck: &'static str,
}

impl Fat {
    pub fn probe(kind: FsKind, tools: &dyn ToolLocator) -> Self {
        let mkfs = if tools.has("mkfs.fat") { "mkfs.fat" } else { "mkdosfs" };
        let fsck = if tools.has("fsck.fat") { "fsck.fat" } else { "dosfsck" };

        let mut caps = FsCapabilities::none(kind);
        caps.create = external_if(tools, mkfs);
        caps.read = external_if(tools, fsck);
        caps.check = caps.read;
        caps.read_label = external_if(tools, "fatlabel");
        caps.write_label = caps.read_label;
        caps.read_uuid = caps.read_label;
        caps.write_uuid = caps.read_label;
        if tools.has("fatresize") {
            caps.grow = Support::External;
            caps.shrink = Support::External;
        }
        if caps.read.is_supported() {
            caps.move_ = Support::Engine;
            caps.copy = Support::Engine;
        }
        match kind {
            FsKind::Fat16 => {
                caps.min_size = Some(16 * MEBIBYTE);
                caps.max_size = Some(4 * GIBIBYTE - 64 * 1024);
            }
            _ => caps.min_size = Some(33 * MEBIBYTE),
        }
        Self {
            capabilities: caps,
            mkfs,
            fsck,
        }
    }

    fn fat_bits(&self) -> &'static str {
        match self.capabilities.kind {
            FsKind::Fat16 => "16",
            _ => "32",
        }
    }
}

/// `fsck.fat -n -v` → (bytes per cluster, used clusters, total clusters).
fn parse_usage(output: &str) -> Option<(u64, u64, u64)> {
    let cluster_bytes = output.lines().find_map(|line| {
        let (value, rest) = line.trim().split_once(' ')?;
        rest.starts_with("bytes per cluster").then(|| value.parse::<u64>().ok())?
    })?;
    // "<volume>: 12 files, 345/130812 clusters"
    let clusters = output.lines().find_map(|line| {
        let (_, tail) = line.rsplit_once(", ")?;
        let counts = tail.trim().strip_suffix(" clusters")?;
        let (used, total) = counts.split_once('/')?;
        Some((used.parse::<u64>().ok()?, total.parse::<u64>().ok()?))
    })?;
    Some((cluster_bytes, clusters.0, clusters.1))
}

impl FileSystemDriver for Fat {
    fn kind(&self) -> FsKind {
        self.capabilities.kind
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let output = query(self.fsck, &["-n", "-v", &partition.path])?;
        match parse_usage(&output) {
            Some((cluster_bytes, used, total)) => {
                let fs_size = blocks_to_sectors(total, cluster_bytes, partition);
                let unused = blocks_to_sectors(total - used.min(total), cluster_bytes, partition);
                partition.set_sector_usage(Some(fs_size), unused);
            }
            None => partition
                .messages
                .push(format!("Failed parsing output of '{} -n -v {}'", self.fsck, partition.path)),
        }
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        let label = query("fatlabel", &[&partition.path])?.trim().to_string();
        partition.label = (!label.is_empty()).then_some(label);
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        match partition.label.as_deref().filter(|l| !l.is_empty()) {
            Some(label) => execute(detail, "fatlabel", &[&partition.path, label]),
            None => execute(detail, "fatlabel", &["-r", &partition.path]),
        }
        .map(|_| ())
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        let serial = query("fatlabel", &["-i", &partition.path])?.trim().to_string();
        partition.uuid = (!serial.is_empty()).then_some(serial);
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        execute(detail, "fatlabel", &["-i", "-r", &partition.path]).map(|_| ())
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        let mut args = vec!["-F", self.fat_bits(), "-v", "-I"];
        if let Some(label) = partition.label.as_deref().filter(|l| !l.is_empty()) {
            args.extend(["-n", label]);
        }
        args.push(&partition.path);
        execute(detail, self.mkfs, &args).map(|_| ())
    }

    fn resize(
        &self,
        partition_new: &Partition,
        _fill_partition: bool,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        // fatresize always resizes to the given size; filling the partition
        // is the same request.
        let size = partition_new.byte_length().to_string();
        execute(detail, "fatresize", &["-f", "-s", &size, &partition_new.path]).map(|_| ())
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        // 1 means errors were found and fixed.
        execute_accepting(detail, self.fsck, &["-a", "-w", "-v", &partition.path], &[1]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partitions_types::FsAction;

    const FSCK: &str = "\
fsck.fat 4.2 (2021-01-31)
Checking we can access the last sector of the filesystem
Boot sector contents:
System ID \"mkfs.fat\"
Media byte 0xf8 (hard disk)
       512 bytes per logical sector
      4096 bytes per cluster
/dev/sda1: 12 files, 345/25557 clusters
";

    #[test]
    fn usage_comes_from_cluster_counts() {
        assert_eq!(parse_usage(FSCK), Some((4096, 345, 25_557)));
    }

    #[test]
    fn falls_back_to_legacy_tool_names() {
        let fat = Fat::probe(FsKind::Fat32, &|tool: &str| tool == "mkdosfs");
        assert_eq!(fat.mkfs, "mkdosfs");
        assert!(fat.capabilities().supports(FsAction::Create));
        assert!(!fat.capabilities().supports(FsAction::Shrink));
    }

    #[test]
    fn fat16_has_a_size_ceiling() {
        let fat = Fat::probe(FsKind::Fat16, &|_: &str| true);
        assert_eq!(fat.fat_bits(), "16");
        assert!(fat.capabilities().max_size.is_some());
        assert_eq!(fat.capabilities().move_, Support::Engine);
    }
}
