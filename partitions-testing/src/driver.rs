// SPDX-License-Identifier: GPL-3.0-only

//! Scriptable filesystem driver working on [`FakeSignature`]s

use partitions_contracts::{EngineError, FileSystemDriver, Result};
use partitions_types::{FsAction, FsCapabilities, FsKind, OperationDetail, Partition, Sector, Support};

use crate::image::FakeSignature;
use crate::journal::{Journal, JournalEntry};

/// Driver whose "filesystem" is the fake signature at the partition start.
///
/// Every action the engine may dispatch is supported unless removed with
/// [`FakeDriver::without`]; actions listed with [`FakeDriver::failing`]
/// return a `DriverFailure`. Move is left to the engine's block copy.
#[derive(Debug, Clone)]
pub struct FakeDriver {
    capabilities: FsCapabilities,
    failing: Vec<FsAction>,
    journal: Journal,
    /// Used sectors written by `create`.
    created_used: Sector,
}

impl FakeDriver {
    pub fn new(kind: FsKind, journal: Journal) -> Self {
        let mut capabilities = FsCapabilities::none(kind);
        for support in [
            &mut capabilities.create,
            &mut capabilities.read,
            &mut capabilities.read_label,
            &mut capabilities.write_label,
            &mut capabilities.read_uuid,
            &mut capabilities.write_uuid,
            &mut capabilities.grow,
            &mut capabilities.shrink,
            &mut capabilities.check,
            &mut capabilities.remove,
        ] {
            *support = Support::External;
        }
        capabilities.move_ = Support::Engine;
        capabilities.copy = Support::Engine;
        Self {
            capabilities,
            failing: Vec::new(),
            journal,
            created_used: 64,
        }
    }

    /// Record into `journal` instead.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Drop support for `action`.
    pub fn without(mut self, action: FsAction) -> Self {
        let support = match action {
            FsAction::Create => &mut self.capabilities.create,
            FsAction::Read => &mut self.capabilities.read,
            FsAction::ReadLabel => &mut self.capabilities.read_label,
            FsAction::WriteLabel => &mut self.capabilities.write_label,
            FsAction::ReadUuid => &mut self.capabilities.read_uuid,
            FsAction::WriteUuid => &mut self.capabilities.write_uuid,
            FsAction::Grow => &mut self.capabilities.grow,
            FsAction::Shrink => &mut self.capabilities.shrink,
            FsAction::Move => &mut self.capabilities.move_,
            FsAction::Copy => &mut self.capabilities.copy,
            FsAction::Check => &mut self.capabilities.check,
            FsAction::Remove => &mut self.capabilities.remove,
        };
        *support = Support::None;
        self
    }

    /// Make `action` fail when invoked.
    pub fn failing(mut self, action: FsAction) -> Self {
        self.failing.push(action);
        self
    }

    fn run(&self, action: FsAction, start: Sector, end: Sector, detail: &mut OperationDetail) -> Result<()> {
        if !self.capabilities.supports(action) {
            return Err(self.missing(action));
        }
        let command = format!("fake-{} {}", action.as_str().replace(' ', "-"), self.kind());
        detail.add_output(format!("{} {}..{}", command, start, end));
        self.journal.record(JournalEntry::Driver {
            kind: self.kind(),
            action,
            start,
            end,
        });
        if self.failing.contains(&action) {
            return Err(EngineError::driver_failure(command, "injected failure"));
        }
        Ok(())
    }

    fn signature(&self, partition: &Partition) -> Result<FakeSignature> {
        FakeSignature::read_at(&partition.device_path, partition.byte_offset())?.ok_or_else(|| {
            EngineError::driver_failure(
                format!("fake-read {}", self.kind()),
                format!("no filesystem found on {}", partition.display_path()),
            )
        })
    }

    fn store(&self, partition: &Partition, signature: &FakeSignature) -> Result<()> {
        signature.write_at(&partition.device_path, partition.byte_offset())?;
        Ok(())
    }
}

impl FileSystemDriver for FakeDriver {
    fn kind(&self) -> FsKind {
        self.capabilities.kind
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        if !self.capabilities.supports(FsAction::Read) {
            return Err(self.missing(FsAction::Read));
        }
        let signature = self.signature(partition)?;
        partition.set_sector_usage(
            Some(signature.fs_sectors),
            signature.fs_sectors.saturating_sub(signature.used_sectors),
        );
        Ok(())
    }

    fn read_label(&self, partition: &mut Partition) -> Result<()> {
        partition.label = self.signature(partition)?.label;
        Ok(())
    }

    fn write_label(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        self.run(FsAction::WriteLabel, partition.sector_start, partition.sector_end, detail)?;
        let mut signature = self.signature(partition)?;
        signature.label = partition.label.clone().filter(|l| !l.is_empty());
        self.store(partition, &signature)
    }

    fn read_uuid(&self, partition: &mut Partition) -> Result<()> {
        partition.uuid = self.signature(partition)?.uuid;
        Ok(())
    }

    fn write_uuid(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        self.run(FsAction::WriteUuid, partition.sector_start, partition.sector_end, detail)?;
        let mut signature = self.signature(partition)?;
        signature.uuid = Some(format!("fake-{:08x}", partition.sector_start));
        self.store(partition, &signature)
    }

    fn create(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        self.run(FsAction::Create, partition.sector_start, partition.sector_end, detail)?;
        let mut signature = FakeSignature::new(
            self.kind(),
            partition.sector_length(),
            self.created_used.min(partition.sector_length()),
        );
        signature.label = partition.label.clone().filter(|l| !l.is_empty());
        self.store(partition, &signature)
    }

    fn resize(&self, partition_new: &Partition, fill_partition: bool, detail: &mut OperationDetail) -> Result<()> {
        let mut signature = self.signature(partition_new)?;
        let target = partition_new.sector_length();
        let action = if target < signature.fs_sectors {
            FsAction::Shrink
        } else {
            FsAction::Grow
        };
        let end = partition_new.sector_start + target - 1;
        self.run(action, partition_new.sector_start, end, detail)?;

        if target < signature.used_sectors {
            return Err(EngineError::driver_failure(
                format!("fake-shrink {}", self.kind()),
                format!(
                    "cannot shrink to {} sectors, {} in use",
                    target, signature.used_sectors
                ),
            ));
        }
        if fill_partition {
            detail.add_output("grow file system to fill the partition");
        }
        signature.fs_sectors = target;
        self.store(partition_new, &signature)
    }

    fn check_repair(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        self.run(FsAction::Check, partition.sector_start, partition.sector_end, detail)?;
        self.signature(partition).map(|_| ())
    }

    fn remove(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        self.run(FsAction::Remove, partition.sector_start, partition.sector_end, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DiskImage;
    use partitions_types::PartitionKind;

    fn setup() -> (DiskImage, Partition, Journal) {
        let image = DiskImage::new(512, 8192).unwrap();
        image
            .write_signature(2048, &FakeSignature::new(FsKind::Ext4, 4096, 1000))
            .unwrap();
        let partition = Partition::new(
            image.path(),
            1,
            PartitionKind::Primary,
            FsKind::Ext4,
            2048,
            6143,
            512,
        );
        (image, partition, Journal::new())
    }

    #[test]
    fn used_sectors_come_from_the_signature() {
        let (_image, mut partition, journal) = setup();
        FakeDriver::new(FsKind::Ext4, journal)
            .set_used_sectors(&mut partition)
            .unwrap();
        assert_eq!(partition.sectors_used, Some(1000));
        assert_eq!(partition.sectors_unused, Some(3096));
    }

    #[test]
    fn shrink_below_used_fails_without_touching_the_signature() {
        let (image, mut partition, journal) = setup();
        let driver = FakeDriver::new(FsKind::Ext4, journal.clone());
        partition.sector_end = 2048 + 500 - 1;
        let mut detail = OperationDetail::new("shrink");

        assert!(driver.resize(&partition, false, &mut detail).is_err());
        assert_eq!(image.read_signature(2048).unwrap().unwrap().fs_sectors, 4096);
        assert_eq!(journal.driver_actions(), vec![FsAction::Shrink]);
    }

    #[test]
    fn removed_capability_is_reported_missing() {
        let (_image, partition, journal) = setup();
        let driver = FakeDriver::new(FsKind::Ext4, journal).without(FsAction::Check);
        let mut detail = OperationDetail::new("check");
        assert!(matches!(
            driver.check_repair(&partition, &mut detail),
            Err(EngineError::CapabilityMissing { .. })
        ));
    }

    #[test]
    fn injected_failure_is_a_driver_failure() {
        let (_image, partition, journal) = setup();
        let driver = FakeDriver::new(FsKind::Ext4, journal).failing(FsAction::WriteLabel);
        let mut detail = OperationDetail::new("label");
        assert!(matches!(
            driver.write_label(&partition, &mut detail),
            Err(EngineError::DriverFailure { .. })
        ));
    }
}
