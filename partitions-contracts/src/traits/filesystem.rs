// SPDX-License-Identifier: GPL-3.0-only

use partitions_types::{FsAction, FsCapabilities, FsKind, OperationDetail, Partition};

use crate::{EngineError, Result};

/// Filesystem driver.
///
/// One implementation per [`FsKind`]. Every method has a default that reports
/// [`EngineError::CapabilityMissing`], so a driver only overrides what its
/// tools can do. Calls may block for a long time and are never interrupted.
pub trait FileSystemDriver: Send + Sync {
    fn kind(&self) -> FsKind;

    /// Capabilities detected when the driver was probed.
    fn capabilities(&self) -> &FsCapabilities;

    fn missing(&self, action: FsAction) -> EngineError {
        EngineError::capability_missing(self.kind(), action)
    }

    /// Fill `sectors_used` / `sectors_unused` of `partition`.
    fn set_used_sectors(&self, _partition: &mut Partition) -> Result<()> {
        Err(self.missing(FsAction::Read))
    }

    fn read_label(&self, _partition: &mut Partition) -> Result<()> {
        Err(self.missing(FsAction::ReadLabel))
    }

    fn write_label(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::WriteLabel))
    }

    fn read_uuid(&self, _partition: &mut Partition) -> Result<()> {
        Err(self.missing(FsAction::ReadUuid))
    }

    fn write_uuid(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::WriteUuid))
    }

    fn create(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::Create))
    }

    /// Resize the filesystem to `partition_new`, or to the whole partition
    /// when `fill_partition` is set.
    fn resize(
        &self,
        _partition_new: &Partition,
        _fill_partition: bool,
        _detail: &mut OperationDetail,
    ) -> Result<()> {
        Err(self.missing(FsAction::Grow))
    }

    /// Relocate the filesystem natively. Drivers without a native mover leave
    /// this to the engine's block copy.
    fn move_filesystem(
        &self,
        _partition_new: &Partition,
        _partition_old: &Partition,
        _detail: &mut OperationDetail,
    ) -> Result<()> {
        Err(self.missing(FsAction::Move))
    }

    fn copy(&self, _src_path: &str, _dst_path: &str, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::Copy))
    }

    fn check_repair(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::Check))
    }

    /// Release whatever the filesystem holds outside the partition before
    /// its entry is deleted.
    fn remove(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Err(self.missing(FsAction::Remove))
    }
}
