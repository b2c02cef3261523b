// SPDX-License-Identifier: GPL-3.0-only

//! LUKS containers
//!
//! Only the container itself is handled: its usage comes from the active
//! dm-crypt mapping, if any. Opening, closing and resizing encrypted volumes
//! is not offered.

use partitions_contracts::{FileSystemDriver, Result};
use partitions_sys::CryptMapping;
use partitions_sys::dmsetup::find_mapping_for_device;
use partitions_types::{FsCapabilities, FsKind, OperationDetail, Partition, Support};

use super::external_if;
use crate::registry::ToolLocator;

pub struct Luks {
    capabilities: FsCapabilities,
}

impl Luks {
    pub fn probe(tools: &dyn ToolLocator) -> Self {
        let mut caps = FsCapabilities::none(FsKind::Luks);
        caps.read = external_if(tools, "dmsetup");
        caps.move_ = Support::Engine;
        caps.copy = Support::Engine;
        caps.remove = Support::Engine;
        Self { capabilities: caps }
    }
}

/// The active mapping backed by `partition`, recording parse problems in
/// its messages.
pub fn mapping(partition: &mut Partition) -> Result<Option<CryptMapping>> {
    let mut messages = Vec::new();
    let found = find_mapping_for_device(&partition.path, &mut messages);
    partition.messages.extend(messages);
    Ok(found?)
}

/// Sector usage of a container: the header and payload when mapped,
/// everything when closed.
fn usage(partition: &mut Partition, mapping: Option<&CryptMapping>) {
    match mapping {
        // dm-crypt counts in 512-byte units.
        Some(m) => {
            let used = (m.offset + m.size) * 512 / partition.sector_size.max(1);
            partition.set_sector_usage(Some(used), 0);
        }
        None => partition.set_sector_usage(None, 0),
    }
}

impl FileSystemDriver for Luks {
    fn kind(&self) -> FsKind {
        FsKind::Luks
    }

    fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    fn set_used_sectors(&self, partition: &mut Partition) -> Result<()> {
        let found = mapping(partition)?;
        usage(partition, found.as_ref());
        Ok(())
    }

    /// Nothing outside the partition is held by a closed container.
    fn remove(&self, _partition: &Partition, _detail: &mut OperationDetail) -> Result<()> {
        Ok(())
    }
}
