// SPDX-License-Identifier: GPL-3.0-only

//! Declarative disk layouts for tests
//!
//! ```toml
//! sector_size = 512
//! length = 409600
//! table = "msdos"
//!
//! [[partitions]]
//! kind = "primary"
//! start = 2048
//! end = 204799
//! fs = "fat32"
//! used = 40000
//! ```

use serde::{Deserialize, Serialize};

use partitions_types::{
    FsKind, NewEntry, PartitionKind, PartitionTable, Sector, TableType, type_code_for_fs,
};

use crate::backend::MemoryBackend;
use crate::errors::{Result, TestingError};
use crate::image::{DiskImage, FakeSignature};

fn default_sector_size() -> u64 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    pub length: Sector,
    /// `msdos`, `gpt`, or absent for a blank disk.
    pub table: Option<String>,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub kind: PartitionKind,
    pub start: Sector,
    pub end: Sector,
    pub fs: Option<FsKind>,
    /// Used sectors of the fake filesystem; a tenth of the partition when
    /// absent.
    pub used: Option<Sector>,
    pub label: Option<String>,
}

impl ImageSpec {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|error| TestingError::SpecInvalid {
            reason: error.to_string(),
        })
    }

    fn table_type(&self) -> Result<Option<TableType>> {
        match &self.table {
            None => Ok(None),
            Some(name) => TableType::parse(name)
                .map(Some)
                .ok_or_else(|| TestingError::SpecInvalid {
                    reason: format!("unknown table type '{}'", name),
                }),
        }
    }

    /// Create the image, write a fake filesystem into every partition that
    /// has one and register the disk with `backend`.
    pub fn build(&self, backend: &MemoryBackend) -> Result<DiskImage> {
        let image = DiskImage::new(self.sector_size, self.length)?;
        let table = match self.table_type()? {
            None => None,
            Some(table_type) => {
                let mut table = PartitionTable::new(table_type, self.sector_size, self.length);
                for (index, partition) in self.partitions.iter().enumerate() {
                    let fs = match partition.kind {
                        PartitionKind::Extended => FsKind::Extended,
                        _ => partition.fs.unwrap_or(FsKind::Unknown),
                    };
                    table
                        .add(NewEntry {
                            kind: partition.kind,
                            start: partition.start,
                            end: partition.end,
                            type_code: type_code_for_fs(table_type, fs).to_string(),
                            name: None,
                        })
                        .map_err(|error| TestingError::TableRejected {
                            index,
                            reason: error.to_string(),
                        })?;
                }
                Some(table)
            }
        };

        for partition in &self.partitions {
            let Some(fs) = partition.fs.filter(|fs| fs.is_filesystem()) else {
                continue;
            };
            let length = partition.end - partition.start + 1;
            let mut signature =
                FakeSignature::new(fs, length, partition.used.unwrap_or(length / 10));
            signature.label = partition.label.clone();
            image.write_signature(partition.start, &signature)?;
        }

        backend.attach(&image, table);
        Ok(image)
    }
}
