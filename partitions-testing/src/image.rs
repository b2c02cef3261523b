// SPDX-License-Identifier: GPL-3.0-only

//! Sparse disk images with a minimal fake filesystem signature
//!
//! The fake signature occupies the first 140 bytes of a partition and is
//! what [`crate::MemoryBackend`] probes and [`crate::FakeDriver`] reads and
//! rewrites. It lives inside the area `erase_signatures` wipes, so an erased
//! region probes as empty just like a real one.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;

use partitions_types::{DeviceGeometry, FsKind, Sector};
use tempfile::NamedTempFile;

use crate::errors::Result;

const MAGIC: &[u8; 8] = b"PTFSFAKE";
const SIGNATURE_BYTES: usize = 140;

/// Filesystem metadata as stored by the fake driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSignature {
    pub kind: FsKind,
    /// Sectors in use.
    pub used_sectors: Sector,
    /// Size the filesystem believes it has, in sectors.
    pub fs_sectors: Sector,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

fn put_str(buf: &mut [u8], value: Option<&str>) {
    if let Some(value) = value {
        let bytes = value.as_bytes();
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
    }
}

fn get_str(buf: &[u8]) -> Option<String> {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&buf[..end]).to_string())
}

fn get_u64(buf: &[u8]) -> Sector {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(raw)
}

impl FakeSignature {
    pub fn new(kind: FsKind, fs_sectors: Sector, used_sectors: Sector) -> Self {
        Self {
            kind,
            used_sectors,
            fs_sectors,
            label: None,
            uuid: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    fn encode(&self) -> [u8; SIGNATURE_BYTES] {
        let mut buf = [0u8; SIGNATURE_BYTES];
        buf[0..8].copy_from_slice(MAGIC);
        put_str(&mut buf[8..24], Some(self.kind.as_str()));
        buf[24..32].copy_from_slice(&self.used_sectors.to_le_bytes());
        buf[32..40].copy_from_slice(&self.fs_sectors.to_le_bytes());
        put_str(&mut buf[40..104], self.label.as_deref());
        put_str(&mut buf[104..140], self.uuid.as_deref());
        buf
    }

    fn decode(buf: &[u8; SIGNATURE_BYTES]) -> Option<Self> {
        if &buf[0..8] != MAGIC {
            return None;
        }
        Some(Self {
            kind: FsKind::parse(&get_str(&buf[8..24])?),
            used_sectors: get_u64(&buf[24..32]),
            fs_sectors: get_u64(&buf[32..40]),
            label: get_str(&buf[40..104]),
            uuid: get_str(&buf[104..140]),
        })
    }

    /// Read the signature at byte `offset` of `path`, `None` when absent.
    pub fn read_at(path: &str, offset: u64) -> io::Result<Option<Self>> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mut buf = [0u8; SIGNATURE_BYTES];
        match file.read_exact_at(&mut buf, offset) {
            Ok(()) => Ok(Self::decode(&buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write_at(&self, path: &str, offset: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.write_all_at(&self.encode(), offset)?;
        file.sync_all()
    }
}

/// A temporary, sparse image file removed on drop.
#[derive(Debug)]
pub struct DiskImage {
    file: NamedTempFile,
    path: String,
    sector_size: u64,
    length: Sector,
}

impl DiskImage {
    pub fn new(sector_size: u64, length: Sector) -> Result<Self> {
        let file = NamedTempFile::new()?;
        file.as_file().set_len(sector_size * length)?;
        let path = file.path().to_string_lossy().to_string();
        Ok(Self {
            file,
            path,
            sector_size,
            length,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn length(&self) -> Sector {
        self.length
    }

    /// Geometry the kernel would report for this image.
    pub fn geometry(&self) -> DeviceGeometry {
        let mut geometry = DeviceGeometry::new(self.path.clone(), self.sector_size, self.length);
        geometry.model = "Disk image".to_string();
        geometry
    }

    pub fn write_signature(&self, start: Sector, signature: &FakeSignature) -> Result<()> {
        signature.write_at(&self.path, start * self.sector_size)?;
        Ok(())
    }

    pub fn read_signature(&self, start: Sector) -> Result<Option<FakeSignature>> {
        Ok(FakeSignature::read_at(&self.path, start * self.sector_size)?)
    }

    /// Fill `count` sectors from `start` with bytes derived from `seed` and
    /// the absolute offset inside the region.
    pub fn fill_pattern(&self, start: Sector, count: Sector, seed: u8) -> Result<()> {
        let data: Vec<u8> = (0..count * self.sector_size)
            .map(|i| (i % 251) as u8 ^ seed)
            .collect();
        self.file
            .as_file()
            .write_all_at(&data, start * self.sector_size)?;
        Ok(())
    }

    pub fn read_region(&self, start: Sector, count: Sector) -> Result<Vec<u8>> {
        let mut data = vec![0u8; (count * self.sector_size) as usize];
        self.file
            .as_file()
            .read_exact_at(&mut data, start * self.sector_size)?;
        Ok(data)
    }
}
