// SPDX-License-Identifier: GPL-3.0-only

//! Device geometry from sysfs
//!
//! Sizes under `/sys/class/block` are always in 512-byte units regardless of
//! the logical block size.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use partitions_types::DeviceGeometry;

use crate::{Result, SysError};

const SYSFS_BLOCK: &str = "/sys/class/block";
const SYSFS_UNIT: u64 = 512;

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path)?.parse().ok()
}

/// True when `path` is a block device node.
pub fn is_block_device(path: &str) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

/// Kernel name of a block device node (`/dev/mapper/root` → `dm-0`).
pub fn kernel_name(path: &str) -> Result<String> {
    let resolved = fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SysError::DeviceNotFound(path.to_string()),
        _ => SysError::Io(e),
    })?;
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| SysError::DeviceNotFound(path.to_string()))
}

fn sysfs_dir(path: &str) -> Result<PathBuf> {
    Ok(Path::new(SYSFS_BLOCK).join(kernel_name(path)?))
}

/// Read the geometry of a block device or disk image.
pub fn read_geometry(path: &str) -> Result<DeviceGeometry> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SysError::DeviceNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            SysError::PermissionDenied(format!("Cannot stat {}", path))
        }
        _ => SysError::Io(e),
    })?;

    if metadata.file_type().is_block_device() {
        let dir = sysfs_dir(path)?;
        let size_units = read_u64(&dir.join("size"))
            .ok_or_else(|| SysError::DeviceNotFound(format!("{} (no sysfs size)", path)))?;
        let sector_size = read_u64(&dir.join("queue/logical_block_size"))
            .filter(|s| *s > 0)
            .unwrap_or(SYSFS_UNIT);

        let mut geometry =
            DeviceGeometry::new(path, sector_size, size_units * SYSFS_UNIT / sector_size);
        geometry.model = read_trimmed(&dir.join("device/model")).unwrap_or_default();
        geometry.alignment_offset = read_u64(&dir.join("alignment_offset")).unwrap_or(0);
        geometry.optimal_io_size = read_u64(&dir.join("queue/optimal_io_size")).unwrap_or(0);
        geometry.readonly = read_u64(&dir.join("ro")) == Some(1);
        Ok(geometry)
    } else if metadata.is_file() {
        let mut geometry = DeviceGeometry::new(path, SYSFS_UNIT, metadata.len() / SYSFS_UNIT);
        geometry.model = "Disk image".to_string();
        geometry.readonly = metadata.permissions().readonly();
        Ok(geometry)
    } else {
        Err(SysError::DeviceNotFound(format!(
            "{} is neither a block device nor a file",
            path
        )))
    }
}

/// Start and size of a partition as the kernel sees it, in sectors of
/// `sector_size`. `None` when the kernel has no such partition.
pub fn partition_extent(partition_path: &str, sector_size: u64) -> Option<(u64, u64)> {
    let name = Path::new(partition_path).file_name()?.to_string_lossy().to_string();
    let dir = Path::new(SYSFS_BLOCK).join(name);
    let start = read_u64(&dir.join("start"))?;
    let size = read_u64(&dir.join("size"))?;
    let sector_size = sector_size.max(1);
    Some((start * SYSFS_UNIT / sector_size, size * SYSFS_UNIT / sector_size))
}

/// Kernel names of the devices stacked on `path` (dm-crypt, LVM, md).
/// Empty when `path` is not a block device or has no holders.
pub fn holders(path: &str) -> Vec<String> {
    let Ok(dir) = sysfs_dir(path) else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(dir.join("holders")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Partition numbers the kernel currently exposes for a disk.
pub fn kernel_partitions(device_path: &str) -> Result<Vec<u32>> {
    let dir = sysfs_dir(device_path)?;
    let mut numbers = Vec::new();
    for entry in fs::read_dir(&dir)?.flatten() {
        if let Some(number) = read_u64(&entry.path().join("partition")) {
            numbers.push(number as u32);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_file_geometry() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(8 * 1024 * 1024).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let geometry = read_geometry(&path).unwrap();
        assert_eq!(geometry.sector_size, 512);
        assert_eq!(geometry.length, 16384);
        assert_eq!(geometry.heads, 255);
        assert!(!is_block_device(&path));
    }

    #[test]
    fn missing_device_is_not_found() {
        let err = read_geometry("/nonexistent/disk").unwrap_err();
        assert!(matches!(err, SysError::DeviceNotFound(_)));
    }
}
