// SPDX-License-Identifier: GPL-3.0-only

//! Exclusive device ownership
//!
//! Follows the udev convention: a tool that rewrites a disk holds a BSD
//! `LOCK_EX` lock on the whole-disk node so udev does not probe it halfway.

use std::fs::File;
use std::os::fd::AsRawFd;

use crate::{Result, SysError};

/// Holds the device open and locked until dropped.
#[derive(Debug)]
pub struct DeviceLock {
    path: String,
    file: File,
}

impl DeviceLock {
    /// Take a non-blocking exclusive lock; a held lock means another tool
    /// owns the device.
    pub fn acquire(path: &str, file: File) -> Result<Self> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(SysError::DeviceBusy(path.to_string()));
            }
            return Err(SysError::Io(err));
        }
        tracing::debug!("Locked {}", path);
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!("Unlocked {}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_reports_busy() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let path = image.path().to_string_lossy().to_string();

        let first = DeviceLock::acquire(&path, File::open(&path).unwrap()).unwrap();
        let err = DeviceLock::acquire(&path, File::open(&path).unwrap()).unwrap_err();
        assert!(matches!(err, SysError::DeviceBusy(_)));

        drop(first);
        DeviceLock::acquire(&path, File::open(&path).unwrap()).unwrap();
    }
}
