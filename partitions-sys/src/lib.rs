// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for partition management
//!
//! This crate talks to the kernel and to util-linux directly:
//! - Device geometry from sysfs
//! - Partition table reads and writes through `sfdisk`
//! - Exclusive device locking and settle polling after a commit
//! - Positioned block I/O for the copy engine
//! - Filesystem signature probing (`blkid`) and dm-crypt mappings (`dmsetup`)
//!
//! These operations require elevated privileges on real block devices.
//! Regular files are accepted everywhere a device path is, which is how
//! disk images and the test suite use this crate.

pub mod backend;
pub mod blkid;
pub mod blockio;
pub mod command;
pub mod dmsetup;
pub mod error;
pub mod lock;
pub mod settle;
pub mod sfdisk;
pub mod sysfs;

pub use backend::{SysBackend, SysSession};
pub use blockio::{
    BlockCopier, Blocks, CopyDirection, CopyError, CopyRequest, erase_signatures, open_for_read,
    open_for_write,
};
pub use command::{CommandOutput, command_line, run_command, run_command_output, tool_available};
pub use dmsetup::CryptMapping;
pub use error::{Result, SysError};
pub use lock::DeviceLock;
