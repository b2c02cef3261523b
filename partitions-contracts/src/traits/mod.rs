// SPDX-License-Identifier: GPL-3.0-only

pub mod backend;
pub mod filesystem;

pub use backend::{DiskBackend, DiskSession, FsProbe, default_partition_path};
pub use filesystem::FileSystemDriver;
