// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod traits;

pub use error::{EngineError, ErrorInfo, ErrorKind, Result};
pub use traits::{DiskBackend, DiskSession, FileSystemDriver, FsProbe, default_partition_path};
