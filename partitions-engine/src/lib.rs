// SPDX-License-Identifier: GPL-3.0-only

//! Partition operation engine
//!
//! Plans and carries out structural changes to partitioned block devices:
//! - Boundary alignment (cylinder, mebibyte, device optimal)
//! - A registry of filesystem drivers, probed once from the installed tools
//! - Device layout reading with unallocated gaps
//! - The operation executor with resize/move and the block copy engine
//! - A background worker running batches in order
//!
//! Device access goes through the [`partitions_contracts::DiskBackend`]
//! trait; [`Executor::system`] wires up the real one from `partitions-sys`.

pub mod config;
pub mod device;
pub mod executor;
pub mod filesystems;
pub mod geometry;
pub mod registry;
pub mod worker;

pub use config::{ConfigError, EngineConfig};
pub use executor::Executor;
pub use registry::{Registry, SystemTools, ToolLocator};
pub use worker::{BatchEvent, BatchHandle, BatchReport, OperationResult, Worker};
