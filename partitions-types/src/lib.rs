// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for partition management
//!
//! This crate defines the single source of truth for the engine's data model.
//! These models are used throughout the stack:
//!
//! - **partitions-sys**: Reads and writes [`PartitionTable`] values to real devices
//! - **partitions-engine**: Plans and executes [`Operation`]s against a [`Device`]
//! - **partitions-cli**: Serializes batches and renders [`OperationDetail`] trees
//!
//! ## Architecture
//!
//! ### Flat layout (for planning)
//! - `Device` → physical device geometry plus its ordered `Partition` list,
//!   including synthetic unallocated gaps
//! - `PartitionTable` → the raw table entries as stored on disk
//!
//! ### Tree (for progress reporting)
//! - `OperationDetail` → append-only step tree written by the engine

pub mod common;
pub mod detail;
pub mod device;
pub mod filesystem;
pub mod flags;
pub mod operation;
pub mod partition;
pub mod partition_types;
pub mod table;

pub use common::{
    GIBIBYTE, KIBIBYTE, MEBIBYTE, Sector, TEBIBYTE, format_bytes, format_bytes_exact,
    format_size, sectors_for_bytes,
};
pub use detail::{
    CopyProgress, DetailChange, DetailEvent, DetailListener, DetailStatus, OperationDetail,
    format_duration,
};
pub use device::{Device, DeviceGeometry, TableType};
pub use filesystem::{FsAction, FsCapabilities, FsKind, Support};
pub use flags::PartitionFlag;
pub use operation::{Operation, OperationKind, OperationState, ResizeAction};
pub use partition::{Alignment, Partition, PartitionKind, PartitionStatus};
pub use partition_types::{
    flag_for_type_code, fs_hint_for_type_code, is_extended_type, normalize_type_code,
    type_code_for_flag, type_code_for_fs,
};
pub use table::{FIRST_LOGICAL, NewEntry, PartitionTable, TableEntry, TableError};
