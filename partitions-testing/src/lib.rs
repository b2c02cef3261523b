// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the partition engine
//!
//! Everything here works on sparse image files, so tests can exercise the
//! real copy and erase paths without root or block devices.

pub mod backend;
pub mod driver;
pub mod errors;
pub mod image;
pub mod journal;
pub mod spec;

pub use backend::MemoryBackend;
pub use driver::FakeDriver;
pub use errors::{Result, TestingError};
pub use image::{DiskImage, FakeSignature};
pub use journal::{Journal, JournalEntry};
pub use spec::{ImageSpec, PartitionSpec};
