// SPDX-License-Identifier: GPL-3.0-only

use partitions_types::{FsAction, FsKind, TableError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlignmentImpossible,
    CapabilityMissing,
    DeviceBusy,
    DeviceNotFound,
    CommitTimeout,
    DriverFailure,
    Io,
    Overlap,
    InvalidInput,
    Cancelled,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::DeviceNotFound => 404,
            Self::Overlap => 409,
            Self::AlignmentImpossible => 422,
            Self::DeviceBusy => 423,
            Self::Cancelled => 499,
            Self::Io => 500,
            Self::CapabilityMissing => 501,
            Self::DriverFailure => 502,
            Self::CommitTimeout => 504,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Alignment impossible: {0}")]
    AlignmentImpossible(String),

    #[error("Cannot {action} {fs} file systems: no driver support")]
    CapabilityMissing { fs: FsKind, action: FsAction },

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("{device} did not settle within {waited:?}")]
    CommitTimeout { device: String, waited: Duration },

    #[error("{command} failed: {output}")]
    DriverFailure { command: String, output: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Overlap: {0}")]
    Overlap(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn capability_missing(fs: FsKind, action: FsAction) -> Self {
        Self::CapabilityMissing { fs, action }
    }

    pub fn driver_failure(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::DriverFailure {
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlignmentImpossible(_) => ErrorKind::AlignmentImpossible,
            Self::CapabilityMissing { .. } => ErrorKind::CapabilityMissing,
            Self::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Self::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Self::CommitTimeout { .. } => ErrorKind::CommitTimeout,
            Self::DriverFailure { .. } => ErrorKind::DriverFailure,
            Self::Io(_) => ErrorKind::Io,
            Self::Overlap(_) => ErrorKind::Overlap,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<TableError> for EngineError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Overlap { .. } | TableError::OrphanedLogical(_) => {
                Self::Overlap(err.to_string())
            }
            TableError::OutOfBounds { .. } | TableError::OutsideExtended { .. } => {
                Self::AlignmentImpossible(err.to_string())
            }
            _ => Self::InvalidInput(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Serializable snapshot of an [`EngineError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub code: u16,
    pub message: String,
}

impl From<&EngineError> for ErrorInfo {
    fn from(err: &EngineError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            code: kind.code(),
            message: err.to_string(),
        }
    }
}
