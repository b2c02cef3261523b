// SPDX-License-Identifier: GPL-3.0-only

use partitions_contracts::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("{command} failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("Failed parsing output of '{command}': {detail}")]
    Parse { command: String, detail: String },

    #[error("{device} did not settle within {waited:?}")]
    Timeout { device: String, waited: Duration },

    #[error("Operation cancelled")]
    Cancelled,
}

impl SysError {
    pub fn parse(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

impl From<SysError> for EngineError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Io(e) => EngineError::Io(e.to_string()),
            SysError::PermissionDenied(msg) => EngineError::Io(format!("Permission denied: {msg}")),
            SysError::DeviceNotFound(device) => EngineError::DeviceNotFound(device),
            SysError::DeviceBusy(device) => EngineError::DeviceBusy(device),
            SysError::CommandFailed { command, output } => {
                EngineError::DriverFailure { command, output }
            }
            SysError::Parse { command, detail } => EngineError::DriverFailure {
                command,
                output: detail,
            },
            SysError::Timeout { device, waited } => EngineError::CommitTimeout { device, waited },
            SysError::Cancelled => EngineError::Cancelled,
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
