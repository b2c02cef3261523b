// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("image io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid image spec: {reason}")]
    SpecInvalid { reason: String },
    #[error("table rejected partition {index}: {reason}")]
    TableRejected { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, TestingError>;
