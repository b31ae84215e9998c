//! Error codes shared across the gate node and its clients
//!
//! - [`ErrorCode`]: numeric codes carried on the wire
//! - [`ApiError`]: code + message pair returned by request/response surfaces
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Credential errors
//! - 2xxx: Session errors
//! - 3xxx: Slot errors
//! - 4xxx: Wallet / billing errors
//! - 9xxx: System errors

mod codes;

pub use codes::{ErrorCode, InvalidErrorCode};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned to request/response callers
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// HTTP-style status of the underlying code
    pub fn status(&self) -> u16 {
        self.code.status()
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}
