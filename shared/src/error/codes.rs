//! Error codes for the parking gate node
//!
//! Codes are grouped by category:
//! - 0xxx: General errors
//! - 1xxx: Credential errors
//! - 2xxx: Session errors
//! - 3xxx: Slot errors
//! - 4xxx: Wallet / billing errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level error code
///
/// Serialized as a bare `u16` so sensors, the gate controller and admin tools
/// can match on it without sharing this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 1xxx: Credential ====================
    /// Tag is not registered (or has been deactivated)
    UnknownCredential = 1001,
    /// Tag is already registered
    CredentialAlreadyRegistered = 1002,

    // ==================== 2xxx: Session ====================
    /// Credential already has an active session
    DuplicateSession = 2001,
    /// Credential has no active session
    NoActiveSession = 2002,
    /// Session id does not exist
    SessionNotFound = 2003,

    // ==================== 3xxx: Slot ====================
    /// Requested slot is occupied
    SlotOccupied = 3001,
    /// No free slot in the facility
    NoSlotsAvailable = 3002,

    // ==================== 4xxx: Wallet / Billing ====================
    /// Wallet balance does not cover the amount
    InsufficientBalance = 4001,
    /// Amount must be positive
    InvalidAmount = 4002,
    /// Exit time precedes entry time
    InvalidInterval = 4003,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Persistence layer failure
    StorageError = 9002,
    /// Bus / store / actuator unreachable
    TransportFailure = 9003,
    /// Dependency timed out
    TimeoutError = 9004,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Expected business outcome (not a defect, never retried)
    pub const fn is_domain(&self) -> bool {
        let code = self.code();
        code >= 1000 && code < 9000
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InvalidRequest => "Invalid request",

            ErrorCode::UnknownCredential => "RFID not registered. Please register first.",
            ErrorCode::CredentialAlreadyRegistered => "RFID tag already registered",

            ErrorCode::DuplicateSession => "User already has an active parking session",
            ErrorCode::NoActiveSession => "No active parking session found",
            ErrorCode::SessionNotFound => "Parking session not found",

            ErrorCode::SlotOccupied => "Selected slot is occupied",
            ErrorCode::NoSlotsAvailable => "No parking slots available",

            ErrorCode::InsufficientBalance => "Insufficient balance",
            ErrorCode::InvalidAmount => "Amount must be positive",
            ErrorCode::InvalidInterval => "Exit time is before entry time",

            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StorageError => "Storage error",
            ErrorCode::TransportFailure => "Transport failure",
            ErrorCode::TimeoutError => "Operation timed out",
        }
    }

    /// HTTP-style status for request/response transports
    ///
    /// Insufficient funds is reported as 402 so callers can tell it apart
    /// from a generic failure.
    pub const fn status(&self) -> u16 {
        match self {
            ErrorCode::Success => 200,
            ErrorCode::NotFound | ErrorCode::UnknownCredential | ErrorCode::SessionNotFound => 404,
            ErrorCode::CredentialAlreadyRegistered
            | ErrorCode::DuplicateSession
            | ErrorCode::SlotOccupied
            | ErrorCode::NoSlotsAvailable => 409,
            ErrorCode::InsufficientBalance => 402,
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidRequest
            | ErrorCode::NoActiveSession
            | ErrorCode::InvalidAmount
            | ErrorCode::InvalidInterval => 400,
            ErrorCode::TransportFailure => 503,
            ErrorCode::TimeoutError => 504,
            ErrorCode::Unknown | ErrorCode::InternalError | ErrorCode::StorageError => 500,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            5 => Ok(ErrorCode::InvalidRequest),

            1001 => Ok(ErrorCode::UnknownCredential),
            1002 => Ok(ErrorCode::CredentialAlreadyRegistered),

            2001 => Ok(ErrorCode::DuplicateSession),
            2002 => Ok(ErrorCode::NoActiveSession),
            2003 => Ok(ErrorCode::SessionNotFound),

            3001 => Ok(ErrorCode::SlotOccupied),
            3002 => Ok(ErrorCode::NoSlotsAvailable),

            4001 => Ok(ErrorCode::InsufficientBalance),
            4002 => Ok(ErrorCode::InvalidAmount),
            4003 => Ok(ErrorCode::InvalidInterval),

            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StorageError),
            9003 => Ok(ErrorCode::TransportFailure),
            9004 => Ok(ErrorCode::TimeoutError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
