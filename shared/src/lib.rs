//! Shared types for the parking gate node
//!
//! Wire and record types used by both `gate-server` and the processes that
//! talk to it (vision sensors, the gate controller, admin tooling):
//! bus envelope and topics, event payloads, persisted records, request and
//! response DTOs, error codes.

pub mod error;
pub mod message;
pub mod models;
pub mod request;
pub mod response;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message bus re-exports (for convenient access)
pub use message::{BusMessage, topics};

pub use error::{ApiError, ErrorCode};
pub use request::{EntryRequest, ExitRequest, HistoryQuery, RegisterCredential, TopupRequest};
pub use response::{
    ApiResponse, BillingInfo, EntryResponse, ExitReceipt, SystemStatus, WalletBalance,
};
