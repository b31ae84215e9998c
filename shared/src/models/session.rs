//! Parking Session Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One parked-vehicle visit
///
/// Exit fields (`exit_*`, `duration_*`, `amount_charged`, `balance_after`,
/// `transaction_id`) stay `None` until the session is completed and are
/// written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSession {
    pub session_id: String,
    pub tag_id: String,
    pub vehicle_no: String,
    pub status: SessionStatus,
    pub entry_time: i64,
    pub entry_camera_id: String,
    /// Slot bound at entry (explicit API binding only)
    pub entry_slot_id: Option<String>,
    /// Wallet balance when the session started
    pub balance_at_entry: Decimal,
    pub exit_time: Option<i64>,
    pub exit_camera_id: Option<String>,
    pub duration_minutes: Option<i64>,
    pub duration_display: Option<String>,
    pub amount_charged: Option<Decimal>,
    pub balance_before_exit: Option<Decimal>,
    pub balance_after_exit: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ParkingSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
