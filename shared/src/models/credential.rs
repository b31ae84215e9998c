//! Credential Model (RFID 用户)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Registered credential with its wallet
///
/// `balance` is only ever changed together with a [`Transaction`](super::Transaction)
/// record, so it always equals the sum of the credential's transaction amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// RFID tag id (primary key)
    pub tag_id: String,
    pub name: String,
    pub vehicle_no: String,
    pub balance: Decimal,
    pub contact: Option<String>,
    pub email: Option<String>,
    /// Inactive credentials are treated as unregistered at the gate
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Credential {
    pub fn can_enter(&self) -> bool {
        self.is_active
    }
}
