//! Request types for the gate node's request/response surface

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `POST entry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub tag_id: String,
    pub camera_id: String,
    /// Explicit slot binding (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
}

/// `POST exit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRequest {
    pub tag_id: String,
    pub camera_id: String,
}

/// Register a new credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredential {
    pub tag_id: String,
    pub name: String,
    pub vehicle_no: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Opening balance, written as a top-up transaction when positive
    #[serde(default, with = "rust_decimal::serde::float")]
    pub initial_balance: Decimal,
}

/// Credit a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupRequest {
    pub tag_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Transaction history query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub tag_id: String,
    /// Max records, newest first (default: 20)
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}
