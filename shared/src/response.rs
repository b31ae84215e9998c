//! Response types for the gate node's request/response surface

use crate::error::{ApiError, ErrorCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unified response envelope
///
/// ```json
/// { "code": 0, "message": "Success", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: ErrorCode::Success,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(err: &ApiError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl<T> From<Result<T, ApiError>> for ApiResponse<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::error(&err),
        }
    }
}

/// `POST entry` success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub session_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub entry_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
}

/// `POST exit` success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReceipt {
    pub session_id: String,
    pub entry_time: i64,
    pub exit_time: i64,
    pub duration_minutes: i64,
    pub duration_display: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_charged: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_before: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
    /// Hourly tariff applied
    #[serde(with = "rust_decimal::serde::float")]
    pub tariff_rate: Decimal,
    pub transaction_id: String,
}

/// Wallet balance query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub tag_id: String,
    pub name: String,
    pub vehicle_no: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub updated_at: i64,
}

/// Facility status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub any_available: bool,
    pub total_slots: u32,
    pub occupied_slots: u32,
    pub free_slots: u32,
    pub active_sessions: u32,
    /// Distinct cameras that have reported at least once
    pub cameras: Vec<String>,
    /// Last status reported by the gate controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_status: Option<String>,
    pub timestamp: i64,
}

/// Tariff currently in force
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    #[serde(with = "rust_decimal::serde::float")]
    pub tariff_per_hour: Decimal,
    pub billing_unit_minutes: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub min_charge: Decimal,
    pub grace_period_minutes: u32,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub max_daily_charge: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_amounts_are_numbers() {
        let receipt = ExitReceipt {
            session_id: "SESS_1".into(),
            entry_time: 0,
            exit_time: 1_200_000,
            duration_minutes: 20,
            duration_display: "20 minutes".into(),
            amount_charged: Decimal::new(1000, 2),
            balance_before: Decimal::new(5000, 2),
            balance_after: Decimal::new(4000, 2),
            tariff_rate: Decimal::new(10, 0),
            transaction_id: "TXN_1".into(),
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["amountCharged"], 10.0);
        assert_eq!(json["balanceAfter"], 40.0);
        assert_eq!(json["durationDisplay"], "20 minutes");
    }

    #[test]
    fn test_api_response_from_error() {
        let err = ApiError::with_message(ErrorCode::InsufficientBalance, "Insufficient balance");
        let resp: ApiResponse<EntryResponse> = Err(err).into();
        assert!(!resp.is_success());
        assert_eq!(resp.code, ErrorCode::InsufficientBalance);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["code"], 4001);
        assert!(json.get("data").is_none());
    }
}
