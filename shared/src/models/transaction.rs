//! Wallet Transaction Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Deduction,
    Refund,
    Adjustment,
}

/// Transaction status (ledger-written records are always completed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Completed,
}

/// Immutable wallet ledger entry
///
/// Invariant: `balance_after == balance_before + amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub tag_id: String,
    /// Signed delta: positive = credit, negative = debit
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub session_id: Option<String>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub status: TransactionStatus,
    pub timestamp: i64,
}
