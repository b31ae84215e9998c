use super::billing::BillingError;
use super::money::format_amount;
use super::storage::StorageError;
use rust_decimal::Decimal;
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Parking errors
///
/// Display strings are the user-facing reasons carried on `gateCommand`.
#[derive(Debug, Error)]
pub enum ParkingError {
    #[error("RFID not registered. Please register first.")]
    UnknownCredential(String),

    #[error("RFID tag already registered: {0}")]
    CredentialExists(String),

    #[error("User already has an active parking session")]
    DuplicateSession { tag_id: String, session_id: String },

    #[error("No active parking session found")]
    NoActiveSession(String),

    #[error("Parking session not found: {0}")]
    SessionNotFound(String),

    #[error("Selected slot is occupied")]
    SlotOccupied(String),

    #[error(
        "Insufficient balance. Required: {}, Available: {}",
        format_amount(*required),
        format_amount(*available)
    )]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Exit time is before entry time")]
    InvalidInterval { entry: i64, exit: i64 },

    /// 持久层不可达/失败，视同传输失败
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// 调用超时，结果未知
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },
}

impl ParkingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ParkingError::UnknownCredential(_) => ErrorCode::UnknownCredential,
            ParkingError::CredentialExists(_) => ErrorCode::CredentialAlreadyRegistered,
            ParkingError::DuplicateSession { .. } => ErrorCode::DuplicateSession,
            ParkingError::NoActiveSession(_) => ErrorCode::NoActiveSession,
            ParkingError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            ParkingError::SlotOccupied(_) => ErrorCode::SlotOccupied,
            ParkingError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            ParkingError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            ParkingError::InvalidInterval { .. } => ErrorCode::InvalidInterval,
            ParkingError::Storage(e) => classify_storage_error(e),
            ParkingError::TransportFailure(_) => ErrorCode::TransportFailure,
            ParkingError::Timeout { .. } => ErrorCode::TimeoutError,
        }
    }

    /// Store/bus/timeout failure: the outcome is unknown, callers must fail safe
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ParkingError::Storage(_)
                | ParkingError::TransportFailure(_)
                | ParkingError::Timeout { .. }
        )
    }

    /// Expected business outcome with a user-facing reason
    pub fn is_domain(&self) -> bool {
        !self.is_transport()
    }
}

/// 存储错误 → 错误码
fn classify_storage_error(e: &StorageError) -> ErrorCode {
    match e {
        // 数据无法解码，不是网络问题
        StorageError::Serialization(_) => ErrorCode::StorageError,
        _ => ErrorCode::TransportFailure,
    }
}

impl From<BillingError> for ParkingError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInterval { entry, exit } => {
                ParkingError::InvalidInterval { entry, exit }
            }
            BillingError::InvalidTariff(msg) => ParkingError::TransportFailure(msg),
        }
    }
}

// 提交失败归入存储错误
impl From<redb::CommitError> for ParkingError {
    fn from(err: redb::CommitError) -> Self {
        ParkingError::Storage(StorageError::Commit(err))
    }
}

impl From<ParkingError> for ApiError {
    fn from(err: ParkingError) -> Self {
        let code = err.code();
        if let ParkingError::Storage(e) = &err {
            tracing::error!(error = %e, error_code = ?code, "Storage error occurred");
        }
        ApiError::with_message(code, err.to_string())
    }
}

pub type ParkingResult<T> = Result<T, ParkingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_message() {
        let err = ParkingError::InsufficientBalance {
            required: Decimal::new(2000, 2),
            available: Decimal::new(550, 2),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance. Required: ₹20.00, Available: ₹5.50"
        );
        assert_eq!(ApiError::from(err).status(), 402);
    }

    #[test]
    fn test_classification() {
        assert!(ParkingError::UnknownCredential("T".into()).is_domain());
        assert!(ParkingError::TransportFailure("bus down".into()).is_transport());

        let timeout = ParkingError::Timeout {
            op: "record_exit",
            after_ms: 5000,
        };
        assert!(timeout.is_transport());
        assert_eq!(timeout.code(), ErrorCode::TimeoutError);
        assert_eq!(ApiError::from(timeout).status(), 504);

        let storage = ParkingError::from(StorageError::Storage(redb::StorageError::Io(
            std::io::Error::other("disk gone"),
        )));
        assert!(storage.is_transport());
        assert_eq!(storage.code(), ErrorCode::TransportFailure);
    }

    #[test]
    fn test_commit_failure_is_transport() {
        let err = ParkingError::from(redb::CommitError::Storage(redb::StorageError::Io(
            std::io::Error::other("fsync failed"),
        )));
        assert!(matches!(err, ParkingError::Storage(StorageError::Commit(_))));
        assert!(err.is_transport());
        assert_eq!(err.code(), ErrorCode::TransportFailure);
    }

    #[test]
    fn test_billing_error_maps_to_invalid_interval() {
        let err: ParkingError = BillingError::InvalidInterval { entry: 2, exit: 1 }.into();
        assert_eq!(err.code(), ErrorCode::InvalidInterval);
        assert!(err.is_domain());
    }
}
