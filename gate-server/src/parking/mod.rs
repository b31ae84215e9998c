//! Parking core for the gate node
//!
//! - **slots**: Slot Aggregate, per-slot occupancy and facility availability
//! - **billing**: pure fee calculation from entry/exit time and tariff
//! - **wallet**: per-credential balance with an append-only ledger
//! - **sessions**: session state machine, credential registry, exit workflow
//! - **storage**: redb record store shared by all of the above
//! - **service**: async request/response surface used by the event router
//!
//! # Data Flow
//!
//! ```text
//! occupancy ──▶ SlotAggregate ──▶ AvailabilitySummary
//!
//! tagscan(entry) ──▶ SessionManager::record_entry ──▶ Session(ACTIVE)
//! tagscan(exit)  ──▶ SessionManager::record_exit
//!                        ├─ calculate_fee
//!                        ├─ WalletLedger::debit_in_txn ─┐
//!                        └─ Session(COMPLETED) ─────────┴─ one redb commit
//! ```

pub mod audit;
pub mod billing;
pub mod error;
pub mod locks;
pub mod money;
pub mod service;
pub mod sessions;
pub mod slots;
pub mod storage;
pub mod wallet;

// Re-exports
pub use audit::AuditLog;
pub use billing::{BillingError, FeeBreakdown, Tariff, calculate_fee, format_duration};
pub use error::{ParkingError, ParkingResult};
pub use service::{LocalParkingService, ParkingService};
pub use sessions::SessionManager;
pub use slots::{AvailabilitySummary, SlotAggregate, SlotTransition};
pub use storage::{ParkingStorage, StorageError};
pub use wallet::{EntryMeta, WalletLedger};
