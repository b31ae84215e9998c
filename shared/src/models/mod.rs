//! Persisted record models
//!
//! Stored as JSON in the gate node's redb tables and returned verbatim by
//! query operations. Every record is keyed by an application-level id
//! (tag id, session id, transaction id, slot id) so upserts are idempotent.
//! Timestamps are UTC milliseconds.

pub mod credential;
pub mod session;
pub mod slot;
pub mod system_log;
pub mod transaction;

// Re-exports
pub use credential::*;
pub use session::*;
pub use slot::*;
pub use system_log::*;
pub use transaction::*;
