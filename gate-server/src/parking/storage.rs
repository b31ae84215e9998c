//! redb-based record store for the gate node
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `credentials` | `tag_id` | `Credential` | Registered tags + wallet balance |
//! | `sessions` | `session_id` | `ParkingSession` | All sessions (append-only history) |
//! | `active_sessions` | `tag_id` | `session_id` | At most one active session per tag |
//! | `transactions` | `transaction_id` | `Transaction` | Immutable wallet ledger |
//! | `credential_transactions` | `(tag_id, seq)` | `transaction_id` | Per-tag ledger index |
//! | `slots` | `slot_id` | `ParkingSlot` | Last known slot state |
//! | `slot_history` | `(slot_id, seq)` | `OccupancyHistoryEntry` | Occupancy transitions |
//! | `system_logs` | `(timestamp, seq)` | `SystemLog` | Audit trail |
//! | `counters` | name | `u64` | Sequence counters |
//!
//! Values are JSON. Every record is keyed by its application-level id, so
//! writing the same record twice is an idempotent upsert.
//!
//! # Durability
//!
//! redb commits are durable once `commit()` returns (copy-on-write with an
//! atomic root swap), so a power cut never leaves a half-applied exit.

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::models::{Credential, OccupancyHistoryEntry, ParkingSession, ParkingSlot, SystemLog, Transaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const CREDENTIALS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// key = tag_id, value = session_id
const ACTIVE_SESSIONS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("active_sessions");

const TRANSACTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// key = (tag_id, seq), value = transaction_id
const CREDENTIAL_TXNS_TABLE: TableDefinition<(&str, u64), &str> =
    TableDefinition::new("credential_transactions");

const SLOTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("slots");

const SLOT_HISTORY_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("slot_history");

const SYSTEM_LOGS_TABLE: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("system_logs");

const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const TXN_SEQ_KEY: &str = "txn_seq";
const HISTORY_SEQ_KEY: &str = "history_seq";
const LOG_SEQ_KEY: &str = "log_seq";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Errors worth one more read attempt
    pub fn is_transient(&self) -> bool {
        !matches!(self, StorageError::Serialization(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Run a read, retrying once on a transient failure
///
/// Only for reads: mutations are never retried.
pub fn retry_read<T>(op: impl Fn() -> StorageResult<T>) -> StorageResult<T> {
    match op() {
        Err(e) if e.is_transient() => {
            tracing::warn!(error = %e, "Storage read failed, retrying once");
            op()
        }
        other => other,
    }
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Record store backed by redb
#[derive(Clone)]
pub struct ParkingStorage {
    db: Arc<Database>,
}

impl std::fmt::Debug for ParkingStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParkingStorage").finish_non_exhaustive()
    }
}

impl ParkingStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests, ephemeral nodes)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CREDENTIALS_TABLE)?;
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(ACTIVE_SESSIONS_TABLE)?;
            let _ = write_txn.open_table(TRANSACTIONS_TABLE)?;
            let _ = write_txn.open_table(CREDENTIAL_TXNS_TABLE)?;
            let _ = write_txn.open_table(SLOTS_TABLE)?;
            let _ = write_txn.open_table(SLOT_HISTORY_TABLE)?;
            let _ = write_txn.open_table(SYSTEM_LOGS_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Counters ==========

    /// Increment and return a named counter (within transaction)
    fn next_seq(&self, txn: &WriteTransaction, key: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let current = table.get(key)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(key, next)?;
        Ok(next)
    }

    // ========== Credentials ==========

    pub fn put_credential(&self, txn: &WriteTransaction, credential: &Credential) -> StorageResult<()> {
        let mut table = txn.open_table(CREDENTIALS_TABLE)?;
        let value = encode(credential)?;
        table.insert(credential.tag_id.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_credential(&self, tag_id: &str) -> StorageResult<Option<Credential>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CREDENTIALS_TABLE)?;
        table.get(tag_id)?.map(|v| decode(v.value())).transpose()
    }

    pub fn get_credential_txn(
        &self,
        txn: &WriteTransaction,
        tag_id: &str,
    ) -> StorageResult<Option<Credential>> {
        let table = txn.open_table(CREDENTIALS_TABLE)?;
        table.get(tag_id)?.map(|v| decode(v.value())).transpose()
    }

    // ========== Sessions ==========

    pub fn put_session(&self, txn: &WriteTransaction, session: &ParkingSession) -> StorageResult<()> {
        let mut table = txn.open_table(SESSIONS_TABLE)?;
        let value = encode(session)?;
        table.insert(session.session_id.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StorageResult<Option<ParkingSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        table.get(session_id)?.map(|v| decode(v.value())).transpose()
    }

    pub fn get_session_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
    ) -> StorageResult<Option<ParkingSession>> {
        let table = txn.open_table(SESSIONS_TABLE)?;
        table.get(session_id)?.map(|v| decode(v.value())).transpose()
    }

    /// All sessions for a tag, oldest first
    pub fn sessions_for(&self, tag_id: &str) -> StorageResult<Vec<ParkingSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        let mut sessions = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let session: ParkingSession = decode(value.value())?;
            if session.tag_id == tag_id {
                sessions.push(session);
            }
        }
        sessions.sort_by_key(|s| s.entry_time);
        Ok(sessions)
    }

    // ========== Active Session Index ==========

    pub fn set_active_session(
        &self,
        txn: &WriteTransaction,
        tag_id: &str,
        session_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        table.insert(tag_id, session_id)?;
        Ok(())
    }

    pub fn clear_active_session(&self, txn: &WriteTransaction, tag_id: &str) -> StorageResult<()> {
        let mut table = txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        table.remove(tag_id)?;
        Ok(())
    }

    pub fn active_session_id(&self, tag_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        Ok(table.get(tag_id)?.map(|v| v.value().to_string()))
    }

    pub fn active_session_id_txn(
        &self,
        txn: &WriteTransaction,
        tag_id: &str,
    ) -> StorageResult<Option<String>> {
        let table = txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        Ok(table.get(tag_id)?.map(|v| v.value().to_string()))
    }

    /// All active sessions, newest first
    pub fn active_sessions(&self) -> StorageResult<Vec<ParkingSession>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        let sessions = read_txn.open_table(SESSIONS_TABLE)?;

        let mut active = Vec::new();
        for result in index.iter()? {
            let (_tag, session_id) = result?;
            if let Some(value) = sessions.get(session_id.value())? {
                active.push(decode::<ParkingSession>(value.value())?);
            }
        }
        active.sort_by(|a, b| b.entry_time.cmp(&a.entry_time));
        Ok(active)
    }

    pub fn count_active_sessions(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTIVE_SESSIONS_TABLE)?;
        Ok(table.len()?)
    }

    // ========== Transactions ==========

    /// Store a ledger entry and index it under its tag
    pub fn put_transaction(&self, txn: &WriteTransaction, record: &Transaction) -> StorageResult<()> {
        let seq = self.next_seq(txn, TXN_SEQ_KEY)?;
        {
            let mut table = txn.open_table(TRANSACTIONS_TABLE)?;
            let value = encode(record)?;
            table.insert(record.transaction_id.as_str(), value.as_slice())?;
        }
        let mut index = txn.open_table(CREDENTIAL_TXNS_TABLE)?;
        index.insert((record.tag_id.as_str(), seq), record.transaction_id.as_str())?;
        Ok(())
    }

    pub fn get_transaction(&self, transaction_id: &str) -> StorageResult<Option<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS_TABLE)?;
        table.get(transaction_id)?.map(|v| decode(v.value())).transpose()
    }

    /// Transactions for a tag, newest first (`limit = None` for all)
    pub fn transactions_for(&self, tag_id: &str, limit: Option<usize>) -> StorageResult<Vec<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(CREDENTIAL_TXNS_TABLE)?;
        let table = read_txn.open_table(TRANSACTIONS_TABLE)?;

        let mut records = Vec::new();
        let range = index.range((tag_id, 0u64)..=(tag_id, u64::MAX))?;
        for result in range.rev() {
            if limit.is_some_and(|max| records.len() >= max) {
                break;
            }
            let (_key, transaction_id) = result?;
            if let Some(value) = table.get(transaction_id.value())? {
                records.push(decode(value.value())?);
            }
        }
        Ok(records)
    }

    // ========== Slots ==========

    pub fn put_slot(&self, txn: &WriteTransaction, slot: &ParkingSlot) -> StorageResult<()> {
        let mut table = txn.open_table(SLOTS_TABLE)?;
        let value = encode(slot)?;
        table.insert(slot.slot_id.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_slot(&self, slot_id: &str) -> StorageResult<Option<ParkingSlot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SLOTS_TABLE)?;
        table.get(slot_id)?.map(|v| decode(v.value())).transpose()
    }

    pub fn list_slots(&self) -> StorageResult<Vec<ParkingSlot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SLOTS_TABLE)?;

        let mut slots = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            slots.push(decode(value.value())?);
        }
        Ok(slots)
    }

    pub fn append_slot_history(
        &self,
        txn: &WriteTransaction,
        entry: &OccupancyHistoryEntry,
    ) -> StorageResult<()> {
        let seq = self.next_seq(txn, HISTORY_SEQ_KEY)?;
        let mut table = txn.open_table(SLOT_HISTORY_TABLE)?;
        let value = encode(entry)?;
        table.insert((entry.slot_id.as_str(), seq), value.as_slice())?;
        Ok(())
    }

    /// Occupancy history for a slot, oldest first
    pub fn slot_history(&self, slot_id: &str) -> StorageResult<Vec<OccupancyHistoryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SLOT_HISTORY_TABLE)?;

        let mut entries = Vec::new();
        for result in table.range((slot_id, 0u64)..=(slot_id, u64::MAX))? {
            let (_key, value) = result?;
            entries.push(decode(value.value())?);
        }
        Ok(entries)
    }

    // ========== System Logs ==========

    pub fn append_log(&self, txn: &WriteTransaction, log: &SystemLog) -> StorageResult<()> {
        let seq = self.next_seq(txn, LOG_SEQ_KEY)?;
        let mut table = txn.open_table(SYSTEM_LOGS_TABLE)?;
        let value = encode(log)?;
        table.insert((log.timestamp, seq), value.as_slice())?;
        Ok(())
    }

    /// Most recent audit records, newest first
    pub fn recent_logs(&self, limit: usize) -> StorageResult<Vec<SystemLog>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SYSTEM_LOGS_TABLE)?;

        let mut logs = Vec::new();
        for result in table.iter()?.rev().take(limit) {
            let (_key, value) = result?;
            logs.push(decode(value.value())?);
        }
        Ok(logs)
    }
}
