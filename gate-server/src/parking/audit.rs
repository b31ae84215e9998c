//! 审计日志
//!
//! Audit records go two places: the `system_logs` table (queryable, newest
//! first) and the `audit` tracing target, which the logger routes to its own
//! rolling file.

use super::storage::{ParkingStorage, StorageResult};
use redb::WriteTransaction;
use shared::models::{LogLevel, SystemLog};

#[derive(Debug, Clone)]
pub struct AuditLog {
    storage: ParkingStorage,
}

impl AuditLog {
    pub fn new(storage: ParkingStorage) -> Self {
        Self { storage }
    }

    /// Persist a record in its own transaction
    ///
    /// Best-effort: a failed write is logged and swallowed so auditing never
    /// changes the outcome of the operation being audited.
    pub fn record(&self, log: SystemLog) {
        emit(&log);
        let result = self.storage.begin_write().and_then(|txn| {
            self.storage.append_log(&txn, &log)?;
            txn.commit()?;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                component = %log.component,
                event_type = %log.event_type,
                "Failed to persist audit record"
            );
        }
    }

    /// Persist a record as part of the caller's transaction
    pub fn record_in_txn(&self, txn: &WriteTransaction, log: &SystemLog) -> StorageResult<()> {
        self.storage.append_log(txn, log)?;
        emit(log);
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> StorageResult<Vec<SystemLog>> {
        self.storage.recent_logs(limit)
    }
}

fn emit(log: &SystemLog) {
    let tag_id = log.tag_id.as_deref().unwrap_or("");
    let session_id = log.session_id.as_deref().unwrap_or("");
    match log.level {
        LogLevel::Info => tracing::info!(
            target: "audit",
            component = %log.component,
            event_type = %log.event_type,
            tag_id,
            session_id,
            "{}",
            log.message
        ),
        LogLevel::Warning => tracing::warn!(
            target: "audit",
            component = %log.component,
            event_type = %log.event_type,
            tag_id,
            session_id,
            "{}",
            log.message
        ),
        LogLevel::Error => tracing::error!(
            target: "audit",
            component = %log.component,
            event_type = %log.event_type,
            tag_id,
            session_id,
            "{}",
            log.message
        ),
    }
}
