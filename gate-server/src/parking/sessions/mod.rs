//! Session State Machine - 停车会话
//!
//! ```text
//! NONE ──record_entry──▶ ACTIVE ──record_exit───▶ COMPLETED
//!                          │
//!                          └────cancel_session──▶ CANCELLED
//! ```
//!
//! Each transition runs under the credential lock and commits in a single
//! redb write transaction. The `active_sessions` index (tag → session id) is
//! written in the same transaction as the session record, so at most one
//! ACTIVE session exists per credential.
//!
//! Exit is all-or-nothing: the debit, its ledger entry, the completed session
//! and the index removal commit together. On insufficient balance the
//! transaction is dropped and the session stays ACTIVE with its slot held.

use super::audit::AuditLog;
use super::billing::{Tariff, calculate_fee};
use super::error::{ParkingError, ParkingResult};
use super::locks::CredentialLocks;
use super::money::{format_amount, round_money};
use super::slots::{AvailabilitySummary, SlotAggregate, SlotError};
use super::storage::{ParkingStorage, retry_read};
use super::wallet::{EntryMeta, WalletLedger};
use crate::utils::Clock;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::models::{
    Credential, ParkingSession, SessionStatus, SystemLog, Transaction, TransactionType,
};
use shared::request::{EntryRequest, ExitRequest, RegisterCredential, TopupRequest};
use shared::response::{BillingInfo, EntryResponse, ExitReceipt, SystemStatus};
use std::sync::Arc;

const COMPONENT: &str = "sessions";

/// Payment method recorded on exit deductions
const WALLET_PAYMENT: &str = "wallet";

/// Sessions, credentials and the exit workflow
#[derive(Debug)]
pub struct SessionManager {
    storage: ParkingStorage,
    slots: Arc<SlotAggregate>,
    wallet: WalletLedger,
    tariff: Tariff,
    locks: Arc<CredentialLocks>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl SessionManager {
    pub fn new(
        storage: ParkingStorage,
        slots: Arc<SlotAggregate>,
        tariff: Tariff,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = Arc::new(CredentialLocks::new());
        let audit = AuditLog::new(storage.clone());
        let wallet = WalletLedger::new(storage.clone(), locks.clone(), clock.clone(), audit.clone());
        Self {
            storage,
            slots,
            wallet,
            tariff,
            locks,
            clock,
            audit,
        }
    }

    pub fn wallet(&self) -> &WalletLedger {
        &self.wallet
    }

    pub fn slots(&self) -> &Arc<SlotAggregate> {
        &self.slots
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn tariff(&self) -> &Tariff {
        &self.tariff
    }

    pub fn billing_info(&self) -> BillingInfo {
        self.tariff.info()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn availability(&self) -> AvailabilitySummary {
        self.slots.summary()
    }

    // ========== Credentials ==========

    /// Register a tag with an optional opening balance
    ///
    /// The opening balance is written as a `topup` so the ledger sums to
    /// the stored balance from the first record.
    pub fn register_credential(&self, req: &RegisterCredential) -> ParkingResult<Credential> {
        let initial_balance = round_money(req.initial_balance);
        if initial_balance.is_sign_negative() && !initial_balance.is_zero() {
            return Err(ParkingError::InvalidAmount(initial_balance));
        }

        let _guard = self.locks.lock(&req.tag_id);
        let at = self.clock.now_millis();

        let txn = self.storage.begin_write()?;
        if self.storage.get_credential_txn(&txn, &req.tag_id)?.is_some() {
            return Err(ParkingError::CredentialExists(req.tag_id.clone()));
        }

        let mut credential = Credential {
            tag_id: req.tag_id.clone(),
            name: req.name.clone(),
            vehicle_no: req.vehicle_no.clone(),
            balance: Decimal::ZERO,
            contact: req.contact.clone(),
            email: req.email.clone(),
            is_active: true,
            created_at: at,
            updated_at: at,
        };
        self.storage.put_credential(&txn, &credential)?;
        if initial_balance > Decimal::ZERO {
            self.wallet.post(
                &txn,
                &mut credential,
                initial_balance,
                TransactionType::Topup,
                EntryMeta {
                    payment_method: Some("initial".to_string()),
                    notes: Some("Opening balance".to_string()),
                    ..Default::default()
                },
                at,
            )?;
        }
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(
                COMPONENT,
                "register",
                format!("Registered {} ({})", credential.name, credential.vehicle_no),
            )
            .at(at)
            .tag(&credential.tag_id),
        )?;
        txn.commit()?;

        tracing::info!(tag_id = %credential.tag_id, balance = %credential.balance, "Credential registered");
        Ok(credential)
    }

    pub fn get_credential(&self, tag_id: &str) -> ParkingResult<Credential> {
        retry_read(|| self.storage.get_credential(tag_id))?
            .ok_or_else(|| ParkingError::UnknownCredential(tag_id.to_string()))
    }

    /// Block a tag at the entry gate; it can still exit and use its wallet
    pub fn deactivate_credential(&self, tag_id: &str) -> ParkingResult<Credential> {
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let txn = self.storage.begin_write()?;
        let mut credential = self
            .storage
            .get_credential_txn(&txn, tag_id)?
            .ok_or_else(|| ParkingError::UnknownCredential(tag_id.to_string()))?;
        credential.is_active = false;
        credential.updated_at = at;
        self.storage.put_credential(&txn, &credential)?;
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(COMPONENT, "deactivate", "Credential deactivated")
                .at(at)
                .tag(tag_id),
        )?;
        txn.commit()?;
        Ok(credential)
    }

    pub fn topup(&self, req: &TopupRequest) -> ParkingResult<Transaction> {
        self.wallet.credit(
            &req.tag_id,
            req.amount,
            EntryMeta {
                payment_method: req.payment_method.clone(),
                payment_reference: req.payment_reference.clone(),
                ..Default::default()
            },
        )
    }

    // ========== Entry ==========

    /// NONE → ACTIVE
    pub fn record_entry(&self, req: &EntryRequest) -> ParkingResult<EntryResponse> {
        let tag_id = req.tag_id.as_str();
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let credential = match retry_read(|| self.storage.get_credential(tag_id))? {
            Some(credential) if credential.can_enter() => credential,
            _ => {
                let err = ParkingError::UnknownCredential(tag_id.to_string());
                self.audit_denial("entry_denied", &err, tag_id, None, at);
                return Err(err);
            }
        };

        if let Some(existing) = retry_read(|| self.storage.active_session_id(tag_id))? {
            let err = ParkingError::DuplicateSession {
                tag_id: tag_id.to_string(),
                session_id: existing.clone(),
            };
            self.audit_denial("entry_denied", &err, tag_id, Some(&existing), at);
            return Err(err);
        }

        let session_id = shared::util::session_id(at);
        if let Some(slot_id) = &req.slot_id {
            match self.slots.try_claim(slot_id, &req.camera_id, &session_id, at) {
                Ok(_) => {}
                Err(SlotError::Occupied(slot)) => {
                    let err = ParkingError::SlotOccupied(slot);
                    self.audit_denial("entry_denied", &err, tag_id, None, at);
                    return Err(err);
                }
                Err(SlotError::Storage(e)) => return Err(e.into()),
            }
        }

        let session = ParkingSession {
            session_id: session_id.clone(),
            tag_id: tag_id.to_string(),
            vehicle_no: credential.vehicle_no.clone(),
            status: SessionStatus::Active,
            entry_time: at,
            entry_camera_id: req.camera_id.clone(),
            entry_slot_id: req.slot_id.clone(),
            balance_at_entry: credential.balance,
            exit_time: None,
            exit_camera_id: None,
            duration_minutes: None,
            duration_display: None,
            amount_charged: None,
            balance_before_exit: None,
            balance_after_exit: None,
            transaction_id: None,
            notes: None,
            created_at: at,
            updated_at: at,
        };

        if let Err(e) = self.commit_entry(&session) {
            // the slot claim is already durable, undo it
            if let Some(slot_id) = &req.slot_id
                && let Err(release_err) = self.slots.release(slot_id, &session_id, at)
            {
                tracing::error!(
                    slot_id = %slot_id,
                    session_id = %session_id,
                    error = %release_err,
                    "Failed to release slot after aborted entry"
                );
            }
            self.audit.record(
                SystemLog::error(COMPONENT, "entry_failed", e.to_string())
                    .at(at)
                    .tag(tag_id),
            );
            return Err(e);
        }

        tracing::info!(
            tag_id,
            session_id = %session_id,
            slot_id = ?req.slot_id,
            camera_id = %req.camera_id,
            "Entry recorded"
        );

        Ok(EntryResponse {
            session_id,
            balance: credential.balance,
            entry_time: at,
            slot_id: req.slot_id.clone(),
        })
    }

    fn commit_entry(&self, session: &ParkingSession) -> ParkingResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_session(&txn, session)?;
        self.storage
            .set_active_session(&txn, &session.tag_id, &session.session_id)?;
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(
                COMPONENT,
                "entry",
                format!("Entry granted for {}", session.tag_id),
            )
            .at(session.entry_time)
            .tag(&session.tag_id)
            .session(&session.session_id),
        )?;
        txn.commit()?;
        Ok(())
    }

    // ========== Exit ==========

    /// ACTIVE → COMPLETED
    pub fn record_exit(&self, req: &ExitRequest) -> ParkingResult<ExitReceipt> {
        let tag_id = req.tag_id.as_str();
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let Some(session_id) = retry_read(|| self.storage.active_session_id(tag_id))? else {
            let err = ParkingError::NoActiveSession(tag_id.to_string());
            self.audit_denial("exit_denied", &err, tag_id, None, at);
            return Err(err);
        };

        let txn = self.storage.begin_write()?;
        let mut session = self
            .storage
            .get_session_txn(&txn, &session_id)?
            .ok_or_else(|| ParkingError::SessionNotFound(session_id.clone()))?;
        let mut credential = self.load_credential_txn(&txn, tag_id)?;
        let fee = match calculate_fee(session.entry_time, at, &self.tariff) {
            Ok(fee) => fee,
            Err(e) => {
                drop(txn);
                let err = ParkingError::from(e);
                self.audit_denial("exit_denied", &err, tag_id, Some(&session_id), at);
                return Err(err);
            }
        };

        let meta = EntryMeta {
            session_id: Some(session_id.clone()),
            payment_method: Some(WALLET_PAYMENT.to_string()),
            notes: Some(format!("Parking fee for {}", fee.duration_display)),
            ..Default::default()
        };
        let record = match self.wallet.debit_in_txn(&txn, &mut credential, fee.amount, meta, at) {
            Ok(record) => record,
            Err(e) => {
                drop(txn);
                self.audit_denial("exit_denied", &e, tag_id, Some(&session_id), at);
                return Err(e);
            }
        };

        session.status = SessionStatus::Completed;
        session.exit_time = Some(at);
        session.exit_camera_id = Some(req.camera_id.clone());
        session.duration_minutes = Some(fee.duration_minutes);
        session.duration_display = Some(fee.duration_display.clone());
        session.amount_charged = Some(fee.amount);
        session.balance_before_exit = Some(record.balance_before);
        session.balance_after_exit = Some(record.balance_after);
        session.transaction_id = Some(record.transaction_id.clone());
        session.updated_at = at;

        self.storage.put_session(&txn, &session)?;
        self.storage.clear_active_session(&txn, tag_id)?;
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(
                COMPONENT,
                "exit",
                format!("Exit granted. Charged: {}", format_amount(fee.amount)),
            )
            .at(at)
            .tag(tag_id)
            .session(&session_id)
            .details(serde_json::json!({
                "durationMinutes": fee.duration_minutes,
                "amount": fee.amount.to_string(),
                "transactionId": record.transaction_id,
            })),
        )?;
        txn.commit()?;

        self.release_slot(&session, at);

        tracing::info!(
            tag_id,
            session_id = %session_id,
            transaction_id = %record.transaction_id,
            amount = %fee.amount,
            duration_minutes = fee.duration_minutes,
            "Exit recorded"
        );

        Ok(ExitReceipt {
            session_id,
            entry_time: session.entry_time,
            exit_time: at,
            duration_minutes: fee.duration_minutes,
            duration_display: fee.duration_display,
            amount_charged: fee.amount,
            balance_before: record.balance_before,
            balance_after: record.balance_after,
            tariff_rate: fee.tariff_applied,
            transaction_id: record.transaction_id,
        })
    }

    // ========== Cancel ==========

    /// ACTIVE → CANCELLED, no charge
    pub fn cancel_session(&self, tag_id: &str, note: Option<String>) -> ParkingResult<ParkingSession> {
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let txn = self.storage.begin_write()?;
        let session_id = self
            .storage
            .active_session_id_txn(&txn, tag_id)?
            .ok_or_else(|| ParkingError::NoActiveSession(tag_id.to_string()))?;
        let mut session = self
            .storage
            .get_session_txn(&txn, &session_id)?
            .ok_or_else(|| ParkingError::SessionNotFound(session_id.clone()))?;

        session.status = SessionStatus::Cancelled;
        session.notes = note;
        session.updated_at = at;
        self.storage.put_session(&txn, &session)?;
        self.storage.clear_active_session(&txn, tag_id)?;
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(COMPONENT, "cancel", "Session cancelled")
                .at(at)
                .tag(tag_id)
                .session(&session_id),
        )?;
        txn.commit()?;

        self.release_slot(&session, at);
        tracing::info!(tag_id, session_id = %session_id, "Session cancelled");
        Ok(session)
    }

    // ========== Queries ==========

    pub fn active_session(&self, tag_id: &str) -> ParkingResult<Option<ParkingSession>> {
        let Some(session_id) = retry_read(|| self.storage.active_session_id(tag_id))? else {
            return Ok(None);
        };
        Ok(retry_read(|| self.storage.get_session(&session_id))?)
    }

    /// Active sessions, newest first
    pub fn active_sessions(&self) -> ParkingResult<Vec<ParkingSession>> {
        Ok(retry_read(|| self.storage.active_sessions())?)
    }

    pub fn get_session(&self, session_id: &str) -> ParkingResult<ParkingSession> {
        retry_read(|| self.storage.get_session(session_id))?
            .ok_or_else(|| ParkingError::SessionNotFound(session_id.to_string()))
    }

    /// Every session of a tag, oldest first
    pub fn session_history(&self, tag_id: &str) -> ParkingResult<Vec<ParkingSession>> {
        Ok(retry_read(|| self.storage.sessions_for(tag_id))?)
    }

    pub fn system_status(&self, gate_status: Option<String>) -> ParkingResult<SystemStatus> {
        let summary = self.slots.summary();
        let active = retry_read(|| self.storage.count_active_sessions())?;
        Ok(SystemStatus {
            any_available: summary.any_available,
            total_slots: summary.total_slots,
            occupied_slots: summary.occupied_slots(),
            free_slots: summary.free_slots,
            active_sessions: u32::try_from(active).unwrap_or(u32::MAX),
            cameras: self.slots.cameras(),
            gate_status,
            timestamp: self.clock.now_millis(),
        })
    }

    // ========== Helpers ==========

    fn load_credential_txn(&self, txn: &WriteTransaction, tag_id: &str) -> ParkingResult<Credential> {
        self.storage
            .get_credential_txn(txn, tag_id)?
            .ok_or_else(|| ParkingError::UnknownCredential(tag_id.to_string()))
    }

    fn release_slot(&self, session: &ParkingSession, at: i64) {
        let Some(slot_id) = &session.entry_slot_id else {
            return;
        };
        // session is already final; a failed release only leaves the slot
        // marked occupied until its camera reports again
        if let Err(e) = self.slots.release(slot_id, &session.session_id, at) {
            tracing::error!(
                slot_id = %slot_id,
                session_id = %session.session_id,
                error = %e,
                "Failed to release slot"
            );
        }
    }

    fn audit_denial(
        &self,
        event_type: &str,
        err: &ParkingError,
        tag_id: &str,
        session_id: Option<&str>,
        at: i64,
    ) {
        let mut log = SystemLog::warning(COMPONENT, event_type, err.to_string())
            .at(at)
            .tag(tag_id)
            .details(serde_json::json!({ "code": err.code().code() }));
        if let Some(session_id) = session_id {
            log = log.session(session_id);
        }
        self.audit.record(log);
    }
}

#[cfg(test)]
mod tests;
