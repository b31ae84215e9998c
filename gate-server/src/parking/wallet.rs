//! Wallet Ledger - 钱包账本
//!
//! Balance lives on the credential record; every change to it is written in
//! the same redb transaction as exactly one immutable [`Transaction`], so
//! `balance == Σ amount` holds for every credential at every commit.
//!
//! Public operations take the credential lock for their whole
//! read-check-write. [`WalletLedger::debit_in_txn`] is the building block the
//! session manager uses inside its own exit transaction; it expects the
//! caller to hold the lock already.

use super::audit::AuditLog;
use super::error::{ParkingError, ParkingResult};
use super::locks::CredentialLocks;
use super::money::{format_amount, round_money};
use super::storage::{ParkingStorage, retry_read};
use crate::utils::Clock;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::models::{Credential, SystemLog, Transaction, TransactionStatus, TransactionType};
use shared::response::WalletBalance;
use shared::util::transaction_id;
use std::sync::Arc;

const COMPONENT: &str = "wallet";

/// Optional metadata attached to a ledger entry
#[derive(Debug, Clone, Default)]
pub struct EntryMeta {
    pub session_id: Option<String>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
}

impl EntryMeta {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn note(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalletLedger {
    storage: ParkingStorage,
    locks: Arc<CredentialLocks>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl WalletLedger {
    pub fn new(
        storage: ParkingStorage,
        locks: Arc<CredentialLocks>,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> Self {
        Self {
            storage,
            locks,
            clock,
            audit,
        }
    }

    // ========== In-transaction building blocks ==========

    /// Apply a signed delta to a credential and write its ledger entry
    ///
    /// Updates `credential` in place and stores both records in `txn`.
    pub(crate) fn post(
        &self,
        txn: &WriteTransaction,
        credential: &mut Credential,
        amount: Decimal,
        kind: TransactionType,
        meta: EntryMeta,
        at: i64,
    ) -> ParkingResult<Transaction> {
        let balance_before = credential.balance;
        let balance_after = balance_before + amount;

        let record = Transaction {
            transaction_id: transaction_id(at),
            tag_id: credential.tag_id.clone(),
            amount,
            transaction_type: kind,
            balance_before,
            balance_after,
            session_id: meta.session_id,
            payment_method: meta.payment_method,
            payment_reference: meta.payment_reference,
            notes: meta.notes,
            status: TransactionStatus::Completed,
            timestamp: at,
        };

        credential.balance = balance_after;
        credential.updated_at = at;
        self.storage.put_credential(txn, credential)?;
        self.storage.put_transaction(txn, &record)?;
        Ok(record)
    }

    /// Check-and-deduct inside the caller's transaction
    ///
    /// A zero amount is allowed (grace-period exits still leave a ledger
    /// entry). Caller must hold the credential lock.
    pub(crate) fn debit_in_txn(
        &self,
        txn: &WriteTransaction,
        credential: &mut Credential,
        amount: Decimal,
        meta: EntryMeta,
        at: i64,
    ) -> ParkingResult<Transaction> {
        let amount = round_money(amount);
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ParkingError::InvalidAmount(amount));
        }
        if credential.balance < amount {
            return Err(ParkingError::InsufficientBalance {
                required: amount,
                available: credential.balance,
            });
        }
        let delta = if amount.is_zero() { Decimal::ZERO } else { -amount };
        self.post(txn, credential, delta, TransactionType::Deduction, meta, at)
    }

    // ========== Locked operations ==========

    /// Deduct a positive amount
    pub fn debit(&self, tag_id: &str, amount: Decimal, meta: EntryMeta) -> ParkingResult<Transaction> {
        let amount = positive(amount)?;
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let txn = self.storage.begin_write()?;
        let mut credential = self.load_txn(&txn, tag_id)?;
        let record = match self.debit_in_txn(&txn, &mut credential, amount, meta, at) {
            Ok(record) => record,
            Err(e) => {
                if let ParkingError::InsufficientBalance { .. } = e {
                    drop(txn);
                    self.audit.record(
                        SystemLog::warning(COMPONENT, "debit_denied", e.to_string())
                            .at(at)
                            .tag(tag_id),
                    );
                }
                return Err(e);
            }
        };
        txn.commit()?;

        tracing::info!(
            tag_id,
            transaction_id = %record.transaction_id,
            amount = %amount,
            balance_after = %record.balance_after,
            "Wallet debited"
        );
        Ok(record)
    }

    /// Top up a wallet
    pub fn credit(&self, tag_id: &str, amount: Decimal, meta: EntryMeta) -> ParkingResult<Transaction> {
        let amount = positive(amount)?;
        self.mutate(tag_id, amount, TransactionType::Topup, meta, "topup")
    }

    /// Return money to a wallet (e.g. after a disputed exit)
    pub fn refund(&self, tag_id: &str, amount: Decimal, meta: EntryMeta) -> ParkingResult<Transaction> {
        let amount = positive(amount)?;
        self.mutate(tag_id, amount, TransactionType::Refund, meta, "refund")
    }

    /// Manual signed correction; never drives the balance negative
    pub fn adjust(&self, tag_id: &str, amount: Decimal, meta: EntryMeta) -> ParkingResult<Transaction> {
        let amount = round_money(amount);
        if amount.is_zero() {
            return Err(ParkingError::InvalidAmount(amount));
        }
        self.mutate(tag_id, amount, TransactionType::Adjustment, meta, "adjustment")
    }

    fn mutate(
        &self,
        tag_id: &str,
        amount: Decimal,
        kind: TransactionType,
        meta: EntryMeta,
        event_type: &str,
    ) -> ParkingResult<Transaction> {
        let _guard = self.locks.lock(tag_id);
        let at = self.clock.now_millis();

        let txn = self.storage.begin_write()?;
        let mut credential = self.load_txn(&txn, tag_id)?;
        if credential.balance + amount < Decimal::ZERO {
            return Err(ParkingError::InsufficientBalance {
                required: -amount,
                available: credential.balance,
            });
        }

        let record = self.post(&txn, &mut credential, amount, kind, meta, at)?;
        self.audit.record_in_txn(
            &txn,
            &SystemLog::info(
                COMPONENT,
                event_type,
                format!(
                    "{} {} (balance {})",
                    event_type,
                    format_amount(amount),
                    format_amount(record.balance_after)
                ),
            )
            .at(at)
            .tag(tag_id),
        )?;
        txn.commit()?;

        tracing::info!(
            tag_id,
            transaction_id = %record.transaction_id,
            amount = %amount,
            balance_after = %record.balance_after,
            event_type,
            "Wallet updated"
        );
        Ok(record)
    }

    fn load_txn(&self, txn: &WriteTransaction, tag_id: &str) -> ParkingResult<Credential> {
        self.storage
            .get_credential_txn(txn, tag_id)?
            .ok_or_else(|| ParkingError::UnknownCredential(tag_id.to_string()))
    }

    // ========== Queries ==========

    pub fn balance(&self, tag_id: &str) -> ParkingResult<WalletBalance> {
        let credential = retry_read(|| self.storage.get_credential(tag_id))?
            .ok_or_else(|| ParkingError::UnknownCredential(tag_id.to_string()))?;
        Ok(WalletBalance {
            tag_id: credential.tag_id,
            name: credential.name,
            vehicle_no: credential.vehicle_no,
            balance: credential.balance,
            updated_at: credential.updated_at,
        })
    }

    /// Ledger entries, newest first
    pub fn history(&self, tag_id: &str, limit: usize) -> ParkingResult<Vec<Transaction>> {
        if retry_read(|| self.storage.get_credential(tag_id))?.is_none() {
            return Err(ParkingError::UnknownCredential(tag_id.to_string()));
        }
        Ok(retry_read(|| self.storage.transactions_for(tag_id, Some(limit)))?)
    }
}

fn positive(amount: Decimal) -> ParkingResult<Decimal> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(ParkingError::InvalidAmount(amount));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn ledger_with(balance: i64) -> (WalletLedger, ParkingStorage) {
        let storage = ParkingStorage::open_in_memory().unwrap();
        let credential = Credential {
            tag_id: "T1".into(),
            name: "Asha".into(),
            vehicle_no: "KA01AB1234".into(),
            balance: Decimal::ZERO,
            contact: None,
            email: None,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        let txn = storage.begin_write().unwrap();
        storage.put_credential(&txn, &credential).unwrap();
        txn.commit().unwrap();

        let ledger = WalletLedger::new(
            storage.clone(),
            Arc::new(CredentialLocks::new()),
            Arc::new(ManualClock::new(1_000)),
            AuditLog::new(storage.clone()),
        );
        if balance > 0 {
            ledger
                .credit("T1", Decimal::from(balance), EntryMeta::default())
                .unwrap();
        }
        (ledger, storage)
    }

    fn sum_of_deltas(storage: &ParkingStorage, tag_id: &str) -> Decimal {
        storage
            .transactions_for(tag_id, None)
            .unwrap()
            .iter()
            .map(|t| t.amount)
            .sum()
    }

    #[test]
    fn test_credit_and_debit() {
        let (ledger, storage) = ledger_with(100);

        let tx = ledger
            .debit("T1", Decimal::new(2050, 2), EntryMeta::session("S1"))
            .unwrap();
        assert_eq!(tx.amount, Decimal::new(-2050, 2));
        assert_eq!(tx.balance_before, Decimal::from(100));
        assert_eq!(tx.balance_after, Decimal::new(7950, 2));
        assert_eq!(tx.transaction_type, TransactionType::Deduction);
        assert_eq!(tx.session_id.as_deref(), Some("S1"));

        let balance = ledger.balance("T1").unwrap();
        assert_eq!(balance.balance, Decimal::new(7950, 2));
        assert_eq!(sum_of_deltas(&storage, "T1"), balance.balance);
    }

    #[test]
    fn test_debit_insufficient_writes_nothing() {
        let (ledger, storage) = ledger_with(5);

        let err = ledger
            .debit("T1", Decimal::from(10), EntryMeta::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ParkingError::InsufficientBalance { required, available }
                if required == Decimal::from(10) && available == Decimal::from(5)
        ));
        assert_eq!(storage.transactions_for("T1", None).unwrap().len(), 1);
        assert_eq!(ledger.balance("T1").unwrap().balance, Decimal::from(5));
    }

    #[test]
    fn test_exact_balance_debit() {
        let (ledger, _) = ledger_with(10);
        let tx = ledger
            .debit("T1", Decimal::from(10), EntryMeta::default())
            .unwrap();
        assert_eq!(tx.balance_after, Decimal::ZERO);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let (ledger, _) = ledger_with(10);
        for amount in [Decimal::ZERO, Decimal::from(-5)] {
            assert!(matches!(
                ledger.credit("T1", amount, EntryMeta::default()),
                Err(ParkingError::InvalidAmount(_))
            ));
            assert!(matches!(
                ledger.debit("T1", amount, EntryMeta::default()),
                Err(ParkingError::InvalidAmount(_))
            ));
        }
        assert!(matches!(
            ledger.adjust("T1", Decimal::ZERO, EntryMeta::default()),
            Err(ParkingError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_unknown_credential() {
        let (ledger, _) = ledger_with(0);
        assert!(matches!(
            ledger.credit("NOPE", Decimal::ONE, EntryMeta::default()),
            Err(ParkingError::UnknownCredential(_))
        ));
        assert!(matches!(
            ledger.balance("NOPE"),
            Err(ParkingError::UnknownCredential(_))
        ));
    }

    #[test]
    fn test_adjust_cannot_go_negative() {
        let (ledger, _) = ledger_with(10);
        assert!(matches!(
            ledger.adjust("T1", Decimal::from(-11), EntryMeta::note("typo")),
            Err(ParkingError::InsufficientBalance { .. })
        ));
        let tx = ledger
            .adjust("T1", Decimal::from(-4), EntryMeta::note("correction"))
            .unwrap();
        assert_eq!(tx.transaction_type, TransactionType::Adjustment);
        assert_eq!(tx.balance_after, Decimal::from(6));
    }

    #[test]
    fn test_history_newest_first() {
        let (ledger, _) = ledger_with(50);
        ledger
            .refund("T1", Decimal::from(5), EntryMeta::note("refund"))
            .unwrap();
        ledger
            .debit("T1", Decimal::from(20), EntryMeta::default())
            .unwrap();

        let history = ledger.history("T1", 20).unwrap();
        let kinds: Vec<_> = history.iter().map(|t| t.transaction_type).collect();
        assert_eq!(
            kinds,
            vec![
                TransactionType::Deduction,
                TransactionType::Refund,
                TransactionType::Topup
            ]
        );
        assert_eq!(ledger.history("T1", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let (ledger, storage) = ledger_with(100);

        let successes: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let ledger = &ledger;
                    s.spawn(move || {
                        ledger
                            .debit("T1", Decimal::from(10), EntryMeta::default())
                            .is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(successes, 10);
        let balance = ledger.balance("T1").unwrap().balance;
        assert_eq!(balance, Decimal::ZERO);
        assert_eq!(sum_of_deltas(&storage, "T1"), balance);

        // every entry chains onto the previous one
        let mut history = storage.transactions_for("T1", None).unwrap();
        history.reverse();
        for pair in history.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }
}
