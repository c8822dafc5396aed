// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! User accounts.
//!
//! An account owns the user's profile, ledger, transactions and
//! withdrawals behind one mutex. Every status change and the balance
//! delta it causes happen under that lock, so concurrent reviews of the
//! same row cannot credit or debit twice.
//!
//! ```text
//!  Transaction (Pending) ──approve──► Approved ──delete──► removed + cashback reversed
//!         │
//!         └─────────reject─────────► Rejected ──delete──► removed
//!
//!  Withdrawal (Pending) ──approve──► Approved + balance debited
//!         │
//!         └─────────reject─────────► Rejected
//! ```
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use cashback_ledger_rs::{Account, UserId};
//!
//! let account = Account::new(UserId(1));
//! assert_eq!(account.balance(), dec!(0.00));
//! ```

use crate::base::{ReviewStatus, TransactionId, UserId, WithdrawalId};
use crate::ledger::{Ledger, LedgerEntry};
use crate::transaction::{Transaction, TransactionAmendment};
use crate::withdrawal::{PaymentMethod, Withdrawal};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;

const MAX_PHONE_NUMBER_CHARS: usize = 15;

/// Result of a review command on a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row left `Pending` and any balance effect was applied.
    Applied,
    /// The row was already reviewed; nothing changed.
    Unchanged(ReviewStatus),
}

/// User input for a payout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_details: String,
}

/// Consistent copy of an account taken under a single lock.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub phone_number: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub balance: Decimal,
    /// Newest first.
    pub transactions: Vec<Transaction>,
    /// Newest first.
    pub withdrawals: Vec<Withdrawal>,
}

#[derive(Debug)]
struct AccountData {
    user_id: UserId,
    phone_number: Option<String>,
    joined_at: DateTime<Utc>,
    ledger: Ledger,
    transactions: HashMap<TransactionId, Transaction>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
}

impl AccountData {
    fn new(user_id: UserId, phone_number: Option<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            phone_number,
            joined_at,
            ledger: Ledger::new(),
            transactions: HashMap::new(),
            withdrawals: HashMap::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.ledger.balance() >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.ledger.balance()
        );
        debug_assert!(
            self.transactions.values().all(|tx| {
                let credited = self.ledger.is_credited(tx.id);
                match tx.status {
                    ReviewStatus::Approved => credited || tx.cashback_amount.is_zero(),
                    _ => !credited,
                }
            }),
            "Invariant violated: transaction status and ledger disagree"
        );
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Result<&mut Transaction, LedgerError> {
        self.transactions
            .get_mut(&id)
            .ok_or(LedgerError::TransactionNotFound)
    }

    fn withdrawal_mut(&mut self, id: WithdrawalId) -> Result<&mut Withdrawal, LedgerError> {
        self.withdrawals
            .get_mut(&id)
            .ok_or(LedgerError::WithdrawalNotFound)
    }

    /// Credits the cashback, then flips the status.
    fn approve_transaction(
        &mut self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        let tx = self.transaction_mut(id)?;
        if !tx.status.is_pending() {
            return Ok(Transition::Unchanged(tx.status));
        }
        let cashback = tx.cashback_amount;

        if cashback > Decimal::ZERO {
            self.ledger.credit_cashback(id, cashback, now)?;
        }

        let tx = self.transaction_mut(id)?;
        tx.status = ReviewStatus::Approved;
        tx.touch(now);
        self.assert_invariants();
        Ok(Transition::Applied)
    }

    fn reject_transaction(
        &mut self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        let tx = self.transaction_mut(id)?;
        if !tx.status.is_pending() {
            return Ok(Transition::Unchanged(tx.status));
        }
        tx.status = ReviewStatus::Rejected;
        tx.touch(now);
        Ok(Transition::Applied)
    }

    /// Reverses the cashback of an approved transaction, then removes it.
    fn delete_transaction(
        &mut self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let tx = self
            .transactions
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound)?;

        if self.ledger.is_credited(id) {
            let cashback = tx.cashback_amount;
            self.ledger.reverse_cashback(id, cashback, now)?;
        }

        let removed = self
            .transactions
            .remove(&id)
            .ok_or(LedgerError::TransactionNotFound)?;
        self.assert_invariants();
        Ok(removed)
    }

    fn approve_withdrawal(
        &mut self,
        id: WithdrawalId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        let withdrawal = self.withdrawal_mut(id)?;
        if !withdrawal.status.is_pending() {
            return Ok(Transition::Unchanged(withdrawal.status));
        }
        let amount = withdrawal.amount;

        // Debit first: an overdraw leaves the request pending.
        self.ledger.debit_withdrawal(id, amount, now)?;

        let withdrawal = self.withdrawal_mut(id)?;
        withdrawal.status = ReviewStatus::Approved;
        withdrawal.processed_at = Some(now);
        self.assert_invariants();
        Ok(Transition::Applied)
    }

    fn reject_withdrawal(&mut self, id: WithdrawalId) -> Result<Transition, LedgerError> {
        let withdrawal = self.withdrawal_mut(id)?;
        if !withdrawal.status.is_pending() {
            return Ok(Transition::Unchanged(withdrawal.status));
        }
        withdrawal.status = ReviewStatus::Rejected;
        Ok(Transition::Applied)
    }
}

/// User account.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user_id, None, Utc::now())),
        }
    }

    /// Creates an account with a contact number.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidPhoneNumber`] when longer than 15 characters.
    pub fn with_phone_number(
        user_id: UserId,
        phone_number: Option<String>,
    ) -> Result<Self, LedgerError> {
        Self::register(user_id, phone_number, Utc::now())
    }

    /// Opens an account that joined at `joined_at`.
    ///
    /// Blank phone numbers are dropped; longer than 15 characters is
    /// [`LedgerError::InvalidPhoneNumber`].
    pub fn register(
        user_id: UserId,
        phone_number: Option<String>,
        joined_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let phone_number = phone_number
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if phone_number
            .as_ref()
            .is_some_and(|phone| phone.chars().count() > MAX_PHONE_NUMBER_CHARS)
        {
            return Err(LedgerError::InvalidPhoneNumber);
        }
        Ok(Self {
            inner: Mutex::new(AccountData::new(user_id, phone_number, joined_at)),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.inner.lock().joined_at
    }

    pub fn phone_number(&self) -> Option<String> {
        self.inner.lock().phone_number.clone()
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().ledger.balance()
    }

    /// Ledger entries in the order they were posted.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().ledger.entries().to_vec()
    }

    /// Replays the ledger and checks it against the running balance.
    pub fn verify_ledger(&self) -> bool {
        self.inner.lock().ledger.verify()
    }

    /// Stores a newly submitted transaction, deriving its cashback.
    pub fn record_transaction(
        &self,
        mut transaction: Transaction,
        cashback_rate: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let mut data = self.inner.lock();
        if transaction.owner != data.user_id {
            return Err(LedgerError::OwnerMismatch);
        }
        if data.transactions.contains_key(&transaction.id) {
            return Err(LedgerError::DuplicateEntry);
        }
        transaction.settle_cashback(cashback_rate);
        data.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.inner.lock().transactions.get(&id).cloned()
    }

    /// All transactions, newest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        let data = self.inner.lock();
        newest_transactions_first(data.transactions.values().cloned().collect())
    }

    /// Corrects product details of a pending transaction.
    pub fn amend_transaction(
        &self,
        id: TransactionId,
        amendment: &TransactionAmendment,
        cashback_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let mut data = self.inner.lock();
        let tx = data.transaction_mut(id)?;
        if !tx.status.is_pending() {
            return Err(LedgerError::AlreadyReviewed);
        }
        amendment.apply(tx)?;
        tx.settle_cashback(cashback_rate);
        tx.touch(now);
        Ok(tx.clone())
    }

    pub fn approve_transaction(
        &self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        self.inner.lock().approve_transaction(id, now)
    }

    pub fn reject_transaction(
        &self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        self.inner.lock().reject_transaction(id, now)
    }

    /// Deletes a transaction. An approved one first gives its cashback back.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - No such transaction on this account.
    /// - [`LedgerError::InsufficientBalance`] - The cashback was already paid out.
    pub fn delete_transaction(
        &self,
        id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        self.inner.lock().delete_transaction(id, now)
    }

    /// Opens a payout request.
    ///
    /// The balance is checked but not held: several pending requests may
    /// together exceed it. Approval refuses any debit that would overdraw.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::BalanceBelowMinimum`] - Balance under the minimum payout.
    /// - [`LedgerError::BelowMinimumWithdrawal`] - Amount under the minimum payout.
    /// - [`LedgerError::InsufficientBalance`] - Amount over the current balance.
    /// - [`LedgerError::InvalidAmount`] / [`LedgerError::InvalidPaymentDetails`] - Malformed input.
    pub fn request_withdrawal(
        &self,
        id: WithdrawalId,
        request: WithdrawalRequest,
        minimum: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Withdrawal, LedgerError> {
        let mut data = self.inner.lock();
        let balance = data.ledger.balance();
        if balance < minimum {
            return Err(LedgerError::BalanceBelowMinimum { minimum });
        }

        let withdrawal = Withdrawal::new(
            id,
            data.user_id,
            request.amount,
            request.payment_method,
            request.payment_details,
            minimum,
            now,
        )?;
        if withdrawal.amount > balance {
            return Err(LedgerError::InsufficientBalance);
        }
        if data.withdrawals.contains_key(&id) {
            return Err(LedgerError::DuplicateEntry);
        }

        data.withdrawals.insert(id, withdrawal.clone());
        Ok(withdrawal)
    }

    pub fn withdrawal(&self, id: WithdrawalId) -> Option<Withdrawal> {
        self.inner.lock().withdrawals.get(&id).cloned()
    }

    /// All withdrawals, newest first.
    pub fn withdrawals(&self) -> Vec<Withdrawal> {
        let data = self.inner.lock();
        newest_withdrawals_first(data.withdrawals.values().cloned().collect())
    }

    /// Approves a pending withdrawal and debits the balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientBalance`] when the balance no longer covers
    /// the amount; the request stays pending.
    pub fn approve_withdrawal(
        &self,
        id: WithdrawalId,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        self.inner.lock().approve_withdrawal(id, now)
    }

    pub fn reject_withdrawal(&self, id: WithdrawalId) -> Result<Transition, LedgerError> {
        self.inner.lock().reject_withdrawal(id)
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let data = self.inner.lock();
        AccountSnapshot {
            user_id: data.user_id,
            phone_number: data.phone_number.clone(),
            joined_at: data.joined_at,
            balance: data.ledger.balance(),
            transactions: newest_transactions_first(data.transactions.values().cloned().collect()),
            withdrawals: newest_withdrawals_first(data.withdrawals.values().cloned().collect()),
        }
    }
}

fn newest_transactions_first(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    transactions
}

fn newest_withdrawals_first(mut withdrawals: Vec<Withdrawal>) -> Vec<Withdrawal> {
    withdrawals.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
    withdrawals
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 3)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("phone_number", &data.phone_number)?;
        let mut balance = data.ledger.balance().round_dp(Account::DECIMAL_PRECISION);
        balance.rescale(Account::DECIMAL_PRECISION);
        state.serialize_field("balance", &balance)?;
        state.end()
    }
}
