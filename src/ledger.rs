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

//! Append-only balance ledger.
//!
//! A user's balance is never assigned directly. Every change is an entry
//! and the balance is the running sum of those entries.
//!
//! ```
//! use cashback_ledger_rs::{EntryKind, Ledger, TransactionId};
//! use rust_decimal_macros::dec;
//! use chrono::Utc;
//!
//! let mut ledger = Ledger::new();
//! ledger.credit_cashback(TransactionId(1), dec!(5.00), Utc::now()).unwrap();
//! assert_eq!(ledger.balance(), dec!(5.00));
//! assert_eq!(ledger.entries()[0].kind, EntryKind::CashbackCredit(TransactionId(1)));
//! ```

use crate::LedgerError;
use crate::base::{TransactionId, WithdrawalId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "reference", rename_all = "snake_case")]
pub enum EntryKind {
    /// Approved transaction paid its cashback.
    CashbackCredit(TransactionId),
    /// Approved transaction was deleted; its cashback is taken back.
    CashbackReversal(TransactionId),
    /// Approved withdrawal paid out.
    WithdrawalDebit(WithdrawalId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Position in the account's ledger, starting at 1.
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EntryKind,
    /// Signed balance delta.
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Per-account ledger.
///
/// # Invariants
///
/// - The balance never goes negative.
/// - A transaction is credited at most once and reversed at most once,
///   and only after it was credited.
/// - A withdrawal is debited at most once.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    balance: Decimal,
    credited: HashSet<TransactionId>,
    reversed: HashSet<TransactionId>,
    debited: HashSet<WithdrawalId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_credited(&self, transaction_id: TransactionId) -> bool {
        self.credited.contains(&transaction_id) && !self.reversed.contains(&transaction_id)
    }

    /// Recomputes the balance from the entries and compares it with the
    /// running balance.
    pub fn verify(&self) -> bool {
        let replayed: Decimal = self.entries.iter().map(|entry| entry.amount).sum();
        replayed == self.balance && self.balance >= Decimal::ZERO
    }

    /// Credits an approved transaction's cashback.
    pub fn credit_cashback(
        &mut self,
        transaction_id: TransactionId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.credited.contains(&transaction_id) {
            return Err(LedgerError::DuplicateEntry);
        }
        self.credited.insert(transaction_id);
        Ok(self.post(EntryKind::CashbackCredit(transaction_id), amount, at))
    }

    /// Takes back a credited cashback.
    pub fn reverse_cashback(
        &mut self,
        transaction_id: TransactionId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if !self.credited.contains(&transaction_id) || self.reversed.contains(&transaction_id) {
            return Err(LedgerError::DuplicateEntry);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        self.reversed.insert(transaction_id);
        Ok(self.post(EntryKind::CashbackReversal(transaction_id), -amount, at))
    }

    /// Pays out an approved withdrawal. Refuses to overdraw.
    pub fn debit_withdrawal(
        &mut self,
        withdrawal_id: WithdrawalId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.debited.contains(&withdrawal_id) {
            return Err(LedgerError::DuplicateEntry);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        self.debited.insert(withdrawal_id);
        Ok(self.post(EntryKind::WithdrawalDebit(withdrawal_id), -amount, at))
    }

    fn post(&mut self, kind: EntryKind, amount: Decimal, at: DateTime<Utc>) -> &LedgerEntry {
        self.balance += amount;
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
        self.entries.push(LedgerEntry {
            sequence: self.entries.len() as u64 + 1,
            kind,
            amount,
            balance_after: self.balance,
            recorded_at: at,
        });
        &self.entries[self.entries.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn credit_increases_balance() {
        let mut ledger = Ledger::new();
        let entry = ledger
            .credit_cashback(TransactionId(1), dec!(5.00), Utc::now())
            .unwrap();
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.balance_after, dec!(5.00));
        assert_eq!(ledger.balance(), dec!(5.00));
        assert!(ledger.is_credited(TransactionId(1)));
    }

    #[test]
    fn second_credit_for_same_transaction_is_refused() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(1), dec!(5.00), Utc::now())
            .unwrap();
        let result = ledger.credit_cashback(TransactionId(1), dec!(5.00), Utc::now());
        assert_eq!(result.unwrap_err(), LedgerError::DuplicateEntry);
        assert_eq!(ledger.balance(), dec!(5.00));
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn reversal_requires_prior_credit() {
        let mut ledger = Ledger::new();
        let result = ledger.reverse_cashback(TransactionId(1), dec!(5.00), Utc::now());
        assert_eq!(result.unwrap_err(), LedgerError::DuplicateEntry);
    }

    #[test]
    fn credit_then_reversal_nets_zero() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(1), dec!(5.00), Utc::now())
            .unwrap();
        ledger
            .reverse_cashback(TransactionId(1), dec!(5.00), Utc::now())
            .unwrap();
        assert_eq!(ledger.balance(), Decimal::ZERO);
        assert!(!ledger.is_credited(TransactionId(1)));

        let again = ledger.reverse_cashback(TransactionId(1), dec!(5.00), Utc::now());
        assert_eq!(again.unwrap_err(), LedgerError::DuplicateEntry);
        assert!(ledger.verify());
    }

    #[test]
    fn reversal_refuses_to_overdraw() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(1), dec!(150.00), Utc::now())
            .unwrap();
        ledger
            .debit_withdrawal(WithdrawalId(1), dec!(100.00), Utc::now())
            .unwrap();
        let result = ledger.reverse_cashback(TransactionId(1), dec!(150.00), Utc::now());
        assert_eq!(result.unwrap_err(), LedgerError::InsufficientBalance);
        assert_eq!(ledger.balance(), dec!(50.00));
        assert!(ledger.is_credited(TransactionId(1)));
    }

    #[test]
    fn debit_refuses_to_overdraw() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(1), dec!(99.99), Utc::now())
            .unwrap();
        let result = ledger.debit_withdrawal(WithdrawalId(1), dec!(100.00), Utc::now());
        assert_eq!(result.unwrap_err(), LedgerError::InsufficientBalance);
        assert_eq!(ledger.balance(), dec!(99.99));
    }

    #[test]
    fn withdrawal_is_debited_once() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(1), dec!(300.00), Utc::now())
            .unwrap();
        ledger
            .debit_withdrawal(WithdrawalId(7), dec!(100.00), Utc::now())
            .unwrap();
        let result = ledger.debit_withdrawal(WithdrawalId(7), dec!(100.00), Utc::now());
        assert_eq!(result.unwrap_err(), LedgerError::DuplicateEntry);
        assert_eq!(ledger.balance(), dec!(200.00));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut ledger = Ledger::new();
        assert_eq!(
            ledger
                .credit_cashback(TransactionId(1), Decimal::ZERO, Utc::now())
                .unwrap_err(),
            LedgerError::InvalidAmount
        );
        assert_eq!(
            ledger
                .debit_withdrawal(WithdrawalId(1), dec!(-1), Utc::now())
                .unwrap_err(),
            LedgerError::InvalidAmount
        );
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn running_balance_matches_replay() {
        let mut ledger = Ledger::new();
        for i in 1..=5u64 {
            ledger
                .credit_cashback(TransactionId(i), dec!(40.00), Utc::now())
                .unwrap();
        }
        ledger
            .reverse_cashback(TransactionId(2), dec!(40.00), Utc::now())
            .unwrap();
        ledger
            .debit_withdrawal(WithdrawalId(1), dec!(120.00), Utc::now())
            .unwrap();

        assert_eq!(ledger.balance(), dec!(40.00));
        assert!(ledger.verify());
        let sequences: Vec<u64> = ledger.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn entry_serializes_kind_and_reference() {
        let mut ledger = Ledger::new();
        ledger
            .credit_cashback(TransactionId(3), dec!(5.00), Utc::now())
            .unwrap();
        let json = serde_json::to_value(&ledger.entries()[0]).unwrap();
        assert_eq!(json["kind"], "cashback_credit");
        assert_eq!(json["reference"], 3);
        assert_eq!(json["amount"], "5.00");
    }
}
