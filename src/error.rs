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

//! Error types for ledger operations.

use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger operation errors.
///
/// Every operation checks before it mutates, so an error never leaves
/// partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Link is malformed or its host is outside the merchant domains
    #[error("link does not belong to a supported merchant")]
    InvalidMerchantUrl,

    /// Price is zero, negative, or has more than two decimal places
    #[error("invalid product price (must be positive, at most 2 decimal places)")]
    InvalidPrice,

    /// Amount is zero, negative, or has more than two decimal places
    #[error("invalid amount (must be positive, at most 2 decimal places)")]
    InvalidAmount,

    /// Product name is empty or too long
    #[error("invalid product name")]
    InvalidProductName,

    /// Payment details are empty or too long
    #[error("invalid payment details")]
    InvalidPaymentDetails,

    /// Phone number is too long
    #[error("invalid phone number")]
    InvalidPhoneNumber,

    /// Requested withdrawal is under the minimum payout
    #[error("minimum withdrawal amount is {minimum}")]
    BelowMinimumWithdrawal { minimum: Decimal },

    /// Balance has not reached the minimum payout yet
    #[error("balance must reach {minimum} before requesting a withdrawal")]
    BalanceBelowMinimum { minimum: Decimal },

    /// Debit would take the balance below zero
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Record is addressed to a different user's account
    #[error("record belongs to another user")]
    OwnerMismatch,

    /// No account for the given user
    #[error("account not found")]
    AccountNotFound,

    /// Account already registered
    #[error("account already exists")]
    DuplicateAccount,

    /// Link does not exist or belongs to another user
    #[error("affiliate link not found")]
    LinkNotFound,

    /// Transaction does not exist or belongs to another user
    #[error("transaction not found")]
    TransactionNotFound,

    /// Withdrawal does not exist or belongs to another user
    #[error("withdrawal not found")]
    WithdrawalNotFound,

    /// Row has left the pending state
    #[error("already reviewed")]
    AlreadyReviewed,

    /// Ledger already holds this entry
    #[error("duplicate ledger entry")]
    DuplicateEntry,
}

#[cfg(test)]
mod tests {
    use super::LedgerError;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidMerchantUrl.to_string(),
            "link does not belong to a supported merchant"
        );
        assert_eq!(
            LedgerError::InvalidPrice.to_string(),
            "invalid product price (must be positive, at most 2 decimal places)"
        );
        assert_eq!(
            LedgerError::BelowMinimumWithdrawal { minimum: dec!(100) }.to_string(),
            "minimum withdrawal amount is 100"
        );
        assert_eq!(
            LedgerError::BalanceBelowMinimum { minimum: dec!(100) }.to_string(),
            "balance must reach 100 before requesting a withdrawal"
        );
        assert_eq!(LedgerError::InsufficientBalance.to_string(), "insufficient balance");
        assert_eq!(LedgerError::TransactionNotFound.to_string(), "transaction not found");
        assert_eq!(LedgerError::WithdrawalNotFound.to_string(), "withdrawal not found");
        assert_eq!(LedgerError::LinkNotFound.to_string(), "affiliate link not found");
        assert_eq!(LedgerError::DuplicateEntry.to_string(), "duplicate ledger entry");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::BelowMinimumWithdrawal { minimum: dec!(100) };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
