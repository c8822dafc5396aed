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

//! Purchase transactions submitted for commission review.
//!
//! Transactions follow the review state machine:
//! - `Pending` → `Approved` (cashback credited)
//! - `Pending` → `Rejected` (no balance effect)

use crate::LedgerError;
use crate::base::{LinkId, ReviewStatus, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Decimal places kept for money values.
pub const MONEY_SCALE: u32 = 2;

const MAX_PRODUCT_NAME_CHARS: usize = 255;

/// Commission the merchant pays on a sale, rounded to cents.
pub fn estimate_commission(price: Decimal, commission_rate: Decimal) -> Decimal {
    (price * commission_rate).round_dp(MONEY_SCALE)
}

/// Cashback owed to the user for a commission, rounded to cents.
pub fn cashback_for(commission: Decimal, cashback_rate: Decimal) -> Decimal {
    (commission * cashback_rate).round_dp(MONEY_SCALE)
}

/// Positive with at most two decimal places.
pub(crate) fn is_money(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount.normalize().scale() <= MONEY_SCALE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub owner: UserId,
    pub link: Option<LinkId>,
    pub product_name: String,
    pub product_price: Decimal,
    pub estimated_commission: Decimal,
    pub cashback_amount: Decimal,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a pending transaction with its commission estimated from the
    /// price. Cashback stays zero until the first save derives it.
    pub fn new(
        id: TransactionId,
        owner: UserId,
        link: Option<LinkId>,
        product_name: impl Into<String>,
        product_price: Decimal,
        commission_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let product_name = product_name.into();
        validate_product(&product_name, product_price)?;

        Ok(Self {
            id,
            owner,
            link,
            product_name,
            product_price,
            estimated_commission: estimate_commission(product_price, commission_rate),
            cashback_amount: Decimal::ZERO,
            status: ReviewStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Save hook: derives the cashback when a commission exists and no
    /// cashback has been set yet. Later saves leave it untouched.
    pub fn settle_cashback(&mut self, cashback_rate: Decimal) {
        if !self.estimated_commission.is_zero() && self.cashback_amount.is_zero() {
            self.cashback_amount = cashback_for(self.estimated_commission, cashback_rate);
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Admin correction of a pending transaction's product details.
///
/// Commission and cashback keep the values computed at submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionAmendment {
    pub product_name: Option<String>,
    pub product_price: Option<Decimal>,
}

impl TransactionAmendment {
    pub(crate) fn apply(&self, transaction: &mut Transaction) -> Result<(), LedgerError> {
        let name = self
            .product_name
            .as_deref()
            .unwrap_or(&transaction.product_name);
        let price = self.product_price.unwrap_or(transaction.product_price);
        validate_product(name, price)?;

        if let Some(name) = &self.product_name {
            transaction.product_name = name.clone();
        }
        transaction.product_price = price;
        Ok(())
    }
}

fn validate_product(name: &str, price: Decimal) -> Result<(), LedgerError> {
    if name.trim().is_empty() || name.chars().count() > MAX_PRODUCT_NAME_CHARS {
        return Err(LedgerError::InvalidProductName);
    }
    if !is_money(price) {
        return Err(LedgerError::InvalidPrice);
    }
    Ok(())
}
