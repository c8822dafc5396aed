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

//! Payout requests.

use crate::LedgerError;
use crate::base::{ReviewStatus, UserId, WithdrawalId};
use crate::transaction::is_money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_PAYMENT_DETAILS_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    GCash,
    PayMaya,
    Bank,
}

impl FromStr for PaymentMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gcash" => Ok(PaymentMethod::GCash),
            "paymaya" => Ok(PaymentMethod::PayMaya),
            "bank" => Ok(PaymentMethod::Bank),
            _ => Err(LedgerError::InvalidPaymentDetails),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentMethod::GCash => "gcash",
            PaymentMethod::PayMaya => "paymaya",
            PaymentMethod::Bank => "bank",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub owner: UserId,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Mobile number for e-wallets, bank name and account for transfers.
    pub payment_details: String,
    pub status: ReviewStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Builds a pending request. Checks the amount against the minimum
    /// payout only; the balance checks happen under the account lock.
    pub fn new(
        id: WithdrawalId,
        owner: UserId,
        amount: Decimal,
        payment_method: PaymentMethod,
        payment_details: impl Into<String>,
        minimum: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let payment_details = payment_details.into();
        if !is_money(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        if amount < minimum {
            return Err(LedgerError::BelowMinimumWithdrawal { minimum });
        }
        let trimmed = payment_details.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_PAYMENT_DETAILS_CHARS {
            return Err(LedgerError::InvalidPaymentDetails);
        }

        Ok(Self {
            id,
            owner,
            amount,
            payment_method,
            payment_details: trimmed.to_string(),
            status: ReviewStatus::Pending,
            requested_at: now,
            processed_at: None,
        })
    }
}
