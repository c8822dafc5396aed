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

//! Read-only projections for the presentation layer.

use crate::account::AccountSnapshot;
use crate::base::{ReviewStatus, UserId};
use crate::transaction::Transaction;
use crate::withdrawal::Withdrawal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

const DASHBOARD_RECENT: usize = 5;
const DASHBOARD_TOP_PRODUCTS: usize = 5;
const ADMIN_RECENT: usize = 10;
const ADMIN_RECENT_USERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub user: UserId,
    pub phone_number: Option<String>,
    pub balance: Decimal,
    pub joined_at: DateTime<Utc>,
}

impl From<&AccountSnapshot> for AccountSummary {
    fn from(snapshot: &AccountSnapshot) -> Self {
        Self {
            user: snapshot.user_id,
            phone_number: snapshot.phone_number.clone(),
            balance: snapshot.balance,
            joined_at: snapshot.joined_at,
        }
    }
}

/// Per-user overview.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub user: UserId,
    pub balance: Decimal,
    /// Sum of cashback over approved transactions.
    pub total_cashback: Decimal,
    pub approved_count: usize,
    pub pending_count: usize,
    pub total_orders: usize,
    pub link_count: usize,
    pub recent_transactions: Vec<Transaction>,
    /// Approved transactions with the largest cashback.
    pub top_products: Vec<Transaction>,
    pub pending_withdrawals: Vec<Withdrawal>,
}

impl Dashboard {
    pub fn build(snapshot: &AccountSnapshot, link_count: usize) -> Self {
        let approved: Vec<&Transaction> = snapshot
            .transactions
            .iter()
            .filter(|tx| tx.status == ReviewStatus::Approved)
            .collect();

        let mut top_products: Vec<Transaction> = approved.iter().map(|tx| (*tx).clone()).collect();
        // Stable sort keeps newest first among equal cashback.
        top_products.sort_by(|a, b| b.cashback_amount.cmp(&a.cashback_amount));
        top_products.truncate(DASHBOARD_TOP_PRODUCTS);

        Self {
            user: snapshot.user_id,
            balance: snapshot.balance,
            total_cashback: approved.iter().map(|tx| tx.cashback_amount).sum(),
            approved_count: approved.len(),
            pending_count: snapshot
                .transactions
                .iter()
                .filter(|tx| tx.status.is_pending())
                .count(),
            total_orders: snapshot.transactions.len(),
            link_count,
            recent_transactions: snapshot
                .transactions
                .iter()
                .take(DASHBOARD_RECENT)
                .cloned()
                .collect(),
            top_products,
            pending_withdrawals: snapshot
                .withdrawals
                .iter()
                .filter(|w| w.status.is_pending())
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalHistory {
    /// Newest first.
    pub withdrawals: Vec<Withdrawal>,
    /// Sum of approved withdrawals.
    pub total_withdrawn: Decimal,
}

impl WithdrawalHistory {
    pub fn build(snapshot: &AccountSnapshot) -> Self {
        Self {
            total_withdrawn: snapshot
                .withdrawals
                .iter()
                .filter(|w| w.status == ReviewStatus::Approved)
                .map(|w| w.amount)
                .sum(),
            withdrawals: snapshot.withdrawals.clone(),
        }
    }
}

/// Site-wide figures for reviewers.
#[derive(Debug, Clone, Serialize)]
pub struct AdminOverview {
    pub total_users: usize,
    pub total_links: usize,
    pub total_transactions: usize,
    /// Cashback over all approved transactions.
    pub total_cashback: Decimal,
    pub recent_transactions: Vec<Transaction>,
    /// Every pending withdrawal, newest first.
    pub pending_withdrawals: Vec<Withdrawal>,
    /// Most recently joined users.
    pub recent_users: Vec<AccountSummary>,
}

impl AdminOverview {
    pub fn build<I>(snapshots: I, total_links: usize) -> Self
    where
        I: IntoIterator<Item = AccountSnapshot>,
    {
        let mut total_users = 0;
        let mut transactions = Vec::new();
        let mut pending_withdrawals = Vec::new();
        let mut users = Vec::new();

        for snapshot in snapshots {
            total_users += 1;
            users.push(AccountSummary::from(&snapshot));
            transactions.extend(snapshot.transactions);
            pending_withdrawals.extend(
                snapshot
                    .withdrawals
                    .into_iter()
                    .filter(|w| w.status.is_pending()),
            );
        }

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        pending_withdrawals
            .sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        users.sort_by(|a, b| b.joined_at.cmp(&a.joined_at).then(b.user.cmp(&a.user)));
        users.truncate(ADMIN_RECENT_USERS);

        Self {
            total_users,
            total_links,
            total_transactions: transactions.len(),
            total_cashback: transactions
                .iter()
                .filter(|tx| tx.status == ReviewStatus::Approved)
                .map(|tx| tx.cashback_amount)
                .sum(),
            recent_transactions: transactions.into_iter().take(ADMIN_RECENT).collect(),
            pending_withdrawals,
            recent_users: users,
        }
    }
}
