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

//! Cashback engine.
//!
//! The [`Engine`] is the central component: it registers accounts,
//! converts links, records submitted purchases and payout requests, and
//! applies reviewer decisions to the owner's ledger.
//!
//! # Money Movements
//!
//! - **Transaction approval**: credits the cashback.
//! - **Deleting an approved transaction**: reverses the cashback.
//! - **Withdrawal approval**: debits the amount.
//!
//! Rejections and everything else leave the balance alone.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`]; each account serializes its own
//! changes behind a mutex. Operations on different users run in
//! parallel, operations on the same user run one at a time.

use crate::account::{Account, Transition, WithdrawalRequest};
use crate::base::{LinkId, ReviewStatus, TransactionId, UserId, WithdrawalId};
use crate::config::Settings;
use crate::ledger::LedgerEntry;
use crate::link::{AffiliateLink, LinkRegistry, MerchantPolicy};
use crate::report::{AccountSummary, AdminOverview, Dashboard, WithdrawalHistory};
use crate::review_queue::{ReviewItem, ReviewQueue};
use crate::transaction::{Transaction, TransactionAmendment};
use crate::withdrawal::Withdrawal;
use crate::LedgerError;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Per-row outcome of a bulk review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSummary<I> {
    /// Rows that left `Pending`.
    pub applied: Vec<I>,
    /// Rows that were already reviewed.
    pub unchanged: Vec<I>,
    /// Rows that could not be reviewed, with the reason.
    pub failed: Vec<(I, LedgerError)>,
}

impl<I> Default for ReviewSummary<I> {
    fn default() -> Self {
        Self {
            applied: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<I: Copy> ReviewSummary<I> {
    fn collect(ids: &[I], mut review: impl FnMut(I) -> Result<Transition, LedgerError>) -> Self {
        let mut summary = Self::default();
        for &id in ids {
            match review(id) {
                Ok(Transition::Applied) => summary.applied.push(id),
                Ok(Transition::Unchanged(_)) => summary.unchanged.push(id),
                Err(e) => summary.failed.push((id, e)),
            }
        }
        summary
    }
}

/// Cashback engine managing accounts, links and reviews.
///
/// # Invariants
///
/// - A transaction's cashback is credited at most once, on approval.
/// - Deleting an approved transaction reverses exactly its cashback.
/// - A withdrawal is debited at most once, on approval, and never below zero.
/// - Review commands only act on pending rows; anything else is reported
///   as [`Transition::Unchanged`].
pub struct Engine {
    settings: Settings,
    /// Accounts indexed by user.
    accounts: DashMap<UserId, Account>,
    links: LinkRegistry,
    /// Owner lookup for reviewer commands, which address rows by id only.
    transaction_owners: DashMap<TransactionId, UserId>,
    withdrawal_owners: DashMap<WithdrawalId, UserId>,
    reviews: ReviewQueue,
    next_transaction_id: AtomicU64,
    next_withdrawal_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Engine {
            links: LinkRegistry::new(MerchantPolicy::from_settings(&settings)),
            settings,
            accounts: DashMap::new(),
            transaction_owners: DashMap::new(),
            withdrawal_owners: DashMap::new(),
            reviews: ReviewQueue::new(),
            next_transaction_id: AtomicU64::new(1),
            next_withdrawal_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // === Accounts ===

    /// Opens an account for a user supplied by the identity provider.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateAccount`] - The user already has an account.
    /// - [`LedgerError::InvalidPhoneNumber`] - Phone number too long.
    pub fn register(
        &self,
        user_id: UserId,
        phone_number: Option<String>,
    ) -> Result<(), LedgerError> {
        let account = Account::register(user_id, phone_number, Utc::now())?;
        match self.accounts.entry(user_id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateAccount),
            Entry::Vacant(entry) => {
                entry.insert(account);
                info!(user = %user_id, "account registered");
                Ok(())
            }
        }
    }

    /// Returns an iterator over all accounts.
    pub fn accounts(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, Account>> {
        self.accounts.iter()
    }

    /// Retrieves an account by user.
    ///
    /// Returns `None` if the user has not registered.
    pub fn get_account(&self, user_id: &UserId) -> Option<Ref<'_, UserId, Account>> {
        self.accounts.get(user_id)
    }

    fn account(&self, user_id: UserId) -> Result<Ref<'_, UserId, Account>, LedgerError> {
        self.accounts
            .get(&user_id)
            .ok_or(LedgerError::AccountNotFound)
    }

    pub fn summary(&self, user_id: UserId) -> Result<AccountSummary, LedgerError> {
        Ok(AccountSummary::from(&self.account(user_id)?.snapshot()))
    }

    /// The user's ledger entries, oldest first.
    pub fn statement(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.account(user_id)?.entries())
    }

    // === Links ===

    /// Converts a merchant product link into a tracked affiliate link.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] - Unknown user.
    /// - [`LedgerError::InvalidMerchantUrl`] - Not a merchant link.
    pub fn convert_link(&self, user_id: UserId, url: &str) -> Result<AffiliateLink, LedgerError> {
        self.account(user_id)?;
        let link = self.links.create(user_id, url, Utc::now())?;
        debug!(user = %user_id, link = %link.id, tracking_url = %link.tracking_url, "link converted");
        Ok(link)
    }

    /// Counts a visit to a tracking URL and returns where to redirect.
    pub fn track_click(&self, link_id: LinkId) -> Result<String, LedgerError> {
        let target = self.links.track_click(link_id)?;
        debug!(link = %link_id, "link clicked");
        Ok(target)
    }

    pub fn resolve_tracking_url(&self, tracking_url: &str) -> Option<LinkId> {
        self.links.policy().resolve(tracking_url)
    }

    pub fn link(&self, link_id: LinkId) -> Option<AffiliateLink> {
        self.links.get(link_id)
    }

    /// The user's links, newest first.
    pub fn links_for(&self, user_id: UserId) -> Result<Vec<AffiliateLink>, LedgerError> {
        self.account(user_id)?;
        Ok(self.links.for_owner(user_id))
    }

    // === Transactions ===

    /// Records a purchase for review.
    ///
    /// Commission and cashback are derived from the price with the
    /// configured rates. The transaction starts pending and joins the
    /// review queue.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] - Unknown user.
    /// - [`LedgerError::LinkNotFound`] - Link missing or owned by someone else.
    /// - [`LedgerError::InvalidPrice`] / [`LedgerError::InvalidProductName`] - Malformed input.
    pub fn submit_transaction(
        &self,
        user_id: UserId,
        link_id: Option<LinkId>,
        product_name: &str,
        product_price: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let account = self.account(user_id)?;
        if let Some(link_id) = link_id {
            self.links.get_owned(user_id, link_id)?;
        }

        let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::SeqCst));
        let transaction = Transaction::new(
            id,
            user_id,
            link_id,
            product_name,
            product_price,
            self.settings.commission_rate,
            Utc::now(),
        )?;
        let transaction = account.record_transaction(transaction, self.settings.cashback_rate)?;
        drop(account);

        self.transaction_owners.insert(id, user_id);
        self.reviews.push(ReviewItem::Transaction(id))?;
        debug!(
            user = %user_id,
            transaction = %id,
            cashback = %transaction.cashback_amount,
            "transaction submitted"
        );
        Ok(transaction)
    }

    fn transaction_owner(&self, id: TransactionId) -> Result<UserId, LedgerError> {
        self.transaction_owners
            .get(&id)
            .map(|owner| *owner)
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// Looks up one of the user's transactions.
    pub fn transaction_detail(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        self.account(user_id)?
            .transaction(id)
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// Any transaction, for reviewers.
    pub fn transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let owner = self.transaction_owner(id)?;
        self.account(owner)?
            .transaction(id)
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// The user's transactions, newest first.
    pub fn transactions_for(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.account(user_id)?.transactions())
    }

    /// Reviewer correction of a pending transaction's product details.
    pub fn amend_transaction(
        &self,
        id: TransactionId,
        amendment: &TransactionAmendment,
    ) -> Result<Transaction, LedgerError> {
        let owner = self.transaction_owner(id)?;
        self.account(owner)?
            .amend_transaction(id, amendment, self.settings.cashback_rate, Utc::now())
    }

    /// Approves a pending transaction and credits its cashback.
    pub fn approve_transaction(&self, id: TransactionId) -> Result<Transition, LedgerError> {
        let owner = self.transaction_owner(id)?;
        let account = self.account(owner)?;
        let transition = account.approve_transaction(id, Utc::now())?;
        if transition == Transition::Applied {
            info!(
                user = %owner,
                transaction = %id,
                balance = %account.balance(),
                "transaction approved"
            );
        }
        Ok(transition)
    }

    pub fn reject_transaction(&self, id: TransactionId) -> Result<Transition, LedgerError> {
        let owner = self.transaction_owner(id)?;
        let transition = self.account(owner)?.reject_transaction(id, Utc::now())?;
        if transition == Transition::Applied {
            info!(user = %owner, transaction = %id, "transaction rejected");
        }
        Ok(transition)
    }

    /// Approves each row on its own; approved rows are not credited again.
    pub fn approve_transactions(&self, ids: &[TransactionId]) -> ReviewSummary<TransactionId> {
        ReviewSummary::collect(ids, |id| self.approve_transaction(id))
    }

    pub fn reject_transactions(&self, ids: &[TransactionId]) -> ReviewSummary<TransactionId> {
        ReviewSummary::collect(ids, |id| self.reject_transaction(id))
    }

    /// Deletes one of the user's transactions, reversing its cashback
    /// first if it was approved.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - Missing or owned by someone else.
    /// - [`LedgerError::InsufficientBalance`] - The cashback was already withdrawn.
    pub fn delete_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        let account = self.account(user_id)?;
        let removed = account.delete_transaction(id, Utc::now())?;
        let balance = account.balance();
        drop(account);

        self.transaction_owners.remove(&id);
        if removed.status == ReviewStatus::Approved {
            info!(
                user = %user_id,
                transaction = %id,
                reversed = %removed.cashback_amount,
                balance = %balance,
                "approved transaction deleted"
            );
        } else {
            debug!(user = %user_id, transaction = %id, "transaction deleted");
        }
        Ok(removed)
    }

    // === Withdrawals ===

    /// Opens a payout request.
    ///
    /// Nothing is reserved: pending requests can together exceed the
    /// balance. Approval re-checks the balance.
    pub fn request_withdrawal(
        &self,
        user_id: UserId,
        request: WithdrawalRequest,
    ) -> Result<Withdrawal, LedgerError> {
        let account = self.account(user_id)?;
        let id = WithdrawalId(self.next_withdrawal_id.fetch_add(1, Ordering::SeqCst));
        let withdrawal = account.request_withdrawal(
            id,
            request,
            self.settings.minimum_withdrawal,
            Utc::now(),
        )?;
        drop(account);

        self.withdrawal_owners.insert(id, user_id);
        self.reviews.push(ReviewItem::Withdrawal(id))?;
        debug!(user = %user_id, withdrawal = %id, amount = %withdrawal.amount, "withdrawal requested");
        Ok(withdrawal)
    }

    fn withdrawal_owner(&self, id: WithdrawalId) -> Result<UserId, LedgerError> {
        self.withdrawal_owners
            .get(&id)
            .map(|owner| *owner)
            .ok_or(LedgerError::WithdrawalNotFound)
    }

    pub fn withdrawal(&self, id: WithdrawalId) -> Result<Withdrawal, LedgerError> {
        let owner = self.withdrawal_owner(id)?;
        self.account(owner)?
            .withdrawal(id)
            .ok_or(LedgerError::WithdrawalNotFound)
    }

    /// Approves a pending withdrawal and debits the balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientBalance`] when the balance no longer covers
    /// the amount. The request stays pending.
    pub fn approve_withdrawal(&self, id: WithdrawalId) -> Result<Transition, LedgerError> {
        let owner = self.withdrawal_owner(id)?;
        let account = self.account(owner)?;
        let transition = account.approve_withdrawal(id, Utc::now())?;
        if transition == Transition::Applied {
            info!(
                user = %owner,
                withdrawal = %id,
                balance = %account.balance(),
                "withdrawal approved"
            );
        }
        Ok(transition)
    }

    pub fn reject_withdrawal(&self, id: WithdrawalId) -> Result<Transition, LedgerError> {
        let owner = self.withdrawal_owner(id)?;
        let transition = self.account(owner)?.reject_withdrawal(id)?;
        if transition == Transition::Applied {
            info!(user = %owner, withdrawal = %id, "withdrawal rejected");
        }
        Ok(transition)
    }

    pub fn approve_withdrawals(&self, ids: &[WithdrawalId]) -> ReviewSummary<WithdrawalId> {
        ReviewSummary::collect(ids, |id| self.approve_withdrawal(id))
    }

    pub fn reject_withdrawals(&self, ids: &[WithdrawalId]) -> ReviewSummary<WithdrawalId> {
        ReviewSummary::collect(ids, |id| self.reject_withdrawal(id))
    }

    pub fn withdrawal_history(&self, user_id: UserId) -> Result<WithdrawalHistory, LedgerError> {
        Ok(WithdrawalHistory::build(&self.account(user_id)?.snapshot()))
    }

    // === Review queue and reports ===

    /// Pops the oldest queued row that is still pending.
    pub fn next_for_review(&self) -> Option<ReviewItem> {
        while let Some(item) = self.reviews.pop() {
            if self.is_pending(item) {
                return Some(item);
            }
        }
        None
    }

    /// Puts a popped row back at the end of the queue.
    pub fn requeue(&self, item: ReviewItem) -> Result<(), LedgerError> {
        if !self.is_pending(item) {
            return Err(LedgerError::AlreadyReviewed);
        }
        self.reviews.push(item)
    }

    fn is_pending(&self, item: ReviewItem) -> bool {
        match item {
            ReviewItem::Transaction(id) => self
                .transaction(id)
                .is_ok_and(|tx| tx.status.is_pending()),
            ReviewItem::Withdrawal(id) => self
                .withdrawal(id)
                .is_ok_and(|w| w.status.is_pending()),
        }
    }

    pub fn dashboard(&self, user_id: UserId) -> Result<Dashboard, LedgerError> {
        let snapshot = self.account(user_id)?.snapshot();
        Ok(Dashboard::build(&snapshot, self.links.count_for(user_id)))
    }

    pub fn admin_overview(&self) -> AdminOverview {
        let snapshots: Vec<_> = self
            .accounts
            .iter()
            .map(|account| account.snapshot())
            .collect();
        AdminOverview::build(snapshots, self.links.len())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::withdrawal::PaymentMethod;
    use rust_decimal_macros::dec;

    fn engine_with_user() -> Engine {
        let engine = Engine::new();
        engine.register(UserId(1), None).unwrap();
        engine
    }

    #[test]
    fn summary_reflects_registration() {
        let engine = Engine::new();
        engine
            .register(UserId(3), Some("09171234567".to_string()))
            .unwrap();
        let summary = engine.summary(UserId(3)).unwrap();
        assert_eq!(summary.phone_number.as_deref(), Some("09171234567"));
        assert_eq!(summary.balance, Decimal::ZERO);
    }

    #[test]
    fn review_queue_skips_rows_reviewed_elsewhere() {
        let engine = engine_with_user();
        let a = engine
            .submit_transaction(UserId(1), None, "A", dec!(1000))
            .unwrap();
        let b = engine
            .submit_transaction(UserId(1), None, "B", dec!(1000))
            .unwrap();
        engine.approve_transaction(a.id).unwrap();

        assert_eq!(engine.next_for_review(), Some(ReviewItem::Transaction(b.id)));
        assert_eq!(engine.next_for_review(), None);
    }

    #[test]
    fn requeue_puts_pending_row_back() {
        let engine = engine_with_user();
        let tx = engine
            .submit_transaction(UserId(1), None, "A", dec!(1000))
            .unwrap();
        let item = engine.next_for_review().unwrap();
        engine.requeue(item).unwrap();
        assert_eq!(engine.next_for_review(), Some(ReviewItem::Transaction(tx.id)));

        engine.reject_transaction(tx.id).unwrap();
        assert_eq!(engine.requeue(item), Err(LedgerError::AlreadyReviewed));
    }

    #[test]
    fn deleted_rows_leave_the_owner_index() {
        let engine = engine_with_user();
        let tx = engine
            .submit_transaction(UserId(1), None, "A", dec!(1000))
            .unwrap();
        engine.delete_transaction(UserId(1), tx.id).unwrap();
        assert_eq!(
            engine.approve_transaction(tx.id),
            Err(LedgerError::TransactionNotFound)
        );
        assert_eq!(engine.next_for_review(), None);
    }

    #[test]
    fn withdrawal_review_queue_and_statement() {
        let engine = engine_with_user();
        let tx = engine
            .submit_transaction(UserId(1), None, "TV", dec!(40000))
            .unwrap();
        engine.approve_transaction(tx.id).unwrap();
        assert_eq!(engine.summary(UserId(1)).unwrap().balance, dec!(200.00));

        let withdrawal = engine
            .request_withdrawal(
                UserId(1),
                WithdrawalRequest {
                    amount: dec!(150),
                    payment_method: PaymentMethod::PayMaya,
                    payment_details: "09181234567".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            engine.next_for_review(),
            Some(ReviewItem::Withdrawal(withdrawal.id))
        );
        engine.approve_withdrawal(withdrawal.id).unwrap();

        let statement = engine.statement(UserId(1)).unwrap();
        assert_eq!(statement.len(), 2);
        assert_eq!(statement[1].balance_after, dec!(50.00));
        assert_eq!(
            engine.withdrawal(withdrawal.id).unwrap().status,
            ReviewStatus::Approved
        );
    }
}
