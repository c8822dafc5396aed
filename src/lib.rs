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

//! # Cashback Ledger
//!
//! Bookkeeping core for an affiliate cashback service: users convert
//! merchant product links into tracked links, submit purchases for
//! commission review, accrue cashback, and withdraw it.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central processor owning accounts, links and the review queue
//! - [`Account`]: Per-user profile, transactions, withdrawals and ledger
//! - [`Ledger`]: Append-only record every balance change goes through
//! - [`LedgerError`]: Error types for refused operations
//!
//! ## Example
//!
//! ```
//! use cashback_ledger_rs::{Engine, Transition, UserId};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! engine.register(UserId(1), None).unwrap();
//!
//! let link = engine
//!     .convert_link(UserId(1), "https://shopee.ph/product/1/2")
//!     .unwrap();
//! let tx = engine
//!     .submit_transaction(UserId(1), Some(link.id), "Headphones", dec!(1000))
//!     .unwrap();
//! assert_eq!(tx.cashback_amount, dec!(5.00));
//!
//! assert_eq!(engine.approve_transaction(tx.id).unwrap(), Transition::Applied);
//! let account = engine.get_account(&UserId(1)).unwrap();
//! assert_eq!(account.balance(), dec!(5.00));
//! ```
//!
//! ## Thread Safety
//!
//! Each account serializes its own changes, so requests for different
//! users are processed in parallel.

pub mod account;
mod base;
pub mod config;
mod engine;
pub mod error;
pub mod ledger;
pub mod link;
pub mod report;
pub mod review_queue;
pub mod transaction;
pub mod withdrawal;

pub use account::{Account, AccountSnapshot, Transition, WithdrawalRequest};
pub use base::{LinkId, ReviewStatus, TransactionId, UserId, WithdrawalId};
pub use config::{ConfigError, Settings};
pub use engine::{Engine, ReviewSummary};
pub use error::LedgerError;
pub use ledger::{EntryKind, Ledger, LedgerEntry};
pub use link::{AffiliateLink, LinkRegistry, MerchantPolicy};
pub use report::{AccountSummary, AdminOverview, Dashboard, WithdrawalHistory};
pub use review_queue::{ReviewItem, ReviewQueue};
pub use transaction::{Transaction, TransactionAmendment, cashback_for, estimate_commission};
pub use withdrawal::{PaymentMethod, Withdrawal};
