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

//! FIFO queue of rows waiting for a reviewer.
//!
//! Submitted transactions and withdrawal requests are queued in arrival
//! order. Rows reviewed through another path stay queued until popped;
//! the engine skips them then.

use crate::LedgerError;
use crate::base::{TransactionId, WithdrawalId};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReviewItem {
    Transaction(TransactionId),
    Withdrawal(WithdrawalId),
}

/// A thread-safe review queue with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// to preserve arrival order.
#[derive(Debug)]
pub struct ReviewQueue {
    /// Items currently queued.
    queued: DashMap<ReviewItem, ()>,

    /// Items in FIFO order.
    order: SegQueue<ReviewItem>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self {
            queued: DashMap::new(),
            order: SegQueue::new(),
        }
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateEntry`] if the item is already queued.
    pub fn push(&self, item: ReviewItem) -> Result<(), LedgerError> {
        match self.queued.entry(item) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateEntry),
            Entry::Vacant(entry) => {
                entry.insert(());
                self.order.push(item);
                Ok(())
            }
        }
    }

    /// Removes and returns the oldest item.
    pub fn pop(&self) -> Option<ReviewItem> {
        let item = self.order.pop()?;
        self.queued.remove(&item);
        Some(item)
    }

    pub fn contains(&self, item: &ReviewItem) -> bool {
        self.queued.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::new()
    }
}
