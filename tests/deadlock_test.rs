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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the engine from many threads at once, mixing reviewer
//! commands, owner deletions, withdrawals and read-only projections, while
//! a background thread watches the lock graph for cycles.

use cashback_ledger_rs::{
    Engine, PaymentMethod, TransactionId, UserId, WithdrawalId, WithdrawalRequest,
};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// === Deadlock Detection ===

/// Starts a background thread that panics if it finds a lock cycle.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

fn engine_with_users(users: u32) -> Arc<Engine> {
    let engine = Engine::new();
    for user in 1..=users {
        engine.register(UserId(user), None).unwrap();
    }
    Arc::new(engine)
}

fn request(amount: Decimal) -> WithdrawalRequest {
    WithdrawalRequest {
        amount,
        payment_method: PaymentMethod::Bank,
        payment_details: "BPI 0000-1234".to_string(),
    }
}

// === Tests ===

/// Many reviewers approving the same transactions of one account.
#[test]
fn no_deadlock_high_contention_single_account() {
    let detector = start_deadlock_detector();
    let engine = engine_with_users(1);

    const TRANSACTIONS: usize = 200;
    const NUM_THREADS: usize = 16;

    let ids: Arc<Vec<TransactionId>> = Arc::new(
        (0..TRANSACTIONS)
            .map(|_| {
                engine
                    .submit_transaction(UserId(1), None, "Mug", dec!(1000))
                    .unwrap()
                    .id
            })
            .collect(),
    );

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            let ids = ids.clone();
            thread::spawn(move || engine.approve_transactions(&ids).applied.len())
        })
        .collect();

    let applied: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    stop_deadlock_detector(detector);

    assert_eq!(applied, TRANSACTIONS);
    let account = engine.get_account(&UserId(1)).unwrap();
    assert_eq!(account.balance(), dec!(5) * Decimal::from(TRANSACTIONS));
    assert!(account.verify_ledger());
}

/// Approvals racing owner deletions: every approved-then-deleted row nets
/// to zero and nothing is credited twice.
#[test]
fn no_deadlock_approve_delete_race() {
    let detector = start_deadlock_detector();
    let engine = engine_with_users(4);

    const PER_USER: usize = 100;

    let mut rows = Vec::new();
    for user in 1..=4 {
        for _ in 0..PER_USER {
            let tx = engine
                .submit_transaction(UserId(user), None, "Lamp", dec!(2000))
                .unwrap();
            rows.push((UserId(user), tx.id));
        }
    }
    let rows = Arc::new(rows);

    let approver = {
        let engine = engine.clone();
        let rows = rows.clone();
        thread::spawn(move || {
            for &(_, id) in rows.iter() {
                let _ = engine.approve_transaction(id);
            }
        })
    };
    let deleter = {
        let engine = engine.clone();
        let rows = rows.clone();
        thread::spawn(move || {
            for &(user, id) in rows.iter().rev() {
                let _ = engine.delete_transaction(user, id);
            }
        })
    };

    approver.join().unwrap();
    deleter.join().unwrap();
    stop_deadlock_detector(detector);

    for user in 1..=4 {
        let account = engine.get_account(&UserId(user)).unwrap();
        assert!(account.verify_ledger());
        let remaining: Decimal = account
            .transactions()
            .iter()
            .filter(|tx| tx.status == cashback_ledger_rs::ReviewStatus::Approved)
            .map(|tx| tx.cashback_amount)
            .sum();
        assert_eq!(account.balance(), remaining);
    }
}

/// Withdrawal approvals on one account from many threads never overdraw.
#[test]
fn no_deadlock_concurrent_withdrawal_approvals() {
    let detector = start_deadlock_detector();
    let engine = engine_with_users(1);

    // 200000 * 10% * 5% = 1000
    let tx = engine
        .submit_transaction(UserId(1), None, "Laptop", dec!(200000))
        .unwrap();
    engine.approve_transaction(tx.id).unwrap();

    let ids: Vec<WithdrawalId> = (0..30)
        .map(|_| engine.request_withdrawal(UserId(1), request(dec!(100))).unwrap().id)
        .collect();

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let engine = engine.clone();
            thread::spawn(move || engine.approve_withdrawal(id).is_ok())
        })
        .collect();
    let approved = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    stop_deadlock_detector(detector);

    assert_eq!(approved, 10);
    let account = engine.get_account(&UserId(1)).unwrap();
    assert_eq!(account.balance(), Decimal::ZERO);
    assert!(account.verify_ledger());
}

/// Projections iterate every account while writers keep mutating them.
#[test]
fn no_deadlock_iteration_during_mutation() {
    let detector = start_deadlock_detector();
    let engine = engine_with_users(8);
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (1..=8)
        .map(|user| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let tx = engine
                        .submit_transaction(UserId(user), None, "Pen", dec!(100))
                        .unwrap();
                    engine.approve_transaction(tx.id).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut rounds = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    let overview = engine.admin_overview();
                    assert!(overview.total_users == 8);
                    for account in engine.accounts() {
                        assert!(account.balance() >= Decimal::ZERO);
                    }
                    let _ = engine.dashboard(UserId(1));
                    rounds += 1;
                }
                rounds
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    for r in readers {
        r.join().unwrap();
    }
    stop_deadlock_detector(detector);

    // 100 * 10% * 5% = 0.50, 200 times
    for user in 1..=8 {
        assert_eq!(
            engine.get_account(&UserId(user)).unwrap().balance(),
            dec!(100)
        );
    }
}

/// Registrations, link clicks and review queue draining in parallel.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());

    const NUM_THREADS: u32 = 12;

    let handles: Vec<_> = (1..=NUM_THREADS)
        .map(|user| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.register(UserId(user), None).unwrap();
                let link = engine
                    .convert_link(UserId(user), "https://shopee.ph/item/1")
                    .unwrap();
                for _ in 0..100 {
                    engine.track_click(link.id).unwrap();
                }
                for _ in 0..20 {
                    engine
                        .submit_transaction(UserId(user), Some(link.id), "Cap", dec!(500))
                        .unwrap();
                }
                while let Some(item) = engine.next_for_review() {
                    if let cashback_ledger_rs::ReviewItem::Transaction(id) = item {
                        let _ = engine.approve_transaction(id);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    // Rows queued after a thread finished draining are picked up here.
    while let Some(cashback_ledger_rs::ReviewItem::Transaction(id)) = engine.next_for_review() {
        engine.approve_transaction(id).unwrap();
    }
    stop_deadlock_detector(detector);

    let overview = engine.admin_overview();
    assert_eq!(overview.total_users, NUM_THREADS as usize);
    assert_eq!(overview.total_links, NUM_THREADS as usize);
    // 500 * 10% * 5% = 2.50, 20 per user
    assert_eq!(overview.total_cashback, dec!(50) * Decimal::from(NUM_THREADS));
    for link in 1..=NUM_THREADS as u64 {
        assert_eq!(
            engine
                .link(cashback_ledger_rs::LinkId(link))
                .unwrap()
                .click_count,
            100
        );
    }
}

/// Verifies the detector infrastructure runs alongside normal operations.
#[test]
fn deadlock_detector_runs_cleanly() {
    let detector = start_deadlock_detector();

    let engine = Engine::new();
    engine.register(UserId(1), None).unwrap();
    let tx = engine
        .submit_transaction(UserId(1), None, "Desk", dec!(30000))
        .unwrap();
    engine.approve_transaction(tx.id).unwrap();

    let account = engine.get_account(&UserId(1)).unwrap();
    assert_eq!(account.balance(), dec!(150));
    drop(account);

    stop_deadlock_detector(detector);
}
