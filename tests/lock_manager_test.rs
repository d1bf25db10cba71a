use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use taigadb::common::types::Rid;
use taigadb::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionRegistry,
    TransactionState,
};

mod common;
use common::create_test_txn_harness;

fn register(
    registry: &Arc<TransactionRegistry>,
    id: u64,
    isolation: IsolationLevel,
) -> Arc<Transaction> {
    let txn = Arc::new(Transaction::new(id, isolation));
    registry.register(txn.clone());
    txn
}

#[test]
fn test_shared_lock_rejected_at_read_uncommitted() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::ReadUncommitted);
    let rid = Rid::new(0, 0);

    let err = lock_manager.lock_shared(&txn, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(err.txn_id, txn.id());
    assert_eq!(txn.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_lock_in_shrinking_phase_rejected() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::RepeatableRead);
    let r1 = Rid::new(0, 0);
    let r2 = Rid::new(0, 1);

    assert!(lock_manager.lock_shared(&txn, r1)?);
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lock_manager.lock_shared(&txn, r2).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(txn.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_read_committed_shared_release_stays_growing() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::ReadCommitted);
    let r1 = Rid::new(0, 0);
    let r2 = Rid::new(0, 1);

    assert!(lock_manager.lock_shared(&txn, r1)?);
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Growing);

    // still in the growing phase, so new locks are legal
    assert!(lock_manager.lock_shared(&txn, r2)?);

    Ok(())
}

#[test]
fn test_exclusive_release_begins_shrinking() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::ReadCommitted);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_exclusive(&txn, rid)?);
    assert!(lock_manager.unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    Ok(())
}

#[test]
fn test_upgrade_in_growing_phase() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_shared(&txn, rid)?);
    assert!(lock_manager.lock_upgrade(&txn, rid)?);
    assert!(!txn.is_shared_locked(rid));
    assert!(txn.is_exclusive_locked(rid));
    assert_eq!(txn.state(), TransactionState::Growing);

    Ok(())
}

#[test]
fn test_upgrade_in_shrinking_phase_aborts() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let txn = register(&registry, 0, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_shared(&txn, rid)?);
    assert!(lock_manager.unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lock_manager.lock_upgrade(&txn, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(txn.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_upgrade_wounds_younger_shared_holder() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let older = register(&registry, 0, IsolationLevel::RepeatableRead);
    let younger = register(&registry, 1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_shared(&older, rid)?);
    assert!(lock_manager.lock_shared(&younger, rid)?);

    // the older transaction upgrades; the younger shared holder is wounded
    assert!(lock_manager.lock_upgrade(&older, rid)?);
    assert!(older.is_exclusive_locked(rid));
    assert_eq!(younger.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_wound_wait_aborts_younger_holder() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let old = register(&registry, 1, IsolationLevel::RepeatableRead);
    let older_still = register(&registry, 0, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_exclusive(&old, rid)?);

    let young = register(&registry, 2, IsolationLevel::RepeatableRead);
    let young_handle = {
        let lock_manager = lock_manager.clone();
        let young = young.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&young, rid))
    };

    // let the young request enqueue and block behind the older holder
    thread::sleep(Duration::from_millis(100));

    // the oldest transaction wounds both the holder and the waiter
    assert!(lock_manager.lock_exclusive(&older_still, rid)?);
    assert!(older_still.is_exclusive_locked(rid));
    assert_eq!(old.state(), TransactionState::Aborted);

    let young_result = young_handle.join().unwrap();
    assert!(!young_result?);
    assert_eq!(young.state(), TransactionState::Aborted);
    assert!(!young.is_exclusive_locked(rid));

    Ok(())
}

#[test]
fn test_younger_waits_until_older_releases() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let older = register(&registry, 0, IsolationLevel::RepeatableRead);
    let younger = register(&registry, 1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_shared(&older, rid)?);

    let younger_handle = {
        let lock_manager = lock_manager.clone();
        let younger = younger.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&younger, rid))
    };

    thread::sleep(Duration::from_millis(100));
    // the younger transaction is still queued, not granted
    assert!(!younger.is_exclusive_locked(rid));

    assert!(lock_manager.unlock(&older, rid));

    let younger_result = younger_handle.join().unwrap();
    assert!(younger_result?);
    assert!(younger.is_exclusive_locked(rid));

    Ok(())
}

#[test]
fn test_older_shared_waiter_granted_before_younger() -> Result<()> {
    let (registry, lock_manager, _txn_manager) = create_test_txn_harness();
    let holder = register(&registry, 0, IsolationLevel::RepeatableRead);
    let older = register(&registry, 1, IsolationLevel::RepeatableRead);
    let younger = register(&registry, 2, IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 0);

    assert!(lock_manager.lock_exclusive(&holder, rid)?);

    let older_handle = {
        let lock_manager = lock_manager.clone();
        let older = older.clone();
        thread::spawn(move || lock_manager.lock_shared(&older, rid))
    };
    thread::sleep(Duration::from_millis(100));

    let younger_handle = {
        let lock_manager = lock_manager.clone();
        let older = older.clone();
        let younger = younger.clone();
        thread::spawn(move || -> Result<(bool, bool), TransactionAbort> {
            let granted = lock_manager.lock_shared(&younger, rid)?;
            // admission is FIFO among compatible waiters, so the older
            // shared request must already hold the lock by now
            Ok((granted, older.is_shared_locked(rid)))
        })
    };
    thread::sleep(Duration::from_millis(100));

    // both shared requests are queued behind the exclusive holder
    assert!(!older.is_shared_locked(rid));
    assert!(!younger.is_shared_locked(rid));

    assert!(lock_manager.unlock(&holder, rid));

    assert!(older_handle.join().unwrap()?);
    let (younger_granted, older_granted_first) = younger_handle.join().unwrap()?;
    assert!(younger_granted);
    assert!(older_granted_first);

    Ok(())
}

#[test]
fn test_commit_releases_locks_for_waiters() -> Result<()> {
    let (_registry, lock_manager, txn_manager) = create_test_txn_harness();
    let first = txn_manager.begin(IsolationLevel::RepeatableRead);
    let second = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(3, 0);

    assert!(lock_manager.lock_exclusive(&first, rid)?);

    let waiter = {
        let lock_manager = lock_manager.clone();
        let second = second.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&second, rid))
    };

    thread::sleep(Duration::from_millis(100));
    txn_manager.commit(&first);
    assert_eq!(first.state(), TransactionState::Committed);

    let waiter_result = waiter.join().unwrap();
    assert!(waiter_result?);
    assert!(second.is_exclusive_locked(rid));

    txn_manager.commit(&second);

    Ok(())
}

#[test]
fn test_wounded_waiter_can_be_aborted_by_manager() -> Result<()> {
    let (_registry, lock_manager, txn_manager) = create_test_txn_harness();
    let old = txn_manager.begin(IsolationLevel::RepeatableRead);
    let young = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(4, 0);

    assert!(lock_manager.lock_exclusive(&young, rid)?);

    // the older request wounds the younger holder immediately
    assert!(lock_manager.lock_exclusive(&old, rid)?);
    assert_eq!(young.state(), TransactionState::Aborted);

    // completing the wounded transaction is clean and idempotent
    let undo = txn_manager.abort(&young);
    assert!(undo.is_empty());
    assert_eq!(young.state(), TransactionState::Aborted);
    assert!(old.is_exclusive_locked(rid));

    txn_manager.commit(&old);

    Ok(())
}
