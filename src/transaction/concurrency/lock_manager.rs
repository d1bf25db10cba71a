use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionRegistry;

/// Tuple lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

fn compatible(a: LockMode, b: LockMode) -> bool {
    a == LockMode::Shared && b == LockMode::Shared
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-tuple request queue. Once created for a tuple it is never removed;
/// every mutation of `requests` ends with a broadcast so waiters re-check.
struct LockQueue {
    requests: Mutex<VecDeque<LockRequest>>,
    cv: Condvar,
}

impl LockQueue {
    fn new() -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }
}

/// Tuple-level two-phase-locking coordinator with wound-wait deadlock
/// prevention.
///
/// Locking discipline: the table mutex is held only long enough to locate
/// or create a queue; all waiting happens on the queue's own mutex and
/// condition variable. Transaction identifiers order the wound-wait policy:
/// a smaller identifier is older, and an older transaction never waits for
/// a strictly younger one; the younger side is aborted instead.
pub struct LockManager {
    registry: Arc<TransactionRegistry>,
    lock_table: Mutex<HashMap<Rid, Arc<LockQueue>>>,
}

impl LockManager {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self {
            registry,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on `rid`, blocking until granted.
    ///
    /// Returns `Ok(false)` if the transaction was wounded while waiting.
    /// Raises an abort error for requests that are illegal at the
    /// transaction's isolation level or phase.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        self.check_admissible(txn, LockMode::Shared)?;
        Ok(self.acquire(txn, rid, LockMode::Shared))
    }

    /// Take an exclusive lock on `rid`, blocking until granted.
    ///
    /// Returns `Ok(false)` if the transaction was wounded while waiting.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        self.check_admissible(txn, LockMode::Exclusive)?;
        Ok(self.acquire(txn, rid, LockMode::Exclusive))
    }

    /// Upgrade a shared lock on `rid` to exclusive.
    ///
    /// Legal only in the growing phase. A transaction that holds no shared
    /// lock on `rid` falls through to a fresh exclusive request.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }
        if txn.is_shared_locked(rid) {
            let queue = self.queue(rid);
            {
                let mut requests = queue.requests.lock();
                Self::remove_request(&mut requests, txn.id());
                queue.cv.notify_all();
            }
            txn.remove_shared(rid);
        }
        Ok(self.acquire(txn, rid, LockMode::Exclusive))
    }

    /// Release the lock `txn` holds on `rid`.
    ///
    /// On a completed transaction this is a cleanup call: queue entries and
    /// set membership are dropped and the result reports whether the
    /// transaction committed. On an active transaction, releasing an
    /// exclusive lock (or a shared lock at REPEATABLE_READ) moves it to
    /// the shrinking phase. Returns false if `txn` held nothing on `rid`.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let queue = self.queue(rid);
        let mut requests = queue.requests.lock();

        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            Self::remove_request(&mut requests, txn.id());
            txn.remove_shared(rid);
            txn.remove_exclusive(rid);
            queue.cv.notify_all();
            return state == TransactionState::Committed;
        }

        let released = if txn.is_exclusive_locked(rid) {
            txn.remove_exclusive(rid);
            txn.try_transition(TransactionState::Growing, TransactionState::Shrinking);
            true
        } else if txn.is_shared_locked(rid) {
            txn.remove_shared(rid);
            if txn.isolation_level() == IsolationLevel::RepeatableRead {
                txn.try_transition(TransactionState::Growing, TransactionState::Shrinking);
            }
            true
        } else {
            false
        };

        if released {
            Self::remove_request(&mut requests, txn.id());
        }
        queue.cv.notify_all();
        released
    }

    /// Release every lock `txn` holds; used at commit and abort
    pub fn release_all(&self, txn: &Transaction) {
        for rid in txn.exclusive_locks() {
            self.unlock(txn, rid);
        }
        for rid in txn.shared_locks() {
            self.unlock(txn, rid);
        }
    }

    /// Phase and isolation gating, applied before a request is enqueued.
    /// The transaction is aborted before the error is returned.
    fn check_admissible(&self, txn: &Transaction, mode: LockMode) -> Result<(), TransactionAbort> {
        if mode == LockMode::Shared && txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        Ok(())
    }

    /// Enqueue a request and wait until it is admitted or the transaction
    /// is wounded. Returns true on grant.
    fn acquire(&self, txn: &Transaction, rid: Rid, mode: LockMode) -> bool {
        let queue = self.queue(rid);
        let mut requests = queue.requests.lock();
        requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut requests, txn.id());
                queue.cv.notify_all();
                return false;
            }
            if self.admissible(&mut requests, txn.id(), mode, &queue) {
                break;
            }
            queue.cv.wait(&mut requests);
        }

        // a wound from another queue may have landed after the admission check
        if txn.state() == TransactionState::Aborted {
            Self::remove_request(&mut requests, txn.id());
            queue.cv.notify_all();
            return false;
        }

        for request in requests.iter_mut() {
            if request.txn_id == txn.id() {
                request.granted = true;
            }
        }
        match mode {
            LockMode::Shared => txn.insert_shared(rid),
            LockMode::Exclusive => txn.insert_exclusive(rid),
        }
        queue.cv.notify_all();
        true
    }

    /// One wound-wait admission pass for `txn_id` requesting `mode`.
    ///
    /// Younger transactions with incompatible requests are wounded: marked
    /// Aborted through the registry, dropped from the queue, and the queue
    /// is broadcast so their waiters self-remove. The request is admitted
    /// only once every older request is granted in a compatible mode: an
    /// older request that is still waiting blocks regardless of its mode,
    /// keeping admission FIFO among compatible waiters. Only older entries
    /// are inspected, so an older transaction never waits for a younger
    /// one.
    fn admissible(
        &self,
        requests: &mut VecDeque<LockRequest>,
        txn_id: TxnId,
        mode: LockMode,
        queue: &LockQueue,
    ) -> bool {
        let mut wounded = false;
        requests.retain(|request| {
            if request.txn_id > txn_id && !compatible(mode, request.mode) {
                if let Some(victim) = self.registry.get(request.txn_id) {
                    if victim.abort_unless_completed() {
                        debug!("txn {} wounds txn {}", txn_id, request.txn_id);
                    }
                }
                wounded = true;
                false
            } else {
                true
            }
        });
        if wounded {
            queue.cv.notify_all();
        }

        !requests.iter().any(|request| {
            request.txn_id < txn_id && (!request.granted || !compatible(mode, request.mode))
        })
    }

    fn queue(&self, rid: Rid) -> Arc<LockQueue> {
        self.lock_table
            .lock()
            .entry(rid)
            .or_insert_with(|| Arc::new(LockQueue::new()))
            .clone()
    }

    fn remove_request(requests: &mut VecDeque<LockRequest>, txn_id: TxnId) {
        requests.retain(|request| request.txn_id != txn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (Arc<TransactionRegistry>, LockManager) {
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = LockManager::new(registry.clone());
        (registry, lock_manager)
    }

    fn begin(
        registry: &Arc<TransactionRegistry>,
        id: TxnId,
        isolation: IsolationLevel,
    ) -> Arc<Transaction> {
        let txn = Arc::new(Transaction::new(id, isolation));
        registry.register(txn.clone());
        txn
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let (registry, lm) = harness();
        let t0 = begin(&registry, 0, IsolationLevel::RepeatableRead);
        let t1 = begin(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        assert!(lm.lock_shared(&t0, rid).unwrap());
        assert!(lm.lock_shared(&t1, rid).unwrap());
        assert!(t0.is_shared_locked(rid));
        assert!(t1.is_shared_locked(rid));
    }

    #[test]
    fn test_lock_shared_is_idempotent() {
        let (registry, lm) = harness();
        let t0 = begin(&registry, 0, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        assert!(lm.lock_shared(&t0, rid).unwrap());
        assert!(lm.lock_shared(&t0, rid).unwrap());

        let queue = lm.queue(rid);
        assert_eq!(queue.requests.lock().len(), 1);
    }

    #[test]
    fn test_older_exclusive_wounds_younger_holder() {
        let (registry, lm) = harness();
        let young = begin(&registry, 5, IsolationLevel::RepeatableRead);
        let old = begin(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        assert!(lm.lock_exclusive(&young, rid).unwrap());
        assert!(lm.lock_exclusive(&old, rid).unwrap());

        assert_eq!(young.state(), TransactionState::Aborted);
        assert!(old.is_exclusive_locked(rid));
    }

    #[test]
    fn test_unlock_without_hold_returns_false() {
        let (registry, lm) = harness();
        let t0 = begin(&registry, 0, IsolationLevel::RepeatableRead);
        let t1 = begin(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        assert!(lm.lock_shared(&t1, rid).unwrap());
        assert!(!lm.unlock(&t0, rid));
        // the bystander's lock is untouched
        assert!(t1.is_shared_locked(rid));
        assert_eq!(t1.state(), TransactionState::Growing);
    }
}
