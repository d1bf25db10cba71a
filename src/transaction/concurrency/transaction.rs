use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states.
///
/// Growing → Shrinking → Committed; Growing or Shrinking → Aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Growing = 0,
    Shrinking = 1,
    Committed = 2,
    Aborted = 3,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Growing,
            1 => TransactionState::Shrinking,
            2 => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }
}

/// Why the lock manager refused a request and aborted the transaction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("shared lock requested at READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("lock requested in the shrinking phase")]
    LockOnShrinking,
    #[error("lock upgrade outside the growing phase")]
    UpgradeConflict,
}

/// Raised by lock operations that are illegal for the transaction's phase
/// or isolation level. The transaction is already Aborted when this reaches
/// the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// Kind of tuple modification recorded in a transaction's write set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// One tuple modification, with the images the transaction manager needs to
/// undo it. The storage core stores these and hands them over; it never
/// interprets them.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub rid: Rid,
    pub kind: WriteType,
    pub before_image: Option<Vec<u8>>,
    pub after_image: Option<Vec<u8>>,
}

/// Transaction - represents an active database transaction.
///
/// The state lives in an atomic so another thread can wound this
/// transaction while it waits on a lock queue; the lock sets are mutated
/// only by lock-manager operations running on the transaction's behalf.
pub struct Transaction {
    id: TxnId,
    state: AtomicU8,
    isolation_level: IsolationLevel,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            state: AtomicU8::new(TransactionState::Growing as u8),
            isolation_level,
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to` only if the transaction is still in `from`.
    ///
    /// Keeps a phase transition from overwriting a concurrent wound.
    pub fn try_transition(&self, from: TransactionState, to: TransactionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Abort the transaction unless it already completed; the wound channel.
    ///
    /// Returns true if the transaction is Aborted afterwards.
    pub(crate) fn abort_unless_completed(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            match TransactionState::from_u8(current) {
                TransactionState::Committed => return false,
                TransactionState::Aborted => return true,
                _ => {}
            }
            match self.state.compare_exchange(
                current,
                TransactionState::Aborted as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Snapshot of the tuples held in shared mode
    pub fn shared_locks(&self) -> Vec<Rid> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    /// Snapshot of the tuples held in exclusive mode
    pub fn exclusive_locks(&self) -> Vec<Rid> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    pub(crate) fn insert_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn insert_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Record a tuple modification for the transaction manager
    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Drain the write set, newest record first (undo order)
    pub fn take_write_records(&self) -> Vec<WriteRecord> {
        let mut records = std::mem::take(&mut *self.write_set.lock());
        records.reverse();
        records
    }
}
