use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, WriteRecord,
};

/// Registry of live transactions, keyed by identifier.
///
/// The lock manager resolves wound targets through this map; the
/// transaction manager registers transactions at begin and removes them at
/// commit or abort.
pub struct TransactionRegistry {
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            txns: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, txn: Arc<Transaction>) {
        self.txns.lock().insert(txn.id(), txn);
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txns.lock().get(&txn_id).cloned()
    }

    pub fn remove(&self, txn_id: TxnId) {
        self.txns.lock().remove(&txn_id);
    }

    pub fn active_ids(&self) -> Vec<TxnId> {
        self.txns.lock().keys().copied().collect()
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction manager - creates transactions and drives them to
/// completion, releasing their locks through the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(registry: Arc<TransactionRegistry>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(0),
            registry,
            lock_manager,
        }
    }

    /// Begin a new transaction; identifiers are monotonic, so a smaller
    /// identifier always means an older transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.registry.register(txn.clone());
        txn
    }

    /// Commit a transaction and release everything it holds
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all(txn);
        self.registry.remove(txn.id());
    }

    /// Abort a transaction, releasing its locks.
    ///
    /// Returns the write records in undo order; rolling the tuples back is
    /// the executor layer's business. Aborting a transaction that was
    /// already wounded is fine; the state store is idempotent.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Vec<WriteRecord> {
        txn.set_state(TransactionState::Aborted);
        let undo = txn.take_write_records();
        self.lock_manager.release_all(txn);
        self.registry.remove(txn.id());
        undo
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }
}
