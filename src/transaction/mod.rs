pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionAbort,
    TransactionManager, TransactionRegistry, TransactionState, WriteRecord, WriteType,
};
