// Export public modules
pub mod common;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolInstance;
pub use storage::buffer::ParallelBufferPoolManager;
pub use storage::disk::DiskManager;
pub use transaction::{
    IsolationLevel, LockManager, Transaction, TransactionManager, TransactionRegistry,
    TransactionState,
};
