use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use taigadb::storage::buffer::{BufferPoolInstance, ParallelBufferPoolManager};
use taigadb::storage::disk::DiskManager;
use taigadb::transaction::{LockManager, TransactionManager, TransactionRegistry};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a standalone buffer pool instance backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}

// Create a parallel buffer pool backed by a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let pool = Arc::new(ParallelBufferPoolManager::new(
        num_instances,
        pool_size,
        disk_manager,
    ));
    Ok((pool, file))
}

// Wire up a lock manager with its registry and transaction manager
#[allow(dead_code)]
pub fn create_test_txn_harness() -> (Arc<TransactionRegistry>, Arc<LockManager>, TransactionManager) {
    let registry = Arc::new(TransactionRegistry::new());
    let lock_manager = Arc::new(LockManager::new(registry.clone()));
    let txn_manager = TransactionManager::new(registry.clone(), lock_manager.clone());
    (registry, lock_manager, txn_manager)
}
