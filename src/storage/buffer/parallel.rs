use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;

/// A buffer pool sharded into independent instances.
///
/// Each page identifier belongs to exactly one instance
/// (`page_id mod num_instances`), so requests for different stripes never
/// contend on the same mutex. Page creation walks the instances round-robin
/// from a persistent cursor, spreading new pages across stripes.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolInstance>>,
    start_index: Mutex<usize>,
    pool_size: usize,
}

impl ParallelBufferPoolManager {
    pub fn new(num_instances: usize, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "a parallel pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::with_stripe(
                    pool_size,
                    num_instances as u32,
                    i as u32,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
            pool_size,
        }
    }

    /// Create a new page in the first instance with a free or evictable
    /// frame, probing round-robin from the cursor.
    ///
    /// The cursor advances on every probe so successive callers start at
    /// different instances. Fails with `PoolExhausted` only after all
    /// instances have been tried.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut cursor = self.start_index.lock();
        for _ in 0..self.instances.len() {
            let idx = *cursor;
            *cursor = (idx + 1) % self.instances.len();
            match self.instances[idx].new_page() {
                Ok(created) => return Ok(created),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id)?.fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    /// Total frame count across all instances
    pub fn get_pool_size(&self) -> usize {
        self.instances.len() * self.pool_size
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> Result<&Arc<BufferPoolInstance>, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        Ok(&self.instances[page_id as usize % self.instances.len()])
    }
}
