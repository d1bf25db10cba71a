use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// State behind the instance mutex: frame array, residency mapping, free
/// list, and the allocation counter. A frame index is either on the free
/// list or reachable through the page table, never both.
struct PoolCore {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed array of frames caching disk pages.
///
/// Instances can stand alone or form one stripe of a parallel pool, in
/// which case this instance owns exactly the pages whose identifier is
/// congruent to `instance_index` modulo `num_instances`. All page-table
/// transitions are linearizable under the single instance mutex; disk I/O
/// for eviction write-back happens while that mutex is held, so no thread
/// can re-read a just-evicted page before its bytes land.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    core: Mutex<PoolCore>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolInstance {
    /// Create a standalone buffer pool owning the whole page-id space
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_stripe(pool_size, 1, 0, disk_manager)
    }

    /// Create one stripe of a parallel pool.
    ///
    /// Page identifiers allocated here are `instance_index`,
    /// `instance_index + num_instances`, and so on, keeping ownership
    /// decidable from the identifier alone.
    pub fn with_stripe(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(pool_size > 0, "buffer pool must hold at least one frame");
        assert!(num_instances > 0, "a pool stripe needs a positive instance count");
        assert!(
            instance_index < num_instances,
            "stripe index must be within the instance count"
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            core: Mutex::new(PoolCore {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    /// Allocate a fresh page and pin it.
    ///
    /// Fails with `PoolExhausted` only when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut core = self.core.lock();

        let frame_id = self.acquire_frame(&mut core)?;

        let page_id = core.next_page_id;
        core.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );

        core.page_table.insert(page_id, frame_id);
        let frame = &mut core.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        let page_ptr = frame.page.clone();
        self.replacer.pin(frame_id);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    ///
    /// Fails with `PoolExhausted` only when the page is not resident and
    /// every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut core = self.core.lock();

        if let Some(&frame_id) = core.page_table.get(&page_id) {
            let frame = &mut core.frames[frame_id as usize];
            frame.pin_count += 1;
            let page_ptr = frame.page.clone();
            self.replacer.pin(frame_id);
            return Ok(page_ptr);
        }

        let frame_id = self.acquire_frame(&mut core)?;
        let page_ptr = core.frames[frame_id as usize].page.clone();
        if let Err(e) = self.disk_manager.read_page(page_id, &mut page_ptr.write()) {
            // the frame was emptied by acquire_frame; hand it back
            core.free_list.push_back(frame_id);
            return Err(e.into());
        }

        core.page_table.insert(page_id, frame_id);
        let frame = &mut core.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        self.replacer.pin(frame_id);

        Ok(page_ptr)
    }

    /// Drop one pin on a page, optionally marking it dirty.
    ///
    /// The dirty signal is sticky: once set it survives clean unpins until
    /// write-back. Unpinning a page that is not resident is an accepted
    /// no-op; unpinning below zero fails.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut core = self.core.lock();

        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };
        let frame = &mut core.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and mark it clean.
    ///
    /// Residency and pin count are unchanged.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut core = self.core.lock();

        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };
        let frame = &mut core.frames[frame_id as usize];
        self.disk_manager.write_page(&frame.page.read())?;
        frame.is_dirty = false;

        Ok(())
    }

    /// Write every resident page to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut core = self.core.lock();

        let frame_ids: Vec<FrameId> = core.page_table.values().copied().collect();
        for frame_id in frame_ids {
            let frame = &mut core.frames[frame_id as usize];
            self.disk_manager.write_page(&frame.page.read())?;
            frame.is_dirty = false;
        }

        Ok(())
    }

    /// Drop a page from the pool and release its identifier.
    ///
    /// Deleting a page that is not resident succeeds; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut core = self.core.lock();

        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };
        if core.frames[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        core.page_table.remove(&page_id);
        let frame = &mut core.frames[frame_id as usize];
        frame.page_id = INVALID_PAGE_ID;
        frame.pin_count = 0;
        frame.is_dirty = false;
        frame.page.write().reset();
        self.replacer.pin(frame_id);
        core.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Pick a target frame (free list first, replacer second) and empty
    /// it, writing the previous occupant back if dirty. The write happens
    /// under the instance mutex the caller already holds through `core`.
    fn acquire_frame(&self, core: &mut PoolCore) -> Result<FrameId, BufferPoolError> {
        let frame_id = if let Some(id) = core.free_list.pop_front() {
            id
        } else if let Some(id) = self.replacer.victim() {
            id
        } else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let idx = frame_id as usize;
        let old_page_id = core.frames[idx].page_id;
        if old_page_id != INVALID_PAGE_ID {
            if core.frames[idx].is_dirty {
                debug!("writing back page {} evicted from frame {}", old_page_id, frame_id);
                let page = core.frames[idx].page.clone();
                if let Err(e) = self.disk_manager.write_page(&page.read()) {
                    // eviction failed: the page stays resident and evictable
                    self.replacer.unpin(frame_id);
                    return Err(e.into());
                }
                core.frames[idx].is_dirty = false;
            }
            core.page_table.remove(&old_page_id);
            core.frames[idx].page_id = INVALID_PAGE_ID;
        }

        Ok(frame_id)
    }
}
