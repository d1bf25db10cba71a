use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; negative values are sentinels
pub type PageId = i32;

/// Sentinel for "no page": an empty frame, an unallocated slot
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type, local to one pool instance
pub type FrameId = i32;

/// Transaction ID type; assigned monotonically, smaller means older
pub type TxnId = u64;

/// Record ID locating one tuple: the page it lives on plus its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the data buffer and drop the page identity
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page; the RwLock is the per-frame reader/writer latch
/// that serializes concurrent access to the page *contents*
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure.
///
/// The metadata fields (`page_id`, `pin_count`, `is_dirty`) are mutated only
/// while holding the owning pool instance's mutex; `page_id` here is the
/// authoritative residency record, the copy inside `page` exists for readers
/// holding the content latch.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
