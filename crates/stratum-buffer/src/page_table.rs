//! Page table mapping resident page IDs to frame IDs.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashMap;
use stratum_common::page::PageId;

/// Maps the pages currently resident in the pool to their frames.
///
/// The engine is single-writer, so a mutex-guarded map keyed by the packed
/// page ID is sufficient.
pub struct PageTable {
    entries: Mutex<HashMap<u64, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up a page ID and returns its frame ID if resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().get(&page_id.as_u64()).copied()
    }

    /// Inserts a page ID to frame ID mapping.
    #[inline]
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.lock().insert(page_id.as_u64(), frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    #[inline]
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.lock().remove(&page_id.as_u64())
    }

    /// Returns true if the page is resident.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.lock().contains_key(&page_id.as_u64())
    }

    /// Returns the number of resident pages.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no pages are resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Collects the resident entries into a snapshot vector.
    ///
    /// Callers iterate the snapshot rather than the live map so flushes and
    /// deletions never touch the table lock while doing I/O.
    pub fn snapshot(&self) -> Vec<(PageId, FrameId)> {
        self.entries
            .lock()
            .iter()
            .map(|(packed, frame_id)| (PageId::from_u64(*packed), *frame_id))
            .collect()
    }
}
