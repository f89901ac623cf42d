//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::ClockReplacer;
use parking_lot::Mutex;
use sysinfo::System;
use stratum_common::page::{PageId, PAGE_SIZE};
use stratum_common::{Result, StorageConfig, StratumError};

/// A dirty page that was evicted from the buffer pool.
///
/// The caller must write it to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting gating eviction
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Returns the pin count of a resident page, or None if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = self.page_table.get(page_id)?;
        Some(self.frames[frame_id.0 as usize].pin_count())
    }

    /// Fetches a resident page, pinning it.
    ///
    /// Returns None if the page is not in the pool; the caller loads it
    /// from disk and installs it with `load_page`.
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned frame. Returns the
    /// frame ID and any evicted dirty page that must be written back.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self
            .replacer
            .evict(|fid| self.frames[fid.0 as usize].pin_count() == 0);

        if let Some(victim_id) = victim_id {
            let frame = &self.frames[victim_id.0 as usize];

            // Capture the evicted page contents if dirty
            let evicted = match (frame.is_dirty(), frame.page_id()) {
                (true, Some(page_id)) => Some(EvictedPage {
                    page_id,
                    data: Box::new(frame.copy_out()),
                }),
                _ => None,
            };

            if let Some(old_page_id) = frame.page_id() {
                self.page_table.remove(old_page_id);
            }

            return Ok((victim_id, evicted));
        }

        Err(StratumError::BufferPoolFull)
    }

    /// Installs a new, zeroed page into the pool, pinned.
    ///
    /// If the page is already resident, the existing frame is pinned and
    /// returned. Returns (frame, evicted) where evicted is a dirty page that
    /// was displaced to make room; the caller must write it to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.track(frame_id);
        self.replacer.record_access(frame_id);

        Ok((frame, evicted))
    }

    /// Installs page data read from disk, pinned.
    ///
    /// Returns the frame and any evicted dirty page that must be written back.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Releases one pin on a page, OR-ing in the dirty flag.
    ///
    /// Returns false if the page is not resident.
    #[inline]
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if is_dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
            return true;
        }
        false
    }

    /// Flushes dirty pages matching the predicate through the callback.
    ///
    /// The callback receives the page ID and contents; on success the frame
    /// is marked clean. Returns the number of pages flushed.
    pub fn flush_matching<P, F>(&self, pred: P, mut flush_fn: F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut flushed = 0;

        for (page_id, frame_id) in self.page_table.snapshot() {
            if !pred(page_id) {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Drops resident pages matching the predicate without writing them.
    ///
    /// Pinned pages are skipped. Returns the number of pages dropped.
    /// Used when a file is deleted out from under its cached pages.
    pub fn discard_matching<P>(&self, pred: P) -> usize
    where
        P: Fn(PageId) -> bool,
    {
        let mut dropped = 0;

        for (page_id, frame_id) in self.page_table.snapshot() {
            if !pred(page_id) {
                continue;
            }
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                continue;
            }
            if self.page_table.remove(page_id).is_some() {
                self.replacer.remove(frame_id);
                frame.reset();
                self.free_list.lock().push(frame_id);
                dropped += 1;
            }
        }

        dropped
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        for (_, frame_id) in self.page_table.snapshot() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_config_from_storage_config() {
        let storage = StorageConfig {
            buffer_pool_frames: 42,
            ..Default::default()
        };
        let config = BufferPoolConfig::from(&storage);
        assert_eq!(config.num_frames, 42);

        let pool = BufferPool::new(config);
        assert_eq!(pool.num_frames(), 42);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_new_page_zeroed_after_reuse() {
        let pool = create_test_pool(1);

        // Dirty the only frame, unpin, then recycle it for another page
        let page_a = PageId::new(0, 1);
        let (frame, _) = pool.new_page(page_a).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_a, false);

        let page_b = PageId::new(0, 2);
        let (frame, _) = pool.new_page(page_b).unwrap();
        assert_eq!(frame.read_data()[0], 0);
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = create_test_pool(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        assert!(frame.is_pinned());

        assert!(pool.unpin_page(page_id, false));
        assert!(!frame.is_pinned());

        assert!(!pool.unpin_page(PageId::new(0, 99), false));
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction_clean() {
        let pool = create_test_pool(3);

        for i in 1..=3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.page_count(), 3);

        // Adding one more evicts a clean page: nothing to write back
        let new_page_id = PageId::new(0, 99);
        let (_, evicted) = pool.new_page(new_page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(new_page_id));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let pool = create_test_pool(1);
        let page_a = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_a).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_a, true);

        let (_, evicted) = pool.new_page(PageId::new(0, 2)).unwrap();

        let evicted = evicted.expect("dirty page must be surfaced on eviction");
        assert_eq!(evicted.page_id, page_a);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = create_test_pool(2);

        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(StratumError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_pinned_never_evicted() {
        let pool = create_test_pool(2);
        let pinned = PageId::new(0, 1);

        pool.new_page(pinned).unwrap(); // stays pinned

        let other = PageId::new(0, 2);
        pool.new_page(other).unwrap();
        pool.unpin_page(other, false);

        // Only the unpinned page may be displaced
        pool.new_page(PageId::new(0, 3)).unwrap();
        assert!(pool.contains(pinned));
        assert!(!pool.contains(other));
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(page_id, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[PAGE_SIZE - 1], 0xAB);
    }

    #[test]
    fn test_buffer_pool_flush_matching() {
        let pool = create_test_pool(10);

        // Dirty pages in two files
        for i in 1..=3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }
        let other_file = PageId::new(1, 1);
        pool.new_page(other_file).unwrap();
        pool.unpin_page(other_file, true);

        let mut flushed_pages = vec![];
        let count = pool
            .flush_matching(
                |pid| pid.file_id == 0,
                |pid, _data| {
                    flushed_pages.push(pid);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(count, 3);
        assert!(flushed_pages.iter().all(|pid| pid.file_id == 0));

        // File 0 pages are clean now; file 1 page is still dirty
        assert!(!pool.fetch_page(PageId::new(0, 1)).unwrap().is_dirty());
        assert!(pool.fetch_page(other_file).unwrap().is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_skips_clean() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let count = pool.flush_matching(|_| true, |_, _| Ok(())).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_buffer_pool_discard_matching() {
        let pool = create_test_pool(10);

        for i in 1..=2 {
            let page_id = PageId::new(3, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }

        let dropped = pool.discard_matching(|pid| pid.file_id == 3);
        assert_eq!(dropped, 2);
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_discard_skips_pinned() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap(); // pinned

        assert_eq!(pool.discard_matching(|_| true), 0);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);

        for i in 1..=5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            if i % 2 == 1 {
                pool.unpin_page(page_id, true); // pages 1, 3, 5 unpinned dirty
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
    }

    #[test]
    fn test_buffer_pool_pin_count_accessor() {
        let pool = create_test_pool(4);
        let page_id = PageId::new(0, 1);

        assert_eq!(pool.pin_count(page_id), None);

        pool.new_page(page_id).unwrap();
        assert_eq!(pool.pin_count(page_id), Some(1));

        pool.fetch_page(page_id).unwrap();
        assert_eq!(pool.pin_count(page_id), Some(2));

        pool.unpin_page(page_id, false);
        pool.unpin_page(page_id, false);
        assert_eq!(pool.pin_count(page_id), Some(0));
    }
}
