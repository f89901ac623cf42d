//! Buffer manager: the pinned-page facade over the pool and the disk.
//!
//! All page I/O in the engine goes through this layer. `alloc_page` and
//! `read_page` leave the page pinned; every such call must be paired with
//! exactly one `unpin_page` by the caller. Dirty pages displaced by the
//! pool are written back here before the displacing operation returns.

use crate::disk::{DiskManager, DiskManagerConfig};
use std::sync::Arc;
use stratum_buffer::{BufferPool, BufferPoolConfig};
use stratum_common::page::{PageId, PAGE_SIZE};
use stratum_common::{Result, StorageConfig, StratumError};

/// Buffered page manager shared by the heap and the index.
pub struct BufferManager {
    /// Disk manager for file I/O.
    disk: Arc<DiskManager>,
    /// In-memory page cache.
    pool: Arc<BufferPool>,
}

impl BufferManager {
    /// Creates a new buffer manager over a disk manager and a pool.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Builds the disk manager and the pool from a single storage
    /// configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let disk = Arc::new(DiskManager::new(DiskManagerConfig::from(config))?);
        let pool = Arc::new(BufferPool::new(BufferPoolConfig::from(config)));
        Ok(Self::new(disk, pool))
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    // =========================================================================
    // File operations
    // =========================================================================

    /// Returns true if a file with the given name exists.
    pub fn file_exists(&self, name: &str) -> bool {
        self.disk.exists(name)
    }

    /// Creates a new file and returns its handle.
    pub fn create_file(&self, name: &str) -> Result<u32> {
        self.disk.create(name)
    }

    /// Opens an existing file and returns its handle.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        self.disk.open(name)
    }

    /// Flushes a file's dirty pages, drops its cached pages, and closes it.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        self.flush_file(file_id)?;
        self.pool.discard_matching(|pid| pid.file_id == file_id);
        self.disk.close(file_id)
    }

    /// Deletes a file, dropping any of its cached pages first.
    ///
    /// Fails with `FileNotFound` if the file does not exist.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        if let Some(file_id) = self.disk.id_of(name) {
            self.pool.discard_matching(|pid| pid.file_id == file_id);
        }
        self.disk.delete(name)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.disk.num_pages(file_id)
    }

    // =========================================================================
    // Page operations
    // =========================================================================

    /// Allocates a new zeroed page at the end of the file.
    ///
    /// The page is installed in the pool and left pinned; the caller must
    /// unpin it exactly once.
    pub fn alloc_page(&self, file_id: u32) -> Result<u32> {
        let page_no = self.disk.allocate_page(file_id)?;
        let (_, evicted) = self.pool.new_page(PageId::new(file_id, page_no))?;
        if let Some(evicted) = evicted {
            self.disk.write_page(evicted.page_id, &evicted.data)?;
        }
        Ok(page_no)
    }

    /// Reads a page, pinning it, and returns a copy of its contents.
    ///
    /// Loads the page from disk on a cache miss. The pin is held until the
    /// caller's matching `unpin_page`.
    pub fn read_page(&self, file_id: u32, page_no: u32) -> Result<[u8; PAGE_SIZE]> {
        let page_id = PageId::new(file_id, page_no);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame.copy_out());
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        if let Some(evicted) = evicted {
            self.disk.write_page(evicted.page_id, &evicted.data)?;
        }
        Ok(frame.copy_out())
    }

    /// Overwrites a resident page's contents and marks its frame dirty.
    ///
    /// The caller must already hold a pin on the page (from `read_page` or
    /// `alloc_page`); writing an unpinned, non-resident page is an error.
    pub fn write_page(&self, file_id: u32, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let page_id = PageId::new(file_id, page_no);

        match self.pool.fetch_page(page_id) {
            Some(frame) => {
                frame.copy_from(data);
                self.pool.unpin_page(page_id, true);
                Ok(())
            }
            None => Err(StratumError::PageNotFound { file_id, page_no }),
        }
    }

    /// Releases one pin on a page, OR-ing in the dirty flag.
    pub fn unpin_page(&self, file_id: u32, page_no: u32, dirty: bool) -> Result<()> {
        let page_id = PageId::new(file_id, page_no);
        if self.pool.unpin_page(page_id, dirty) {
            Ok(())
        } else {
            Err(StratumError::PageNotFound { file_id, page_no })
        }
    }

    /// Writes a file's dirty pages to disk and syncs the file.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        self.pool.flush_matching(
            |pid| pid.file_id == file_id,
            |pid, data| {
                let mut page = [0u8; PAGE_SIZE];
                page.copy_from_slice(data);
                self.disk.write_page(pid, &page)
            },
        )?;
        self.disk.flush(file_id)
    }
}
