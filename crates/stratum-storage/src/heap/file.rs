//! Heap file manager for base relations.

use crate::bufmgr::BufferManager;
use crate::heap::page::HeapPage;
use crate::heap::scan::FileScan;
use crate::record::RecordId;
use std::sync::Arc;
use stratum_common::{Result, StratumError};

/// A named relation file of slotted heap pages.
///
/// Append-only: records go on the last page until it fills, then a new
/// page is allocated. Record deletion is not part of this engine, so no
/// free-space bookkeeping is needed.
pub struct HeapFile {
    /// Shared buffer manager.
    bufmgr: Arc<BufferManager>,
    /// Open file handle.
    file_id: u32,
    /// Relation name.
    name: String,
}

impl HeapFile {
    /// Creates a new relation file.
    pub fn create(name: &str, bufmgr: Arc<BufferManager>) -> Result<Self> {
        let file_id = bufmgr.create_file(name)?;
        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
        })
    }

    /// Opens an existing relation file.
    pub fn open(name: &str, bufmgr: Arc<BufferManager>) -> Result<Self> {
        let file_id = bufmgr.open_file(name)?;
        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the open file handle.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of pages in the relation.
    pub fn num_pages(&self) -> Result<u32> {
        self.bufmgr.num_pages(self.file_id)
    }

    /// Appends a record, returning its locator.
    pub fn append(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > HeapPage::MAX_RECORD_SIZE {
            return Err(StratumError::RecordTooLarge {
                size: record.len(),
                max: HeapPage::MAX_RECORD_SIZE,
            });
        }

        // Try the last page first
        let num_pages = self.bufmgr.num_pages(self.file_id)?;
        if num_pages > 0 {
            let page_no = num_pages;
            let buf = self.bufmgr.read_page(self.file_id, page_no)?;
            let mut page = HeapPage::from_bytes(buf);
            match page.insert(record) {
                Ok(slot) => {
                    self.bufmgr.write_page(self.file_id, page_no, page.as_bytes())?;
                    self.bufmgr.unpin_page(self.file_id, page_no, true)?;
                    return Ok(RecordId::new(page_no, slot));
                }
                Err(StratumError::PageFull) => {
                    self.bufmgr.unpin_page(self.file_id, page_no, false)?;
                }
                Err(e) => {
                    self.bufmgr.unpin_page(self.file_id, page_no, false)?;
                    return Err(e);
                }
            }
        }

        // Last page was full or the file is empty: extend it
        let page_no = self.bufmgr.alloc_page(self.file_id)?;
        let mut page = HeapPage::new();
        let slot = page.insert(record)?;
        self.bufmgr.write_page(self.file_id, page_no, page.as_bytes())?;
        self.bufmgr.unpin_page(self.file_id, page_no, true)?;
        Ok(RecordId::new(page_no, slot))
    }

    /// Opens a scan over every record in the relation.
    pub fn scan(&self) -> Result<FileScan> {
        FileScan::new(&self.name, Arc::clone(&self.bufmgr))
    }

    /// Flushes the relation's dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.bufmgr.flush_file(self.file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use stratum_buffer::{BufferPool, BufferPoolConfig};
    use tempfile::tempdir;

    fn create_test_heap() -> (HeapFile, Arc<BufferManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 64 }));
        let bufmgr = Arc::new(BufferManager::new(disk, pool));
        let heap = HeapFile::create("employees", Arc::clone(&bufmgr)).unwrap();
        (heap, bufmgr, dir)
    }

    #[test]
    fn test_heap_file_create() {
        let (heap, bufmgr, _dir) = create_test_heap();
        assert_eq!(heap.name(), "employees");
        assert!(bufmgr.file_exists("employees"));
        assert_eq!(heap.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_heap_file_append() {
        let (heap, _bufmgr, _dir) = create_test_heap();

        let rid = heap.append(b"record one").unwrap();
        assert_eq!(rid, RecordId::new(1, 0));

        let rid = heap.append(b"record two").unwrap();
        assert_eq!(rid, RecordId::new(1, 1));

        assert_eq!(heap.num_pages().unwrap(), 1);
    }

    #[test]
    fn test_heap_file_append_spills_to_new_page() {
        let (heap, _bufmgr, _dir) = create_test_heap();
        let record = [9u8; 2000];

        // (8192 - 8) / (2000 + 4) = 4 records per page
        for _ in 0..4 {
            let rid = heap.append(&record).unwrap();
            assert_eq!(rid.page_no, 1);
        }
        let rid = heap.append(&record).unwrap();
        assert_eq!(rid.page_no, 2);
        assert_eq!(rid.slot, 0);
        assert_eq!(heap.num_pages().unwrap(), 2);
    }

    #[test]
    fn test_heap_file_append_too_large() {
        let (heap, _bufmgr, _dir) = create_test_heap();
        let record = vec![0u8; HeapPage::MAX_RECORD_SIZE + 1];
        assert!(matches!(
            heap.append(&record),
            Err(StratumError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_heap_file_append_leaves_no_pins() {
        let (heap, bufmgr, _dir) = create_test_heap();

        for i in 0..100u32 {
            heap.append(&i.to_le_bytes()).unwrap();
        }

        assert_eq!(bufmgr.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_heap_file_open_existing() {
        let (heap, bufmgr, _dir) = create_test_heap();
        heap.append(b"persisted").unwrap();
        heap.flush().unwrap();

        let reopened = HeapFile::open("employees", Arc::clone(&bufmgr)).unwrap();
        assert_eq!(reopened.num_pages().unwrap(), 1);

        let mut scan = reopened.scan().unwrap();
        let (record, rid) = scan.next_record().unwrap();
        assert_eq!(&record[..], b"persisted");
        assert_eq!(rid, RecordId::new(1, 0));
    }

    #[test]
    fn test_heap_file_open_missing() {
        let (_heap, bufmgr, _dir) = create_test_heap();
        assert!(matches!(
            HeapFile::open("ghost", bufmgr),
            Err(StratumError::FileNotFound(_))
        ));
    }
}
