//! Sequential scan over a relation's records.

use crate::bufmgr::BufferManager;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use bytes::Bytes;
use std::sync::Arc;
use stratum_common::{Result, StratumError};

/// Streams every record of a relation with its locator, in page and slot
/// order. Signals exhaustion with `EndOfFile`.
///
/// Each visited page is read through the buffer manager, copied, and
/// unpinned immediately, so a scan never accumulates pins.
pub struct FileScan {
    /// Shared buffer manager.
    bufmgr: Arc<BufferManager>,
    /// Open file handle of the relation.
    file_id: u32,
    /// Total pages at scan start.
    num_pages: u32,
    /// Page the cursor is on (1-based).
    cur_page: u32,
    /// Next slot to inspect on the current page.
    cur_slot: u16,
    /// Copy of the current page, None before the first read of a page.
    page: Option<HeapPage>,
}

impl FileScan {
    /// Opens a scan over the named relation.
    ///
    /// Fails with `FileNotFound` if the relation does not exist.
    pub fn new(relation_name: &str, bufmgr: Arc<BufferManager>) -> Result<Self> {
        let file_id = bufmgr.open_file(relation_name)?;
        let num_pages = bufmgr.num_pages(file_id)?;
        Ok(Self {
            bufmgr,
            file_id,
            num_pages,
            cur_page: 1,
            cur_slot: 0,
            page: None,
        })
    }

    /// Returns the next record and its locator.
    ///
    /// Fails with `EndOfFile` when the relation is exhausted.
    pub fn next_record(&mut self) -> Result<(Bytes, RecordId)> {
        loop {
            if self.page.is_none() {
                if self.cur_page > self.num_pages {
                    return Err(StratumError::EndOfFile);
                }
                let buf = self.bufmgr.read_page(self.file_id, self.cur_page)?;
                self.bufmgr.unpin_page(self.file_id, self.cur_page, false)?;
                self.page = Some(HeapPage::from_bytes(buf));
                self.cur_slot = 0;
            }

            let mut found = None;
            if let Some(page) = self.page.as_ref() {
                while self.cur_slot < page.slot_count() {
                    let slot = self.cur_slot;
                    self.cur_slot += 1;
                    if let Some(record) = page.record(slot) {
                        found = Some((
                            Bytes::copy_from_slice(record),
                            RecordId::new(self.cur_page, slot),
                        ));
                        break;
                    }
                }
            }

            if let Some(hit) = found {
                return Ok(hit);
            }

            // Page exhausted, move on
            self.page = None;
            self.cur_page += 1;
        }
    }
}
