//! Range scans over the leaf chain.

use super::constants::INITIAL_ROOT_PAGE_NO;
use super::index::BTreeIndex;
use super::page::{InternalPage, LeafPage};
use std::sync::Arc;
use stratum_common::page::INVALID_PAGE_NO;
use stratum_common::types::RangeOp;
use stratum_common::{Result, StratumError};

use crate::record::RecordId;

/// Cursor state of an active range scan.
///
/// The scan pins every leaf it crosses and releases the whole set in
/// `end_scan`, so a leaf never has to be re-read mid-advance.
pub(crate) struct ScanState {
    /// Inclusive upper bound of the normalised range.
    hi: i32,
    /// Leaf the cursor is on; the invalid page number once exhausted.
    cur_page: u32,
    /// Position of the next entry to return within the current leaf.
    next_entry: usize,
    /// Copy of the current (pinned) leaf.
    leaf: LeafPage,
    /// Every leaf pinned since the scan started.
    pinned: Vec<u32>,
}

impl BTreeIndex {
    /// Starts a range scan over `[low, high]` as bounded by the operators.
    ///
    /// `low_op` must be `>` or `>=` and `high_op` must be `<` or `<=`,
    /// otherwise the scan fails with `BadOpcodes`; `low > high` fails with
    /// `BadScanrange`; a range no key satisfies fails with `NoSuchKey`. An
    /// already-active scan is ended (releasing its pins) before the new
    /// parameters are validated.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: RangeOp,
        high: i32,
        high_op: RangeOp,
    ) -> Result<()> {
        if self.scan.is_some() {
            self.end_scan()?;
        }

        if !low_op.is_lower() || !high_op.is_upper() {
            return Err(StratumError::BadOpcodes);
        }
        if low > high {
            return Err(StratumError::BadScanrange);
        }

        // Normalise to a closed interval [lo, hi]
        let lo = match low_op {
            RangeOp::Gt => match low.checked_add(1) {
                Some(lo) => lo,
                None => return Err(StratumError::NoSuchKey),
            },
            _ => low,
        };
        let hi = match high_op {
            RangeOp::Lt => match high.checked_sub(1) {
                Some(hi) => hi,
                None => return Err(StratumError::NoSuchKey),
            },
            _ => high,
        };

        let Some((page_no, entry)) = self.find_first_entry(lo, hi)? else {
            return Err(StratumError::NoSuchKey);
        };

        // Pin the starting leaf for the lifetime of the scan
        let bufmgr = Arc::clone(self.buffer_manager());
        let buf = bufmgr.read_page(self.file_id(), page_no)?;
        self.scan = Some(ScanState {
            hi,
            cur_page: page_no,
            next_entry: entry,
            leaf: LeafPage::from_bytes(buf),
            pinned: vec![page_no],
        });
        Ok(())
    }

    /// Returns the locator of the next matching entry and advances the
    /// cursor.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active and with
    /// `ScanCompleted` once the cursor has passed the last matching entry.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let bufmgr = Arc::clone(self.buffer_manager());
        let file_id = self.file_id();

        let Some(state) = self.scan.as_mut() else {
            return Err(StratumError::ScanNotInitialized);
        };

        if state.cur_page == INVALID_PAGE_NO {
            return Err(StratumError::ScanCompleted);
        }
        if state.leaf.key(state.next_entry) > state.hi {
            return Err(StratumError::ScanCompleted);
        }

        let rid = state.leaf.rid(state.next_entry);

        // Advance: within the leaf, else onto the sibling chain
        if state.next_entry + 1 < state.leaf.key_count() {
            state.next_entry += 1;
        } else {
            let sibling = state.leaf.right_sibling();
            if sibling != INVALID_PAGE_NO {
                let buf = bufmgr.read_page(file_id, sibling)?;
                state.cur_page = sibling;
                state.next_entry = 0;
                state.leaf = LeafPage::from_bytes(buf);
                state.pinned.push(sibling);
            } else {
                state.cur_page = INVALID_PAGE_NO;
            }
        }

        Ok(rid)
    }

    /// Ends the active scan, unpinning every leaf it pinned.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active; a completed
    /// scan still requires exactly one `end_scan`.
    pub fn end_scan(&mut self) -> Result<()> {
        let Some(state) = self.scan.take() else {
            return Err(StratumError::ScanNotInitialized);
        };

        for page_no in state.pinned {
            self.buffer_manager()
                .unpin_page(self.file_id(), page_no, false)?;
        }
        Ok(())
    }

    /// Locates the first leaf entry with `key >= lo`, rejecting it if it
    /// exceeds `hi`.
    ///
    /// Returns None when no entry satisfies the range. The descent reads
    /// and unpins every node it touches; the caller pins the result.
    fn find_first_entry(&self, lo: i32, hi: i32) -> Result<Option<(u32, usize)>> {
        if lo > hi {
            return Ok(None);
        }

        let bufmgr = self.buffer_manager();
        let file_id = self.file_id();
        let root = self.root_page_no()?;

        if root == INITIAL_ROOT_PAGE_NO {
            let buf = bufmgr.read_page(file_id, root)?;
            bufmgr.unpin_page(file_id, root, false)?;
            let leaf = LeafPage::from_bytes(buf);
            let entry = leaf.lower_bound(lo);
            if entry == leaf.key_count() || leaf.key(entry) > hi {
                return Ok(None);
            }
            return Ok(Some((root, entry)));
        }

        let mut cur = root;
        loop {
            let buf = bufmgr.read_page(file_id, cur)?;
            bufmgr.unpin_page(file_id, cur, false)?;
            let node = InternalPage::from_bytes(buf);
            let child = node.child(node.lower_bound(lo));

            if node.level() == 1 {
                let buf = bufmgr.read_page(file_id, child)?;
                bufmgr.unpin_page(file_id, child, false)?;
                let leaf = LeafPage::from_bytes(buf);
                let entry = leaf.lower_bound(lo);
                if entry == leaf.key_count() || leaf.key(entry) > hi {
                    return Ok(None);
                }
                return Ok(Some((child, entry)));
            }
            cur = child;
        }
    }
}
