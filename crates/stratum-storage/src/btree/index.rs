//! B+ tree index lifecycle, navigation, and the split-on-insert engine.

use super::constants::{
    INITIAL_ROOT_PAGE_NO, LEAF_CAPACITY, LEAF_SPLIT_POINT, META_PAGE_NO, NODE_CAPACITY,
    NODE_SPLIT_POINT,
};
use super::page::{InternalPage, LeafPage, MetaPage};
use super::scan::ScanState;
use crate::bufmgr::BufferManager;
use crate::heap::FileScan;
use crate::record::RecordId;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use stratum_common::page::INVALID_PAGE_NO;
use stratum_common::types::KeyType;
use stratum_common::{Result, StratumError};

/// A completed split waiting for its separator to be pushed into the
/// parent: `left` kept the low half, `right` is the new sibling.
pub(crate) struct Split {
    pub left: u32,
    pub right: u32,
    pub key: i32,
}

/// Disk-resident B+ tree index over an integer attribute of a relation.
///
/// The index lives in its own page file named `<relation>.<key_offset>`,
/// accessed exclusively through the buffer manager. Operations are
/// single-threaded; a range scan is a stateful cursor on the index value.
pub struct BTreeIndex {
    /// Shared buffer manager.
    bufmgr: Arc<BufferManager>,
    /// Open handle of the index file.
    file_id: u32,
    /// Index file name, `<relation>.<key_offset>`.
    index_name: String,
    /// Relation the index was built over.
    relation_name: String,
    /// Byte offset of the key within base records.
    key_offset: i32,
    /// Declared key type.
    key_type: KeyType,
    /// Active range scan, if any.
    pub(crate) scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` keyed at `key_offset`, creating
    /// and bulk-loading it from the relation if it does not exist yet.
    ///
    /// On open of an existing index file the stored metadata must match
    /// the arguments; a mismatch closes the file and fails with
    /// `BadIndexInfo`.
    pub fn open(
        relation_name: &str,
        bufmgr: Arc<BufferManager>,
        key_offset: i32,
        key_type: KeyType,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation_name, key_offset);

        if bufmgr.file_exists(&index_name) {
            let file_id = bufmgr.open_file(&index_name)?;
            let buf = bufmgr.read_page(file_id, META_PAGE_NO)?;
            bufmgr.unpin_page(file_id, META_PAGE_NO, false)?;
            let meta = MetaPage::from_bytes(buf);

            if meta.key_offset() != key_offset
                || meta.key_type_tag() != key_type.tag()
                || meta.relation_name() != relation_name
            {
                let reason = format!(
                    "{} was built over {} at offset {} with type tag {}",
                    index_name,
                    meta.relation_name(),
                    meta.key_offset(),
                    meta.key_type_tag()
                );
                if let Err(e) = bufmgr.close_file(file_id) {
                    warn!(index = %index_name, error = %e, "failed to close mismatched index file");
                }
                return Err(StratumError::BadIndexInfo(reason));
            }

            debug!(index = %index_name, root = meta.root_page_no(), "opened existing index");
            return Ok(Self {
                bufmgr,
                file_id,
                index_name,
                relation_name: relation_name.to_string(),
                key_offset,
                key_type,
                scan: None,
            });
        }

        // Create the index file: metadata at page 1, the root leaf at page 2
        let file_id = bufmgr.create_file(&index_name)?;
        let meta_page_no = bufmgr.alloc_page(file_id)?;
        let root_page_no = bufmgr.alloc_page(file_id)?;
        debug_assert_eq!(meta_page_no, META_PAGE_NO);
        debug_assert_eq!(root_page_no, INITIAL_ROOT_PAGE_NO);

        let meta = MetaPage::new(relation_name, key_offset, key_type, root_page_no)?;
        bufmgr.write_page(file_id, meta_page_no, meta.as_bytes())?;
        bufmgr.unpin_page(file_id, meta_page_no, true)?;

        let root = LeafPage::new();
        bufmgr.write_page(file_id, root_page_no, root.as_bytes())?;
        bufmgr.unpin_page(file_id, root_page_no, true)?;

        let mut index = Self {
            bufmgr: Arc::clone(&bufmgr),
            file_id,
            index_name,
            relation_name: relation_name.to_string(),
            key_offset,
            key_type,
            scan: None,
        };

        // Bulk build: stream the relation and insert every record's key
        let mut scan = FileScan::new(relation_name, bufmgr)?;
        let mut loaded = 0u64;
        loop {
            match scan.next_record() {
                Ok((record, rid)) => {
                    let key = index.extract_key(&record)?;
                    index.insert(key, rid)?;
                    loaded += 1;
                }
                Err(StratumError::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }

        debug!(index = %index.index_name, records = loaded, "built index from relation scan");
        Ok(index)
    }

    /// Returns the index file name, `<relation>.<key_offset>`.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the relation this index was built over.
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Returns the key byte offset within base records.
    pub fn key_offset(&self) -> i32 {
        self.key_offset
    }

    /// Returns the declared key type.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Returns the open handle of the index file.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the current root page number from the metadata page.
    pub fn root_page_no(&self) -> Result<u32> {
        let buf = self.bufmgr.read_page(self.file_id, META_PAGE_NO)?;
        self.bufmgr.unpin_page(self.file_id, META_PAGE_NO, false)?;
        Ok(MetaPage::from_bytes(buf).root_page_no())
    }

    pub(crate) fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.bufmgr
    }

    /// Extracts the integer key at the configured byte offset.
    fn extract_key(&self, record: &[u8]) -> Result<i32> {
        let off = self.key_offset as usize;
        let end = off + 4;
        if record.len() < end {
            return Err(StratumError::BadIndexInfo(format!(
                "record of {} bytes is too short for a key at offset {}",
                record.len(),
                off
            )));
        }
        Ok(i32::from_le_bytes([
            record[off],
            record[off + 1],
            record[off + 2],
            record[off + 3],
        ]))
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Descends to the leaf owning `key`.
    ///
    /// Returns the leaf page number, the position at which `key` would be
    /// inserted, and the leaf's current key count. Every node touched is
    /// read and unpinned immediately; only its copied contents are used.
    pub(crate) fn find_leaf(&self, key: i32) -> Result<(u32, usize, usize)> {
        let root = self.root_page_no()?;

        // While the root is the initial leaf the tree has exactly one node
        if root == INITIAL_ROOT_PAGE_NO {
            let buf = self.bufmgr.read_page(self.file_id, root)?;
            self.bufmgr.unpin_page(self.file_id, root, false)?;
            let leaf = LeafPage::from_bytes(buf);
            return Ok((root, leaf.lower_bound(key), leaf.key_count()));
        }

        let mut cur = root;
        loop {
            let buf = self.bufmgr.read_page(self.file_id, cur)?;
            self.bufmgr.unpin_page(self.file_id, cur, false)?;
            let node = InternalPage::from_bytes(buf);
            let child = node.child(node.lower_bound(key));

            if node.level() == 1 {
                let buf = self.bufmgr.read_page(self.file_id, child)?;
                self.bufmgr.unpin_page(self.file_id, child, false)?;
                let leaf = LeafPage::from_bytes(buf);
                return Ok((child, leaf.lower_bound(key), leaf.key_count()));
            }
            cur = child;
        }
    }

    /// Locates the parent of `child` by re-descending with the separator
    /// key just pushed up from its split.
    ///
    /// The descent uses the strict `>` bound: the freshly split left child
    /// sits at the slot whose key equals the promoted separator, and the
    /// lax bound would step past it. Returns the invalid page number if
    /// `child` is the root.
    pub(crate) fn find_parent(&self, child: u32, key: i32) -> Result<(u32, usize, usize)> {
        let root = self.root_page_no()?;
        if child == root {
            return Ok((INVALID_PAGE_NO, 0, 0));
        }

        let mut cur = root;
        loop {
            let buf = self.bufmgr.read_page(self.file_id, cur)?;
            self.bufmgr.unpin_page(self.file_id, cur, false)?;
            let node = InternalPage::from_bytes(buf);
            let pos = node.upper_bound(key);
            let next = node.child(pos);

            if next == child {
                return Ok((cur, pos, node.key_count()));
            }
            cur = next;
        }
    }

    // =========================================================================
    // Insert engine
    // =========================================================================

    /// Inserts a (key, locator) pair into the index.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let (leaf_no, pos, count) = self.find_leaf(key)?;
        let mut pending = self.modify_leaf(leaf_no, key, rid, pos, count)?;

        // Push separators up until one lands in a node with room
        while let Some(split) = pending {
            let (parent, pos, count) = self.find_parent(split.left, split.key)?;
            if parent == INVALID_PAGE_NO {
                self.grow_root(&split, split.left == leaf_no)?;
                return Ok(());
            }
            pending = self.modify_internal(parent, &split, pos, count)?;
        }
        Ok(())
    }

    /// Inserts into a leaf, splitting it when full.
    ///
    /// On a split the left leaf keeps entries `0..=LEAF_SPLIT_POINT`, the
    /// new right leaf takes the rest and inherits the old sibling pointer,
    /// and the key at the split point is copied up as the separator.
    fn modify_leaf(
        &mut self,
        page_no: u32,
        key: i32,
        rid: RecordId,
        pos: usize,
        count: usize,
    ) -> Result<Option<Split>> {
        if count < LEAF_CAPACITY {
            let buf = self.bufmgr.read_page(self.file_id, page_no)?;
            let mut leaf = LeafPage::from_bytes(buf);
            leaf.insert_at(pos, key, rid);
            self.bufmgr.write_page(self.file_id, page_no, leaf.as_bytes())?;
            self.bufmgr.unpin_page(self.file_id, page_no, true)?;
            return Ok(None);
        }

        let buf = self.bufmgr.read_page(self.file_id, page_no)?;
        let right_no = self.bufmgr.alloc_page(self.file_id)?;
        let mut left = LeafPage::from_bytes(buf);

        let mut entries = left.entries();
        entries.insert(pos, (key, rid));
        let push_up = entries[LEAF_SPLIT_POINT].0;

        let mut right = LeafPage::new();
        right.set_entries(&entries[LEAF_SPLIT_POINT + 1..]);
        right.set_right_sibling(left.right_sibling());
        left.set_entries(&entries[..=LEAF_SPLIT_POINT]);
        left.set_right_sibling(right_no);

        self.bufmgr.write_page(self.file_id, page_no, left.as_bytes())?;
        self.bufmgr.write_page(self.file_id, right_no, right.as_bytes())?;
        self.bufmgr.unpin_page(self.file_id, page_no, true)?;
        self.bufmgr.unpin_page(self.file_id, right_no, true)?;

        trace!(left = page_no, right = right_no, separator = push_up, "leaf split");
        Ok(Some(Split {
            left: page_no,
            right: right_no,
            key: push_up,
        }))
    }

    /// Inserts a pushed-up separator into an internal node, splitting it
    /// when full.
    ///
    /// On a split the left node keeps `NODE_SPLIT_POINT` keys with their
    /// children, the right node inherits the split node's level and takes
    /// the keys past the split point, and the key at the split point
    /// moves up: unlike a leaf split it is promoted, not copied.
    fn modify_internal(
        &mut self,
        page_no: u32,
        split: &Split,
        pos: usize,
        count: usize,
    ) -> Result<Option<Split>> {
        if count < NODE_CAPACITY {
            let buf = self.bufmgr.read_page(self.file_id, page_no)?;
            let mut node = InternalPage::from_bytes(buf);
            node.insert_at(pos, split.key, split.left, split.right);
            self.bufmgr.write_page(self.file_id, page_no, node.as_bytes())?;
            self.bufmgr.unpin_page(self.file_id, page_no, true)?;
            return Ok(None);
        }

        let buf = self.bufmgr.read_page(self.file_id, page_no)?;
        let right_no = self.bufmgr.alloc_page(self.file_id)?;
        let node = InternalPage::from_bytes(buf);

        let (mut keys, mut children) = node.keys_and_children();
        keys.insert(pos, split.key);
        children[pos] = split.left;
        children.insert(pos + 1, split.right);
        let push_up = keys[NODE_SPLIT_POINT];
        let level = node.level();

        let mut left = InternalPage::new(level);
        left.set_entries(&keys[..NODE_SPLIT_POINT], &children[..=NODE_SPLIT_POINT]);
        let mut right = InternalPage::new(level);
        right.set_entries(&keys[NODE_SPLIT_POINT + 1..], &children[NODE_SPLIT_POINT + 1..]);

        self.bufmgr.write_page(self.file_id, page_no, left.as_bytes())?;
        self.bufmgr.write_page(self.file_id, right_no, right.as_bytes())?;
        self.bufmgr.unpin_page(self.file_id, page_no, true)?;
        self.bufmgr.unpin_page(self.file_id, right_no, true)?;

        trace!(left = page_no, right = right_no, separator = push_up, "internal split");
        Ok(Some(Split {
            left: page_no,
            right: right_no,
            key: push_up,
        }))
    }

    /// Replaces the root after a root split.
    ///
    /// Allocates a fresh internal page holding one separator and the two
    /// halves, and records it on the metadata page. The new root's level
    /// is 1 exactly when the split node was the leaf of this insert.
    fn grow_root(&mut self, split: &Split, left_is_leaf: bool) -> Result<()> {
        let new_root_no = self.bufmgr.alloc_page(self.file_id)?;
        let meta_buf = self.bufmgr.read_page(self.file_id, META_PAGE_NO)?;

        let mut root = InternalPage::new(if left_is_leaf { 1 } else { 0 });
        root.set_entries(&[split.key], &[split.left, split.right]);

        let mut meta = MetaPage::from_bytes(meta_buf);
        meta.set_root_page_no(new_root_no);

        self.bufmgr.write_page(self.file_id, new_root_no, root.as_bytes())?;
        self.bufmgr.write_page(self.file_id, META_PAGE_NO, meta.as_bytes())?;
        self.bufmgr.unpin_page(self.file_id, META_PAGE_NO, true)?;
        self.bufmgr.unpin_page(self.file_id, new_root_no, true)?;

        debug!(root = new_root_no, leaf_parent = left_is_leaf, "root split, tree grew");
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // Release any scan pins so the pin accounting stays exact
        if self.scan.is_some() {
            if let Err(e) = self.end_scan() {
                warn!(index = %self.index_name, error = %e, "failed to release scan pins");
            }
        }
        if let Err(e) = self.bufmgr.close_file(self.file_id) {
            error!(index = %self.index_name, error = %e, "failed to flush index file on close");
        }
    }
}
