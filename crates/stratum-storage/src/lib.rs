//! Storage engine for StratumDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O over named files
//! - Buffer manager tying the page cache to the disk manager
//! - Heap pages and files for base relation storage
//! - Relation file scans feeding index construction
//! - The disk-resident B+ tree index

mod btree;
mod bufmgr;
mod disk;
mod heap;
mod record;

pub use btree::{
    BTreeIndex, InternalPage, LeafPage, MetaPage, INITIAL_ROOT_PAGE_NO, LEAF_CAPACITY,
    LEAF_SPLIT_POINT, META_PAGE_NO, NODE_CAPACITY, NODE_SPLIT_POINT, RELATION_NAME_CAPACITY,
};
pub use bufmgr::BufferManager;
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{FileScan, HeapFile, HeapPage};
pub use record::{RecordId, RECORD_ID_SIZE};
