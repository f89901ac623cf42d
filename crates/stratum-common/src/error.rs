//! Error types for StratumDB.

use thiserror::Error;

/// Result type alias using StratumError.
pub type Result<T> = std::result::Result<T, StratumError>;

/// Errors that can occur in StratumDB operations.
#[derive(Debug, Error)]
pub enum StratumError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    // Storage errors
    #[error("page {page_no} does not exist in file {file_id}")]
    PageNotFound { file_id: u32, page_no: u32 },

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page full, unable to insert record")]
    PageFull,

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    // Index errors
    #[error("index metadata mismatch: {0}")]
    BadIndexInfo(String),

    #[error("invalid scan operator")]
    BadOpcodes,

    #[error("scan range lower bound exceeds upper bound")]
    BadScanrange,

    #[error("no key satisfies the scan predicate")]
    NoSuchKey,

    #[error("no scan in progress")]
    ScanNotInitialized,

    #[error("scan has returned all matching entries")]
    ScanCompleted,

    // Stream termination
    #[error("end of file reached")]
    EndOfFile,
}
