//! Configuration structures for StratumDB.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data and index files.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_frames: 1024, // 8 MB with 8 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.buffer_pool_frames, 1024);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig {
            buffer_pool_frames: 100,
            ..Default::default()
        };
        assert_eq!(config.buffer_pool_size_bytes(), 100 * PAGE_SIZE);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/tmp/stratum"),
            buffer_pool_frames: 256,
            fsync_enabled: false,
        };

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.data_dir, config.data_dir);
        assert_eq!(deserialized.buffer_pool_frames, config.buffer_pool_frames);
        assert_eq!(deserialized.fsync_enabled, config.fsync_enabled);
    }
}
