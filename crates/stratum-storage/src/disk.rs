//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use stratum_common::page::{PageId, PAGE_SIZE};
use stratum_common::{Result, StorageConfig, StratumError};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages to named disk files.
///
/// Files are addressed by name on creation and by a numeric handle
/// afterwards. Page numbers within a file are 1-based; page 0 is the
/// invalid sentinel and is never stored.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file handles.
    files: Mutex<FileTable>,
}

struct FileTable {
    by_id: HashMap<u32, FileHandle>,
    by_name: HashMap<String, u32>,
    next_id: u32,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// File name within the data directory.
    name: String,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(FileTable {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the path for a named file.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with the given name exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Returns the handle of an already-open file, if any.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.files.lock().by_name.get(name).copied()
    }

    /// Creates a new file and returns its handle.
    ///
    /// Fails with `FileExists` if the file is already present.
    pub fn create(&self, name: &str) -> Result<u32> {
        let path = self.file_path(name);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StratumError::FileExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(self.install(name, file, 0))
    }

    /// Opens an existing file and returns its handle.
    ///
    /// Returns the existing handle if the file is already open. Fails with
    /// `FileNotFound` if the file does not exist.
    pub fn open(&self, name: &str) -> Result<u32> {
        if let Some(file_id) = self.id_of(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if !path.exists() {
            return Err(StratumError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(self.install(name, file, num_pages))
    }

    /// Registers an open file and assigns it a handle.
    fn install(&self, name: &str, file: File, num_pages: u32) -> u32 {
        let mut files = self.files.lock();
        let file_id = files.next_id;
        files.next_id += 1;
        files.by_id.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        files.by_name.insert(name.to_string(), file_id);
        file_id
    }

    /// Closes a file, syncing any pending writes.
    pub fn close(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.by_id.remove(&file_id) {
            files.by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a file, closing it first if open.
    ///
    /// Fails with `FileNotFound` if the file does not exist; callers that
    /// clean up prior runs recover from that case.
    pub fn delete(&self, name: &str) -> Result<()> {
        if let Some(file_id) = self.id_of(name) {
            let mut files = self.files.lock();
            if let Some(handle) = files.by_id.remove(&file_id) {
                files.by_name.remove(&handle.name);
            }
        }

        let path = self.file_path(name);
        if !path.exists() {
            return Err(StratumError::FileNotFound(name.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut files = self.files.lock();
        let handle = Self::handle_mut(&mut files, page_id.file_id)?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(StratumError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        handle.file.seek(SeekFrom::Start(Self::offset(page_id.page_no)))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut files = self.files.lock();
        let handle = Self::handle_mut(&mut files, page_id.file_id)?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(StratumError::PageNotFound {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        handle.file.seek(SeekFrom::Start(Self::offset(page_id.page_no)))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates a new zeroed page at the end of the file.
    ///
    /// Returns the 1-based page number of the new page.
    pub fn allocate_page(&self, file_id: u32) -> Result<u32> {
        let mut files = self.files.lock();
        let handle = Self::handle_mut(&mut files, file_id)?;

        let page_no = handle.num_pages + 1;
        handle.file.seek(SeekFrom::Start(Self::offset(page_no)))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no;
        Ok(page_no)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let mut files = self.files.lock();
        let handle = Self::handle_mut(&mut files, file_id)?;
        Ok(handle.num_pages)
    }

    /// Syncs a file's pending writes to disk.
    pub fn flush(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        let handle = Self::handle_mut(&mut files, file_id)?;
        handle.file.sync_all()?;
        Ok(())
    }

    fn handle_mut(files: &mut FileTable, file_id: u32) -> Result<&mut FileHandle> {
        files
            .by_id
            .get_mut(&file_id)
            .ok_or_else(|| StratumError::FileNotFound(format!("file handle {}", file_id)))
    }

    fn offset(page_no: u32) -> u64 {
        ((page_no - 1) as u64) * (PAGE_SIZE as u64)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let files = self.files.lock();
        for handle in files.by_id.values() {
            let _ = handle.file.sync_all();
        }
    }
}
