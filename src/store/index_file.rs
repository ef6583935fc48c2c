//! Sidecar index file.
//!
//! Fixed 20-byte records, append order mirroring the data file:
//!
//! ```text
//! | key 8 | offset 8 | size 4 |
//! ```
//!
//! No flags and no tombstones; deletes exist only in the data file. The
//! record stream must advance monotonically through the data file, which
//! is what the recovery scan checks corruption by.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use byteorder::{BigEndian, ByteOrder};
use tracing::{error, warn};

use crate::disk::read_full_at;
use crate::store::block::{self, FILE_HEAD_SIZE, INDEX_FILE_MAGIC};
use crate::{Error, Result};

pub const INDEX_BLOCK_SIZE: usize = 20;

pub struct IndexFile {
    file: std::fs::File,
    path: PathBuf,
    end: AtomicU64,
    size: AtomicU64,
    closed: AtomicBool,
}

impl IndexFile {
    pub fn open(path: &Path) -> Result<IndexFile> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let mut size = file.metadata().map_err(|e| Error::io(path, e))?.len();
        if size == 0 {
            file.write_all_at(&block::file_head(&INDEX_FILE_MAGIC), 0)
                .map_err(|e| Error::io(path, e))?;
            size = FILE_HEAD_SIZE as u64;
        } else {
            let mut head = [0u8; FILE_HEAD_SIZE];
            let n = read_full_at(&file, &mut head, 0).map_err(|e| Error::io(path, e))?;
            block::check_file_head(&head[..n], &INDEX_FILE_MAGIC, path)?;
        }

        Ok(IndexFile {
            file,
            path: path.to_path_buf(),
            end: AtomicU64::new(FILE_HEAD_SIZE as u64),
            size: AtomicU64::new(size),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mirror one durable data write; caller holds the volume write mutex.
    pub fn append(&self, key: u64, offset: u64, size: u32) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }

        let mut record = [0u8; INDEX_BLOCK_SIZE];
        BigEndian::write_u64(&mut record[0..8], key);
        BigEndian::write_u64(&mut record[8..16], offset);
        BigEndian::write_u32(&mut record[16..20], size);

        let end = self.end.load(Ordering::Acquire);
        self.file
            .write_all_at(&record, end)
            .and_then(|()| self.file.sync_data())
            .map_err(|e| Error::io(&self.path, e))?;

        self.end.store(end + INDEX_BLOCK_SIZE as u64, Ordering::Release);
        self.size.store(end + INDEX_BLOCK_SIZE as u64, Ordering::Release);
        Ok(())
    }

    /// Walk records in order against a data file of `data_size` bytes.
    /// Any record that steps backwards (`BlockOffset`) or past the data
    /// file (`BlockSize`) marks a lost tail: the index is truncated to
    /// the last good record and the scan succeeds. Returns the data-file
    /// offset where the data scan should resume.
    pub fn scan<F>(&self, data_size: u64, mut visit: F) -> Result<u64>
    where
        F: FnMut(u64, u64, u32) -> Result<()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }

        let physical = self.size.load(Ordering::Acquire);
        let mut offset = FILE_HEAD_SIZE as u64;
        let mut data_offset = FILE_HEAD_SIZE as u64;
        let mut record = [0u8; INDEX_BLOCK_SIZE];

        while offset < physical {
            let n = read_full_at(&self.file, &mut record, offset)
                .map_err(|e| Error::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            if n < INDEX_BLOCK_SIZE {
                warn!(path = %self.path.display(), offset, "partial index record, truncating tail");
                break;
            }

            let key = BigEndian::read_u64(&record[0..8]);
            let entry_offset = BigEndian::read_u64(&record[8..16]);
            let entry_size = BigEndian::read_u32(&record[16..20]);

            if entry_offset < data_offset {
                warn!(
                    path = %self.path.display(), offset,
                    "{}, truncating tail", Error::BlockOffset
                );
                break;
            }
            if entry_offset + entry_size as u64 > data_size {
                warn!(
                    path = %self.path.display(), offset,
                    "{}, truncating tail", Error::BlockSize
                );
                break;
            }

            visit(key, entry_offset, entry_size)?;
            data_offset = entry_offset + entry_size as u64;
            offset += INDEX_BLOCK_SIZE as u64;
        }

        self.end.store(offset, Ordering::Release);
        if physical != offset {
            self.file
                .set_len(offset)
                .map_err(|e| Error::io(&self.path, e))?;
            self.size.store(offset, Ordering::Release);
        }
        Ok(data_offset)
    }

    pub fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        self.file
            .sync_data()
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Idempotent; flushes data, then metadata.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.file.sync_data().and_then(|()| self.file.sync_all()) {
            error!(path = %self.path.display(), "sync on close failed: {e}");
        }
    }
}
