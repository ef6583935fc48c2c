//! Append-only name data file.
//!
//! Same discipline as the store data file, without a sidecar index: the
//! recovery scan always walks the whole file. Reads only ever need the
//! fixed block head, which already carries the (store id, store key)
//! tuple; the name bytes are read back during scans alone.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::buffer::BufferPool;
use crate::disk::read_full_at;
use crate::name::block::{
    self, BlockHead, BLOCK_HEAD_SIZE, DATA_FILE_MAGIC, FILE_HEAD_SIZE, FLAG_DEL, FLAG_OFFSET,
};
use crate::{Error, Result};

pub struct DataFile {
    file: std::fs::File,
    path: PathBuf,
    pool: Arc<BufferPool>,
    /// Logical end: offset of the next append. Published only after the
    /// preceding append is durable.
    end: AtomicU64,
    /// Physical file size as last observed or written.
    size: AtomicU64,
    closed: AtomicBool,
}

impl DataFile {
    pub fn open(path: &Path, pool: Arc<BufferPool>) -> Result<DataFile> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let mut size = file.metadata().map_err(|e| Error::io(path, e))?.len();
        if size == 0 {
            file.write_all_at(&block::file_head(&DATA_FILE_MAGIC), 0)
                .map_err(|e| Error::io(path, e))?;
            size = FILE_HEAD_SIZE as u64;
        } else {
            let mut head = [0u8; FILE_HEAD_SIZE];
            let n = read_full_at(&file, &mut head, 0).map_err(|e| Error::io(path, e))?;
            block::check_file_head(&head[..n], &DATA_FILE_MAGIC, path)?;
        }

        Ok(DataFile {
            file,
            path: path.to_path_buf(),
            pool,
            end: AtomicU64::new(FILE_HEAD_SIZE as u64),
            size: AtomicU64::new(size),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Physical size; equals the logical end once recovery has run.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Append one live block; the caller holds the volume write mutex.
    pub fn append(&self, name: &[u8], store_id: u32, store_key: u64) -> Result<(u64, u32)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        if name.len() > u16::MAX as usize {
            return Err(Error::BlockSizes);
        }

        let (size, _) = block::encoded_size(name.len());
        let mut buf = self.pool.get(size as usize);
        block::encode(name, store_id, store_key, &mut buf);

        let offset = self.end.load(Ordering::Acquire);
        let written = self
            .file
            .write_all_at(&buf, offset)
            .and_then(|()| self.file.sync_data());
        self.pool.put(buf);
        written.map_err(|e| Error::io(&self.path, e))?;

        self.size.store(offset + size as u64, Ordering::Release);
        self.end.store(offset + size as u64, Ordering::Release);
        Ok((offset, size))
    }

    /// Positional read of one block head.
    pub fn read(&self, offset: u64) -> Result<BlockHead> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        let mut buf = [0u8; BLOCK_HEAD_SIZE];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| Error::io(&self.path, e))?;
        BlockHead::decode(&buf)
    }

    /// Flip the block at `offset` to deleted. The cache entry is the
    /// caller's to remove.
    pub fn tombstone(&self, offset: u64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        self.file
            .write_all_at(&[FLAG_DEL], offset + FLAG_OFFSET)
            .and_then(|()| self.file.sync_data())
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Walk blocks from `start`, calling `visit(name, flag, store_id,
    /// store_key, offset, size)` for each one. A corrupt or partial
    /// trailer truncates the file back to the last good offset and the
    /// scan still succeeds; visitor and other I/O errors abort without
    /// truncating.
    pub fn scan<F>(&self, start: u64, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], u8, u32, u64, u64, u32) -> Result<()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }

        let physical = self.size.load(Ordering::Acquire);
        let mut offset = start.max(FILE_HEAD_SIZE as u64);
        let mut head = [0u8; BLOCK_HEAD_SIZE];
        let mut body = Vec::new();

        while offset < physical {
            let n = read_full_at(&self.file, &mut head, offset)
                .map_err(|e| Error::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            if n < BLOCK_HEAD_SIZE {
                warn!(path = %self.path.display(), offset, "partial block head, truncating tail");
                break;
            }
            let parsed = match BlockHead::decode(&head) {
                Ok(parsed) => parsed,
                Err(Error::BlockMagic) => {
                    warn!(path = %self.path.display(), offset, "block magic mismatch, truncating tail");
                    break;
                }
                Err(e) => return Err(e),
            };

            let size = parsed.block_size();
            if offset + size as u64 > physical {
                warn!(path = %self.path.display(), offset, size, "partial block body, truncating tail");
                break;
            }

            let body_size = (size as usize) - BLOCK_HEAD_SIZE;
            body.resize(body_size, 0);
            let read = read_full_at(&self.file, &mut body, offset + BLOCK_HEAD_SIZE as u64)
                .map_err(|e| Error::io(&self.path, e))?;
            if read < body_size {
                warn!(path = %self.path.display(), offset, "partial block body, truncating tail");
                break;
            }

            visit(
                &body[..parsed.name_size as usize],
                parsed.flag,
                parsed.store_id,
                parsed.store_key,
                offset,
                size,
            )?;
            offset += size as u64;
        }

        self.end.store(offset, Ordering::Release);
        if physical != offset {
            self.file
                .set_len(offset)
                .map_err(|e| Error::io(&self.path, e))?;
            self.size.store(offset, Ordering::Release);
        }
        Ok(())
    }

    /// Idempotent; flushes data, then metadata. The descriptor itself is
    /// released when the owning volume drops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.file.sync_data().and_then(|()| self.file.sync_all()) {
            error!(path = %self.path.display(), "sync on close failed: {e}");
        }
    }
}
