//! Append-only store data file.
//!
//! Single writer, many readers: appends are serialized by the owning
//! volume's write mutex and land with fdatasync before the logical end
//! moves, reads are positional and never touch a cursor. Deletes flip
//! the flag byte in place; bytes are never rewritten otherwise.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::buffer::BufferPool;
use crate::disk::read_full_at;
use crate::store::block::{
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
    pub fn append(&self, key: u64, meta: &[u8], data: &[u8]) -> Result<(u64, u32)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        if meta.len() > u16::MAX as usize || data.len() > u32::MAX as usize {
            return Err(Error::BlockSizes);
        }

        let (size, _) = block::encoded_size(meta.len(), data.len());
        let mut buf = self.pool.get(size as usize);
        block::encode(key, meta, data, &mut buf);

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

    /// Positional read of one complete block.
    pub fn read(&self, offset: u64, size: u32) -> Result<(u64, u8, Vec<u8>, Vec<u8>)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }
        let mut buf = vec![0u8; size as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| Error::io(&self.path, e))?;
        let b = block::decode(&buf)?;
        Ok((b.key, b.flag, b.meta.to_vec(), b.data.to_vec()))
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

    /// Walk blocks from `start`, calling `visit(key, flag, offset, size)`
    /// for each one. A corrupt or partial trailer truncates the file back
    /// to the last good offset and the scan still succeeds; visitor and
    /// other I/O errors abort without truncating.
    pub fn scan<F>(&self, start: u64, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, u8, u64, u32) -> Result<()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::FileClosed);
        }

        let physical = self.size.load(Ordering::Acquire);
        let mut offset = start.max(FILE_HEAD_SIZE as u64);
        let mut head = [0u8; BLOCK_HEAD_SIZE];

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
            visit(parsed.key, parsed.flag, offset, size)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(8))
    }

    fn collect(file: &DataFile, start: u64) -> Vec<(u64, u8, u64, u32)> {
        let mut seen = Vec::new();
        file.scan(start, |key, flag, offset, size| {
            seen.push((key, flag, offset, size));
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn creates_header_on_first_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vdata-100000000");
        let file = DataFile::open(&path, pool()).unwrap();
        assert_eq!(file.size(), FILE_HEAD_SIZE as u64);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], &DATA_FILE_MAGIC);
        assert_eq!(bytes[4], block::HEAD_VERSION);
        assert_eq!(bytes.len(), FILE_HEAD_SIZE);
    }

    #[test]
    fn rejects_foreign_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vdata-100000000");
        std::fs::write(&path, block::file_head(&block::INDEX_FILE_MAGIC)).unwrap();
        assert!(matches!(
            DataFile::open(&path, pool()),
            Err(Error::HeadMagic { .. })
        ));
    }

    #[test]
    fn append_read_tombstone() {
        let dir = TempDir::new().unwrap();
        let file = DataFile::open(&dir.path().join("vdata-100000000"), pool()).unwrap();

        let (offset, size) = file.append(0xDEAD, b"m", b"hello").unwrap();
        assert_eq!((offset, size), (FILE_HEAD_SIZE as u64, 32));

        let (key, flag, meta, data) = file.read(offset, size).unwrap();
        assert_eq!((key, flag), (0xDEAD, block::FLAG_OK));
        assert_eq!(meta, b"m");
        assert_eq!(data, b"hello");

        file.tombstone(offset).unwrap();
        let (_, flag, _, _) = file.read(offset, size).unwrap();
        assert_eq!(flag, FLAG_DEL);
    }

    #[test]
    fn scan_reproduces_blocks_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vdata-100000000");
        let file = DataFile::open(&path, pool()).unwrap();
        let first = file.append(1, b"", b"one").unwrap();
        let second = file.append(2, b"mm", b"two").unwrap();
        file.tombstone(second.0).unwrap();
        drop(file);

        let file = DataFile::open(&path, pool()).unwrap();
        let seen = collect(&file, 0);
        assert_eq!(
            seen,
            vec![
                (1, block::FLAG_OK, first.0, first.1),
                (2, FLAG_DEL, second.0, second.1),
            ]
        );
    }

    #[test]
    fn scan_truncates_corrupt_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vdata-100000000");
        let file = DataFile::open(&path, pool()).unwrap();
        let (first_offset, first_size) = file.append(1, b"", b"keep").unwrap();
        let (second_offset, _) = file.append(2, b"", b"lost").unwrap();
        drop(file);

        // Flip the first magic byte of the second block.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[second_offset as usize] = 0x00;
        std::fs::write(&path, &bytes).unwrap();

        let file = DataFile::open(&path, pool()).unwrap();
        let seen = collect(&file, 0);
        assert_eq!(seen, vec![(1, block::FLAG_OK, first_offset, first_size)]);
        assert_eq!(file.size(), first_offset + first_size as u64);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            first_offset + first_size as u64
        );
    }

    #[test]
    fn scan_truncates_partial_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vdata-100000000");
        let file = DataFile::open(&path, pool()).unwrap();
        let (offset, size) = file.append(1, b"", b"whole").unwrap();
        file.append(2, b"", b"torn").unwrap();
        drop(file);

        // Chop the second block short, as a crashed append would.
        let end = offset + size as u64;
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(end + 5).unwrap();
        drop(f);

        let file = DataFile::open(&path, pool()).unwrap();
        let seen = collect(&file, 0);
        assert_eq!(seen.len(), 1);
        assert_eq!(file.size(), end);
    }

    #[test]
    fn closed_file_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let file = DataFile::open(&dir.path().join("vdata-100000000"), pool()).unwrap();
        let (offset, size) = file.append(1, b"", b"x").unwrap();
        file.close();
        file.close();

        assert!(matches!(file.append(2, b"", b"y"), Err(Error::FileClosed)));
        assert!(matches!(file.read(offset, size), Err(Error::FileClosed)));
        assert!(matches!(file.tombstone(offset), Err(Error::FileClosed)));
        assert!(matches!(file.scan(0, |_, _, _, _| Ok(())), Err(Error::FileClosed)));
    }
}
