//! One store volume: a data file, its sidecar index, a write mutex and a
//! handle on the group's shared key cache.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::BufferPool;
use crate::store::block::FLAG_OK;
use crate::store::data_file::DataFile;
use crate::store::index_file::IndexFile;
use crate::store::key_cache::{KeyCache, KeyEntry};
use crate::{Error, Result};

pub struct VolumeFile {
    pub vid: u64,
    data: DataFile,
    index: IndexFile,
    wlock: Mutex<()>,
    closed: AtomicBool,
    cache: Arc<KeyCache>,
}

impl VolumeFile {
    /// Open both files and run recovery before the volume is published.
    pub fn open(
        vid: u64,
        cache: Arc<KeyCache>,
        data_path: &Path,
        index_path: &Path,
        pool: Arc<BufferPool>,
    ) -> Result<VolumeFile> {
        let volume = VolumeFile {
            vid,
            data: DataFile::open(data_path, pool)?,
            index: IndexFile::open(index_path)?,
            wlock: Mutex::new(()),
            closed: AtomicBool::new(false),
            cache,
        };
        volume.recover()?;
        Ok(volume)
    }

    /// Two-phase recovery: replay the index into the cache, then scan the
    /// data tail the index has not seen yet, back-filling index records as
    /// we go. Steady-state restarts stop at phase one; a crash that lost
    /// the index tail pays for phase two only past the resume point.
    fn recover(&self) -> Result<()> {
        let resume = self.index.scan(self.data.size(), |key, offset, size| {
            self.cache.set(
                key,
                KeyEntry {
                    vid: self.vid,
                    offset,
                    size,
                },
            );
            Ok(())
        })?;

        self.data.scan(resume, |key, flag, offset, size| {
            self.index.append(key, offset, size)?;
            if flag == FLAG_OK {
                self.cache.set(
                    key,
                    KeyEntry {
                        vid: self.vid,
                        offset,
                        size,
                    },
                );
            } else {
                self.cache.del(key);
            }
            Ok(())
        })?;

        self.index.flush()
    }

    /// Data append, index append, then cache publish. On error nothing is
    /// published; a torn data write is left for the next recovery scan.
    pub fn write(&self, key: u64, meta: &[u8], data: &[u8]) -> Result<(u64, u32)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        let guard = self.wlock.lock();
        let (offset, size) = self.data.append(key, meta, data)?;
        self.index.append(key, offset, size)?;
        drop(guard);

        self.cache.set(
            key,
            KeyEntry {
                vid: self.vid,
                offset,
                size,
            },
        );
        Ok((offset, size))
    }

    /// Positional read; a tombstoned record evicts its cache entry and
    /// reads as missing. That covers both readers racing a delete and
    /// entries the index replayed for records deleted before the restart.
    pub fn read(&self, entry: KeyEntry) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        let (key, flag, meta, data) = self.data.read(entry.offset, entry.size)?;
        if flag != FLAG_OK {
            self.cache.del(key);
            return Err(Error::NotExists);
        }
        Ok((meta, data))
    }

    /// Tombstone only; the group erases the cache entry afterwards.
    pub fn delete(&self, entry: KeyEntry) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        let _guard = self.wlock.lock();
        self.data.tombstone(entry.offset)
    }

    pub fn size(&self) -> u64 {
        self.data.size()
    }

    /// Idempotent.
    pub fn close(&self) {
        let _guard = self.wlock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.data.close();
        self.index.close();
    }
}
