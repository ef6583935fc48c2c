//! One name volume: a single data file, a write mutex and a handle on
//! the group's shared name cache.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::BufferPool;
use crate::name::block::FLAG_OK;
use crate::name::data_file::DataFile;
use crate::name::name_cache::{NameCache, NameEntry};
use crate::{Error, Result};

pub struct NameFile {
    pub nid: u64,
    data: DataFile,
    wlock: Mutex<()>,
    closed: AtomicBool,
    cache: Arc<NameCache>,
}

impl NameFile {
    /// Open the data file and replay it into the cache before the volume
    /// is published. With no sidecar index the scan is always full.
    pub fn open(
        nid: u64,
        cache: Arc<NameCache>,
        data_path: &Path,
        pool: Arc<BufferPool>,
    ) -> Result<NameFile> {
        let volume = NameFile {
            nid,
            data: DataFile::open(data_path, pool)?,
            wlock: Mutex::new(()),
            closed: AtomicBool::new(false),
            cache,
        };
        volume.recover()?;
        Ok(volume)
    }

    fn recover(&self) -> Result<()> {
        self.data.scan(0, |name, flag, store_id, store_key, offset, _| {
            if flag == FLAG_OK {
                self.cache.set(
                    name,
                    NameEntry {
                        nid: self.nid,
                        store_id,
                        store_key,
                        offset,
                    },
                );
            } else {
                self.cache.del(name);
            }
            Ok(())
        })
    }

    /// Append, then publish to the cache. On error nothing is published.
    pub fn write(&self, name: &[u8], store_id: u32, store_key: u64) -> Result<(u64, u32)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        let guard = self.wlock.lock();
        let (offset, size) = self.data.append(name, store_id, store_key)?;
        drop(guard);

        self.cache.set(
            name,
            NameEntry {
                nid: self.nid,
                store_id,
                store_key,
                offset,
            },
        );
        Ok((offset, size))
    }

    /// Resolve a name from its on-disk block head. A tombstoned record
    /// evicts its cache entry and reads as missing, covering readers
    /// racing a delete.
    pub fn read(&self, name: &[u8], entry: NameEntry) -> Result<(u32, u64)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        let head = self.data.read(entry.offset)?;
        if head.flag != FLAG_OK {
            self.cache.del(name);
            return Err(Error::NotExists);
        }
        Ok((head.store_id, head.store_key))
    }

    /// Tombstone only; the group erases the cache entry afterwards.
    pub fn delete(&self, entry: NameEntry) -> Result<()> {
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
    }
}
