//! The store volume group: directory ownership, volume discovery and
//! allocation, and the four operations served to RPC collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::buffer::BufferPool;
use crate::disk;
use crate::plock::ProcessLock;
use crate::store::key_cache::KeyCache;
use crate::store::volume::VolumeFile;
use crate::ticker::Ticker;
use crate::{Error, Result};

/// First volume id handed out in a fresh directory.
pub const VOLUME_ID_BASE: u64 = 100_000_000;
/// Dense volume ids stay within nine digits.
pub const MAX_VOLUME_ID: u64 = 999_999_999;
/// Default size cap: a volume at or past this stops taking writes.
pub const MAX_VOLUME_SIZE: u64 = 8 * 1024 * 1024 * 1024;

const DATA_FILE_PREFIX: &str = "vdata-";
const INDEX_FILE_PREFIX: &str = "vindex-";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    /// Writes are refused while the data directory reports less free
    /// space than this, in MiB. Zero disables the gate.
    pub data_free_mb: u64,
    /// Same gate for the index directory.
    pub index_free_mb: u64,
    pub stats_refresh: Duration,
    pub max_volume_size: u64,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> StoreConfig {
        StoreConfig {
            data_dir: data_dir.into(),
            index_dir: index_dir.into(),
            data_free_mb: 100,
            index_free_mb: 30,
            stats_refresh: Duration::from_secs(10),
            max_volume_size: MAX_VOLUME_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounters {
    pub file_count: u32,
    pub read_count: u64,
    pub read_bytes: u64,
    pub write_count: u64,
    pub write_bytes: u64,
    pub delete_count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub data_free_mb: u64,
    pub index_free_mb: u64,
    pub counters: StoreCounters,
}

/// One read result: the record body plus its on-disk block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreObject {
    pub meta: Vec<u8>,
    pub data: Vec<u8>,
    pub size: u32,
}

#[derive(Default)]
struct Counters {
    file_count: AtomicU32,
    read_count: AtomicU64,
    read_bytes: AtomicU64,
    write_count: AtomicU64,
    write_bytes: AtomicU64,
    delete_count: AtomicU64,
}

impl Counters {
    /// File count is cumulative; the traffic counters reset per window.
    fn snapshot_and_reset(&self) -> StoreCounters {
        StoreCounters {
            file_count: self.file_count.load(Ordering::Relaxed),
            read_count: self.read_count.swap(0, Ordering::Relaxed),
            read_bytes: self.read_bytes.swap(0, Ordering::Relaxed),
            write_count: self.write_count.swap(0, Ordering::Relaxed),
            write_bytes: self.write_bytes.swap(0, Ordering::Relaxed),
            delete_count: self.delete_count.swap(0, Ordering::Relaxed),
        }
    }
}

struct VolumeSet {
    volumes: HashMap<u64, Arc<VolumeFile>>,
    current: Option<Arc<VolumeFile>>,
    max_vid: u64,
}

struct StoreInner {
    config: StoreConfig,
    cache: Arc<KeyCache>,
    pool: Arc<BufferPool>,
    set: RwLock<VolumeSet>,
    counters: Counters,
    stats: RwLock<StoreStats>,
    data_lock: Mutex<ProcessLock>,
    index_lock: Mutex<ProcessLock>,
    closed: AtomicBool,
}

/// The payload-bearing engine. Cheap to clone; all clones share one
/// group.
#[derive(Clone)]
pub struct StoreEngine {
    inner: Arc<StoreInner>,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl StoreEngine {
    /// Lock both directories, recover every discovered volume, elect the
    /// current one and start the stats timer.
    pub fn open(config: StoreConfig) -> Result<StoreEngine> {
        disk::ensure_writable_dir(&config.data_dir)?;
        disk::ensure_writable_dir(&config.index_dir)?;

        let mut data_lock = ProcessLock::new(&config.data_dir, "store data");
        data_lock.lock()?;
        let mut index_lock = ProcessLock::new(&config.index_dir, "store index");
        index_lock.lock()?;

        let inner = Arc::new(StoreInner {
            cache: Arc::new(KeyCache::new()),
            pool: Arc::new(BufferPool::new(64)),
            set: RwLock::new(VolumeSet {
                volumes: HashMap::new(),
                current: None,
                max_vid: 0,
            }),
            counters: Counters::default(),
            stats: RwLock::new(StoreStats::default()),
            data_lock: Mutex::new(data_lock),
            index_lock: Mutex::new(index_lock),
            closed: AtomicBool::new(false),
            config,
        });

        inner.discover()?;

        let weak: Weak<StoreInner> = Arc::downgrade(&inner);
        let ticker = Ticker::start(inner.config.stats_refresh, move || {
            if let Some(inner) = weak.upgrade() {
                inner.refresh_stats();
            }
        });

        Ok(StoreEngine {
            inner,
            ticker: Arc::new(Mutex::new(Some(ticker))),
        })
    }

    /// Store a fresh object. Duplicate keys are rejected before any disk
    /// traffic happens.
    pub fn write(&self, key: u64, meta: &[u8], data: &[u8]) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        {
            let stats = inner.stats.read();
            if stats.data_free_mb < inner.config.data_free_mb {
                return Err(Error::DataNoSpace);
            }
            if stats.index_free_mb < inner.config.index_free_mb {
                return Err(Error::IndexNoSpace);
            }
        }
        if inner.cache.get(key).is_some() {
            return Err(Error::KeyExists);
        }

        let volume = inner.allocate()?;
        let (_, size) = volume.write(key, meta, data)?;

        inner.counters.write_count.fetch_add(1, Ordering::Relaxed);
        inner
            .counters
            .write_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, key: u64) -> Result<StoreObject> {
        let inner = &self.inner;
        let entry = inner.cache.get(key).ok_or(Error::NotExists)?;
        let volume = inner
            .set
            .read()
            .volumes
            .get(&entry.vid)
            .cloned()
            .ok_or(Error::NotExists)?;

        let (meta, data) = volume.read(entry)?;
        inner.counters.read_count.fetch_add(1, Ordering::Relaxed);
        inner
            .counters
            .read_bytes
            .fetch_add(entry.size as u64, Ordering::Relaxed);
        Ok(StoreObject {
            meta,
            data,
            size: entry.size,
        })
    }

    /// Deleting an absent key succeeds.
    pub fn delete(&self, key: u64) -> Result<()> {
        let inner = &self.inner;
        let entry = match inner.cache.get(key) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let volume = match inner.set.read().volumes.get(&entry.vid).cloned() {
            Some(volume) => volume,
            None => return Ok(()),
        };

        volume.delete(entry)?;
        inner.cache.del(key);
        inner.counters.delete_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The last completed stats window.
    pub fn stats(&self) -> StoreStats {
        self.inner.stats.read().clone()
    }

    /// Stop the timer, close every volume, release the directory locks.
    /// Idempotent.
    pub fn close(&self) {
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let set = inner.set.write();
        for volume in set.volumes.values() {
            volume.close();
        }
        drop(set);

        inner.data_lock.lock().unlock();
        inner.index_lock.lock().unlock();
        info!(data_dir = %inner.config.data_dir.display(), "store engine closed");
    }
}

impl StoreInner {
    fn data_file_path(&self, vid: u64) -> PathBuf {
        self.config.data_dir.join(format!("{DATA_FILE_PREFIX}{vid}"))
    }

    fn index_file_path(&self, vid: u64) -> PathBuf {
        self.config.index_dir.join(format!("{INDEX_FILE_PREFIX}{vid}"))
    }

    fn discover(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.config.data_dir)
            .map_err(|e| Error::io(&self.config.data_dir, e))?;

        let mut vids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.config.data_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_prefix(DATA_FILE_PREFIX) {
                if let Ok(vid) = id.parse::<u64>() {
                    vids.push(vid);
                }
            }
        }
        vids.sort_unstable();

        let mut set = self.set.write();
        for vid in vids {
            let volume = Arc::new(VolumeFile::open(
                vid,
                self.cache.clone(),
                &self.data_file_path(vid),
                &self.index_file_path(vid),
                self.pool.clone(),
            )?);
            info!(vid, size = volume.size(), "recovered volume");
            set.volumes.insert(vid, volume);
            set.max_vid = set.max_vid.max(vid);
            self.counters.file_count.fetch_add(1, Ordering::Relaxed);
        }

        if set.max_vid > 0 {
            if let Some(volume) = set.volumes.get(&set.max_vid) {
                if volume.size() < self.config.max_volume_size {
                    set.current = Some(volume.clone());
                }
            }
        }
        Ok(())
    }

    /// Reuse the current volume while it has headroom, otherwise mint the
    /// next dense id and open a fresh pair of files.
    fn allocate(&self) -> Result<Arc<VolumeFile>> {
        let mut set = self.set.write();
        if let Some(current) = &set.current {
            if current.size() < self.config.max_volume_size {
                return Ok(current.clone());
            }
        }

        let vid = (set.max_vid + 1).max(VOLUME_ID_BASE);
        if vid > MAX_VOLUME_ID {
            return Err(Error::VolumeIdOverflow(vid));
        }

        let volume = Arc::new(VolumeFile::open(
            vid,
            self.cache.clone(),
            &self.data_file_path(vid),
            &self.index_file_path(vid),
            self.pool.clone(),
        )?);
        info!(vid, "allocated volume");
        set.volumes.insert(vid, volume.clone());
        set.max_vid = vid;
        set.current = Some(volume.clone());
        self.counters.file_count.fetch_add(1, Ordering::Relaxed);
        Ok(volume)
    }

    fn refresh_stats(&self) {
        let data_free_mb = disk::free_space_mb(&self.config.data_dir).unwrap_or_else(|e| {
            warn!("data free-space probe failed: {e}");
            0
        });
        let index_free_mb = disk::free_space_mb(&self.config.index_dir).unwrap_or_else(|e| {
            warn!("index free-space probe failed: {e}");
            0
        });
        *self.stats.write() = StoreStats {
            data_free_mb,
            index_free_mb,
            counters: self.counters.snapshot_and_reset(),
        };
    }
}
