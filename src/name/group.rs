//! The name volume group: directory ownership, `ndata-` discovery,
//! snowflake-sourced volume allocation and the four name operations.

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
use crate::name::name_cache::NameCache;
use crate::name::volume::NameFile;
use crate::plock::ProcessLock;
use crate::snowflake::{id_timestamp, KeyGenerator};
use crate::ticker::Ticker;
use crate::{Error, Result};

/// Default size cap: a volume at or past this stops taking writes.
pub const MAX_VOLUME_SIZE: u64 = 8 * 1024 * 1024 * 1024;

const DATA_FILE_PREFIX: &str = "ndata-";

#[derive(Debug, Clone)]
pub struct NameConfig {
    pub data_dir: PathBuf,
    /// Writes are refused while the directory reports less free space
    /// than this, in MiB. Zero disables the gate.
    pub data_free_mb: u64,
    pub stats_refresh: Duration,
    /// Machine id feeding the volume-id generator.
    pub machine_id: u64,
    pub max_volume_size: u64,
}

impl NameConfig {
    pub fn new(data_dir: impl Into<PathBuf>, machine_id: u64) -> NameConfig {
        NameConfig {
            data_dir: data_dir.into(),
            data_free_mb: 100,
            stats_refresh: Duration::from_secs(10),
            machine_id,
            max_volume_size: MAX_VOLUME_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCounters {
    pub file_count: u32,
    pub read_count: u64,
    pub write_count: u64,
    pub delete_count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NameStats {
    pub data_free_mb: u64,
    pub counters: NameCounters,
}

#[derive(Default)]
struct Counters {
    file_count: AtomicU32,
    read_count: AtomicU64,
    write_count: AtomicU64,
    delete_count: AtomicU64,
}

impl Counters {
    /// File count is cumulative; the traffic counters reset per window.
    fn snapshot_and_reset(&self) -> NameCounters {
        NameCounters {
            file_count: self.file_count.load(Ordering::Relaxed),
            read_count: self.read_count.swap(0, Ordering::Relaxed),
            write_count: self.write_count.swap(0, Ordering::Relaxed),
            delete_count: self.delete_count.swap(0, Ordering::Relaxed),
        }
    }
}

struct NameSet {
    volumes: HashMap<u64, Arc<NameFile>>,
    current: Option<Arc<NameFile>>,
    max_nid: u64,
}

struct NameInner {
    config: NameConfig,
    cache: Arc<NameCache>,
    pool: Arc<BufferPool>,
    generator: KeyGenerator,
    set: RwLock<NameSet>,
    counters: Counters,
    stats: RwLock<NameStats>,
    data_lock: Mutex<ProcessLock>,
    closed: AtomicBool,
}

/// The metadata engine mapping names to (store id, store key). Cheap to
/// clone; all clones share one group.
#[derive(Clone)]
pub struct NameEngine {
    inner: Arc<NameInner>,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl NameEngine {
    /// Lock the directory, recover every discovered volume, elect the
    /// current one and start the stats timer.
    pub fn open(config: NameConfig) -> Result<NameEngine> {
        disk::ensure_writable_dir(&config.data_dir)?;

        let mut data_lock = ProcessLock::new(&config.data_dir, "name data");
        data_lock.lock()?;

        let generator = KeyGenerator::new(config.machine_id)?;
        let inner = Arc::new(NameInner {
            cache: Arc::new(NameCache::new()),
            pool: Arc::new(BufferPool::new(64)),
            generator,
            set: RwLock::new(NameSet {
                volumes: HashMap::new(),
                current: None,
                max_nid: 0,
            }),
            counters: Counters::default(),
            stats: RwLock::new(NameStats::default()),
            data_lock: Mutex::new(data_lock),
            closed: AtomicBool::new(false),
            config,
        });

        inner.discover()?;

        let weak: Weak<NameInner> = Arc::downgrade(&inner);
        let ticker = Ticker::start(inner.config.stats_refresh, move || {
            if let Some(inner) = weak.upgrade() {
                inner.refresh_stats();
            }
        });

        Ok(NameEngine {
            inner,
            ticker: Arc::new(Mutex::new(Some(ticker))),
        })
    }

    /// Bind a fresh name. Duplicate names are rejected before any disk
    /// traffic happens.
    pub fn write(&self, name: &str, store_id: u32, store_key: u64) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::VolumeClosed);
        }

        if inner.stats.read().data_free_mb < inner.config.data_free_mb {
            return Err(Error::DataNoSpace);
        }
        if inner.cache.get(name.as_bytes()).is_some() {
            return Err(Error::NameExists);
        }

        let volume = inner.allocate()?;
        volume.write(name.as_bytes(), store_id, store_key)?;
        inner.counters.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<(u32, u64)> {
        let inner = &self.inner;
        let entry = inner.cache.get(name.as_bytes()).ok_or(Error::NotExists)?;
        let volume = inner
            .set
            .read()
            .volumes
            .get(&entry.nid)
            .cloned()
            .ok_or(Error::NotExists)?;

        let located = volume.read(name.as_bytes(), entry)?;
        inner.counters.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(located)
    }

    /// Deleting an absent name succeeds.
    pub fn delete(&self, name: &str) -> Result<()> {
        let inner = &self.inner;
        let entry = match inner.cache.get(name.as_bytes()) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let volume = match inner.set.read().volumes.get(&entry.nid).cloned() {
            Some(volume) => volume,
            None => return Ok(()),
        };

        volume.delete(entry)?;
        inner.cache.del(name.as_bytes());
        inner.counters.delete_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The last completed stats window.
    pub fn stats(&self) -> NameStats {
        self.inner.stats.read().clone()
    }

    /// Stop the timer, close every volume, release the directory lock.
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
        info!(data_dir = %inner.config.data_dir.display(), "name engine closed");
    }
}

impl NameInner {
    fn data_file_path(&self, nid: u64) -> PathBuf {
        self.config.data_dir.join(format!("{DATA_FILE_PREFIX}{nid}"))
    }

    fn discover(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.config.data_dir)
            .map_err(|e| Error::io(&self.config.data_dir, e))?;

        let mut nids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.config.data_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_prefix(DATA_FILE_PREFIX) {
                if let Ok(nid) = id.parse::<u64>() {
                    nids.push(nid);
                }
            }
        }
        nids.sort_unstable();

        let mut set = self.set.write();
        for nid in nids {
            let volume = Arc::new(NameFile::open(
                nid,
                self.cache.clone(),
                &self.data_file_path(nid),
                self.pool.clone(),
            )?);
            info!(nid, size = volume.size(), "recovered volume");
            set.volumes.insert(nid, volume);
            set.max_nid = set.max_nid.max(nid);
            self.counters.file_count.fetch_add(1, Ordering::Relaxed);
        }

        if set.max_nid > 0 {
            if let Some(volume) = set.volumes.get(&set.max_nid) {
                if volume.size() < self.config.max_volume_size {
                    set.current = Some(volume.clone());
                }
            }
        }
        Ok(())
    }

    /// Reuse the current volume while it has headroom, otherwise mint a
    /// snowflake id. A fresh generator can land in the same millisecond
    /// as the previous run's newest volume, so ids that merely tie on
    /// the timestamp are re-minted; an id whose timestamp is older than
    /// the discovered maximum means the wall clock regressed.
    fn allocate(&self) -> Result<Arc<NameFile>> {
        let mut set = self.set.write();
        if let Some(current) = &set.current {
            if current.size() < self.config.max_volume_size {
                return Ok(current.clone());
            }
        }

        let mut nid = self.generator.next_id()?;
        while nid <= set.max_nid {
            if id_timestamp(nid) < id_timestamp(set.max_nid) {
                return Err(Error::ClockBackwards(
                    id_timestamp(set.max_nid) - id_timestamp(nid),
                ));
            }
            nid = self.generator.next_id()?;
        }

        let volume = Arc::new(NameFile::open(
            nid,
            self.cache.clone(),
            &self.data_file_path(nid),
            self.pool.clone(),
        )?);
        info!(nid, "allocated volume");
        set.volumes.insert(nid, volume.clone());
        set.max_nid = nid;
        set.current = Some(volume.clone());
        self.counters.file_count.fetch_add(1, Ordering::Relaxed);
        Ok(volume)
    }

    fn refresh_stats(&self) {
        let data_free_mb = disk::free_space_mb(&self.config.data_dir).unwrap_or_else(|e| {
            warn!("data free-space probe failed: {e}");
            0
        });
        *self.stats.write() = NameStats {
            data_free_mb,
            counters: self.counters.snapshot_and_reset(),
        };
    }
}
