//! The payload-bearing store engine (S-engine): append-only data files
//! with sidecar indexes, multiplexed by a volume group.

pub mod block;
pub mod data_file;
pub mod group;
pub mod index_file;
pub mod key_cache;
pub mod volume;

pub use group::{
    StoreConfig, StoreCounters, StoreEngine, StoreObject, StoreStats, MAX_VOLUME_SIZE,
    VOLUME_ID_BASE,
};
pub use key_cache::{KeyCache, KeyEntry};
