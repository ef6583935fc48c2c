//! The metadata engine (N-engine): names resolve to (store id, store
//! key) tuples held in single-file append-only volumes.

pub mod block;
pub mod data_file;
pub mod group;
pub mod name_cache;
pub mod volume;

pub use group::{NameConfig, NameCounters, NameEngine, NameStats};
pub use name_cache::{NameCache, NameEntry, SURROGATE_THRESHOLD};
