//! In-memory name index.
//!
//! Names are arbitrary user strings, so keys past a fixed threshold are
//! replaced by a fixed-width digest surrogate to bound per-entry memory.
//! The same surrogate function runs on every access, which is all the
//! correctness the map needs from it.

use std::collections::HashMap;

use parking_lot::RwLock;
use sha3::{Digest, Sha3_256};

/// Names longer than this are keyed by digest instead of raw bytes.
pub const SURROGATE_THRESHOLD: usize = 50;

/// Where a live name points: its volume, its block, and the (store id,
/// store key) tuple the name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameEntry {
    pub nid: u64,
    pub store_id: u32,
    pub store_key: u64,
    pub offset: u64,
}

#[derive(Default)]
pub struct NameCache {
    blocks: RwLock<HashMap<Box<[u8]>, NameEntry>>,
}

fn cache_key(name: &[u8]) -> Box<[u8]> {
    if name.len() <= SURROGATE_THRESHOLD {
        name.into()
    } else {
        Sha3_256::digest(name).as_slice().into()
    }
}

impl NameCache {
    pub fn new() -> NameCache {
        NameCache::default()
    }

    pub fn get(&self, name: &[u8]) -> Option<NameEntry> {
        self.blocks.read().get(&cache_key(name)).copied()
    }

    pub fn set(&self, name: &[u8], entry: NameEntry) {
        self.blocks.write().insert(cache_key(name), entry);
    }

    pub fn del(&self, name: &[u8]) {
        self.blocks.write().remove(&cache_key(name));
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}
