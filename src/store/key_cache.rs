//! In-memory key index.
//!
//! The authoritative lookup path for reads and the duplicate check for
//! writes; durability comes from the files, this map is rebuilt by
//! recovery on every startup.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Where a live record sits: which volume, and the block within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEntry {
    pub vid: u64,
    pub offset: u64,
    pub size: u32,
}

#[derive(Default)]
pub struct KeyCache {
    blocks: RwLock<HashMap<u64, KeyEntry>>,
}

impl KeyCache {
    pub fn new() -> KeyCache {
        KeyCache::default()
    }

    pub fn get(&self, key: u64) -> Option<KeyEntry> {
        self.blocks.read().get(&key).copied()
    }

    pub fn set(&self, key: u64, entry: KeyEntry) {
        self.blocks.write().insert(key, entry);
    }

    pub fn del(&self, key: u64) {
        self.blocks.write().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del() {
        let cache = KeyCache::new();
        assert!(cache.get(7).is_none());

        let entry = KeyEntry {
            vid: 100_000_000,
            offset: 16,
            size: 32,
        };
        cache.set(7, entry);
        assert_eq!(cache.get(7), Some(entry));

        // Re-set overwrites in place.
        let moved = KeyEntry { offset: 48, ..entry };
        cache.set(7, moved);
        assert_eq!(cache.get(7), Some(moved));
        assert_eq!(cache.len(), 1);

        cache.del(7);
        assert!(cache.get(7).is_none());
        assert!(cache.is_empty());
    }
}
