use std::{
    hash::Hash,
    path::{Path, PathBuf},
};

use ahash::AHashMap;

/// Maps live watch keys to the directory each one watches.
#[derive(Debug)]
pub struct WatchRegistry<K> {
    keys: AHashMap<K, PathBuf>,
}

impl<K> Default for WatchRegistry<K> {
    fn default() -> Self {
        Self {
            keys: AHashMap::new(),
        }
    }
}

impl<K: Eq + Hash> WatchRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the directory previously stored under `key`, if any.
    pub fn insert(&mut self, key: K, dir: PathBuf) -> Option<PathBuf> {
        self.keys.insert(key, dir)
    }

    pub fn get(&self, key: &K) -> Option<&Path> {
        self.keys.get(key).map(PathBuf::as_path)
    }

    pub fn remove(&mut self, key: &K) -> Option<PathBuf> {
        self.keys.remove(key)
    }

    pub fn contains_directory(&self, dir: &Path) -> bool {
        self.keys.values().any(|d| d == dir)
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs = self.keys.values().cloned().collect::<Vec<_>>();
        dirs.sort();
        dirs
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
