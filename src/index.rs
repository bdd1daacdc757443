use crate::Did;
use std::collections::{BTreeMap, BTreeSet};

/// Incremental secondary index from a key to the set of DIDs carrying it.
///
/// Backed by ordered maps so iteration order is stable, which keeps
/// discovery results deterministic across identical queries.
#[derive(Debug, Clone)]
pub struct KeyIndex<K: Ord + Clone> {
    entries: BTreeMap<K, BTreeSet<Did>>,
}

impl<K: Ord + Clone> Default for KeyIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> KeyIndex<K> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, did: &str) {
        self.entries
            .entry(key)
            .or_default()
            .insert(did.to_string());
    }

    pub fn remove(&mut self, key: &K, did: &str) {
        if let Some(set) = self.entries.get_mut(key) {
            set.remove(did);
            if set.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub fn remove_did(&mut self, did: &str) {
        self.entries.retain(|_, set| {
            set.remove(did);
            !set.is_empty()
        });
    }

    pub fn get(&self, key: &K) -> Option<&BTreeSet<Did>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K, did: &str) -> bool {
        self.entries.get(key).is_some_and(|set| set.contains(did))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn counts(&self) -> BTreeMap<K, usize> {
        self.entries
            .iter()
            .map(|(k, set)| (k.clone(), set.len()))
            .collect()
    }
}
