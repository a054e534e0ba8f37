//! Bounded pool of items waiting on unknown parents.

use std::collections::HashMap;

use rand::seq::IteratorRandom;
use stakd_consensus::Hash256;

struct Orphan<T> {
    item: T,
    size: usize,
    parents: Vec<Hash256>,
}

/// Orphans keyed by hash and indexed by the parents they wait on. Past either cap a
/// random orphan is dropped.
pub struct OrphanPool<T> {
    entries: HashMap<Hash256, Orphan<T>>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    bytes: usize,
    max_count: usize,
    max_bytes: usize,
}

impl<T> OrphanPool<T> {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_parent: HashMap::new(),
            bytes: 0,
            max_count,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    /// Stores `item` and returns the hashes evicted to make room. Items larger than
    /// the byte cap are refused and reported as evicted.
    pub fn insert(&mut self, hash: Hash256, item: T, size: usize, parents: Vec<Hash256>) -> Vec<Hash256> {
        if self.max_count == 0 || size > self.max_bytes {
            return vec![hash];
        }
        self.remove(&hash);
        let mut evicted = Vec::new();
        let mut rng = rand::thread_rng();
        while self.entries.len() >= self.max_count || self.bytes + size > self.max_bytes {
            let Some(victim) = self.entries.keys().choose(&mut rng).copied() else {
                break;
            };
            self.remove(&victim);
            evicted.push(victim);
        }
        for parent in &parents {
            let waiting = self.by_parent.entry(*parent).or_default();
            if !waiting.contains(&hash) {
                waiting.push(hash);
            }
        }
        self.bytes += size;
        self.entries.insert(
            hash,
            Orphan {
                item,
                size,
                parents,
            },
        );
        evicted
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<T> {
        let orphan = self.entries.remove(hash)?;
        self.bytes -= orphan.size;
        for parent in &orphan.parents {
            let now_empty = match self.by_parent.get_mut(parent) {
                Some(waiting) => {
                    waiting.retain(|child| child != hash);
                    waiting.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.by_parent.remove(parent);
            }
        }
        Some(orphan.item)
    }

    /// Removes and returns every orphan waiting on `parent`.
    pub fn take_children(&mut self, parent: &Hash256) -> Vec<(Hash256, T)> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|hash| self.remove(&hash).map(|item| (hash, item)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_cap_evicts_one_orphan() {
        let mut pool = OrphanPool::new(3, 1_000);
        for tag in 1..=3u8 {
            assert!(pool.insert([tag; 32], tag, 10, vec![[0xaa; 32]]).is_empty());
        }
        let evicted = pool.insert([4; 32], 4, 10, vec![[0xbb; 32]]);
        assert_eq!(evicted.len(), 1);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.bytes(), 30);
        assert!(pool.contains(&[4; 32]));
        assert!(!pool.contains(&evicted[0]));
    }

    #[test]
    fn byte_cap_is_enforced() {
        let mut pool = OrphanPool::new(100, 25);
        pool.insert([1; 32], (), 10, Vec::new());
        pool.insert([2; 32], (), 10, Vec::new());
        let evicted = pool.insert([3; 32], (), 10, Vec::new());
        assert_eq!(evicted.len(), 1);
        assert!(pool.bytes() <= 25);
        assert_eq!(pool.insert([4; 32], (), 26, Vec::new()), vec![[4; 32]]);
        assert!(!pool.contains(&[4; 32]));
    }

    #[test]
    fn children_are_released_with_their_parent() {
        let mut pool = OrphanPool::new(10, 1_000);
        pool.insert([1; 32], "a", 5, vec![[0xaa; 32], [0xbb; 32]]);
        pool.insert([2; 32], "b", 5, vec![[0xaa; 32]]);
        pool.insert([3; 32], "c", 5, vec![[0xcc; 32]]);

        let mut released = pool.take_children(&[0xaa; 32]);
        released.sort_by_key(|(hash, _)| *hash);
        assert_eq!(released, vec![([1; 32], "a"), ([2; 32], "b")]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.bytes(), 5);
        assert!(pool.take_children(&[0xbb; 32]).is_empty());
    }
}
