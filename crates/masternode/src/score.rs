//! Deterministic masternode scores and the memoized rank table.

use std::collections::HashMap;

use primitive_types::U256;
use stakd_consensus::Hash256;
use stakd_primitives::hash::sha256d;
use stakd_primitives::OutPoint;

use crate::ChainView;

fn score_hash(value: &Hash256) -> U256 {
    U256::from_little_endian(&sha256d(value))
}

/// Score of `collateral` against `block_hash`:
/// `|h(H) - h(H xor (outpoint.hash + outpoint.index))|`.
pub fn score_for_hash(collateral: &OutPoint, block_hash: &Hash256) -> U256 {
    let (aux, _) = U256::from_little_endian(&collateral.hash)
        .overflowing_add(U256::from(collateral.index));
    let mixed = (U256::from_little_endian(block_hash) ^ aux).to_little_endian();
    let base = score_hash(block_hash);
    let other = score_hash(&mixed);
    if base >= other {
        base - other
    } else {
        other - base
    }
}

/// Score of `collateral` at `height`, or `None` when no block exists there yet.
pub fn calculate_score(
    collateral: &OutPoint,
    height: i32,
    chain: &impl ChainView,
) -> Option<U256> {
    chain
        .block_hash(height)
        .map(|hash| score_for_hash(collateral, &hash))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RankEntry {
    pub collateral: OutPoint,
    /// 1 is the best rank.
    pub rank: usize,
    pub score: U256,
    pub payments_in_window: usize,
}

/// Memoized block hashes, scores, payment windows and rank lists.
///
/// Kept apart from the records so ranking never mutates them. Everything is dropped
/// when the tip height or the number of active records changes; a reorg at a fixed
/// height goes through [`RankTable::invalidate_height`].
#[derive(Debug, Default)]
pub struct RankTable {
    tip_height: Option<i32>,
    list_size: usize,
    block_hashes: HashMap<i32, Hash256>,
    scores: HashMap<(i32, OutPoint), U256>,
    /// Payments per payee script over the window before each pay height.
    windows: HashMap<i32, HashMap<Vec<u8>, usize>>,
    ranks: HashMap<i32, Vec<RankEntry>>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self, tip_height: i32, list_size: usize) {
        if self.tip_height != Some(tip_height) || self.list_size != list_size {
            self.clear();
            self.tip_height = Some(tip_height);
            self.list_size = list_size;
        }
    }

    pub fn clear(&mut self) {
        self.tip_height = None;
        self.block_hashes.clear();
        self.scores.clear();
        self.windows.clear();
        self.ranks.clear();
    }

    /// Forgets everything derived from the block at `height` or above.
    pub fn invalidate_height(&mut self, height: i32) {
        self.block_hashes.retain(|cached, _| *cached < height);
        self.scores.retain(|(cached, _), _| *cached < height);
        self.windows.retain(|pay_height, _| *pay_height <= height);
        self.ranks.clear();
    }

    pub fn block_hash(&mut self, height: i32, chain: &impl ChainView) -> Option<Hash256> {
        if let Some(hash) = self.block_hashes.get(&height) {
            return Some(*hash);
        }
        let hash = chain.block_hash(height)?;
        self.block_hashes.insert(height, hash);
        Some(hash)
    }

    pub fn score(
        &mut self,
        collateral: &OutPoint,
        height: i32,
        chain: &impl ChainView,
    ) -> Option<U256> {
        let key = (height, collateral.clone());
        if let Some(score) = self.scores.get(&key) {
            return Some(*score);
        }
        let hash = self.block_hash(height, chain)?;
        let score = score_for_hash(collateral, &hash);
        self.scores.insert(key, score);
        Some(score)
    }

    /// Payments to `script` in the `window` blocks before `pay_height`. The whole
    /// window is scanned once per pay height and tip.
    pub fn payment_count(
        &mut self,
        pay_height: i32,
        window: usize,
        script: &[u8],
        chain: &impl ChainView,
    ) -> usize {
        self.windows
            .entry(pay_height)
            .or_insert_with(|| scan_window(pay_height, window, chain))
            .get(script)
            .copied()
            .unwrap_or(0)
    }

    pub fn cached_ranks(&self, height: i32) -> Option<&[RankEntry]> {
        self.ranks.get(&height).map(Vec::as_slice)
    }

    pub fn store_ranks(&mut self, height: i32, entries: Vec<RankEntry>) {
        self.ranks.insert(height, entries);
    }
}

fn scan_window(pay_height: i32, window: usize, chain: &impl ChainView) -> HashMap<Vec<u8>, usize> {
    let window = i32::try_from(window).unwrap_or(i32::MAX);
    let last = (pay_height - 1).min(chain.tip_height());
    let first = pay_height.saturating_sub(window).max(0);
    let mut counts = HashMap::new();
    for height in first..=last {
        if let Some(payee) = chain.payee_at(height) {
            *counts.entry(payee).or_insert(0) += 1;
        }
    }
    counts
}
