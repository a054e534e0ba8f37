//! Block index arena and its persisted form.

use std::collections::HashMap;
use std::sync::Arc;

use primitive_types::U256;
use stakd_consensus::money::Amount;
use stakd_consensus::Hash256;
use stakd_pow::difficulty::TargetSample;
use stakd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stakd_primitives::Block;
use stakd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const META_BEST_BLOCK_KEY: &[u8] = b"best_block";
const META_MONEY_SUPPLY_KEY: &[u8] = b"money_supply";

pub const STATUS_HAVE_DATA: u8 = 1 << 0;
pub const STATUS_CONNECTED: u8 = 1 << 1;
pub const STATUS_FAILED: u8 = 1 << 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockIndexNode {
    pub hash: Hash256,
    pub height: i32,
    pub prev: Option<Hash256>,
    /// Successor on the best chain.
    pub next: Option<Hash256>,
    pub chain_trust: U256,
    pub proof_of_stake: bool,
    pub stake_modifier: u64,
    pub stake_modifier_checksum: u32,
    /// Header hash for proof-of-work, kernel hash for proof-of-stake.
    pub hash_proof: Hash256,
    pub money_supply: Amount,
    pub bits: u32,
    pub time: u32,
    pub status: u8,
    pub payee: Option<Vec<u8>>,
}

impl BlockIndexNode {
    pub fn has_data(&self) -> bool {
        (self.status & STATUS_HAVE_DATA) != 0
    }

    pub fn is_connected(&self) -> bool {
        (self.status & STATUS_CONNECTED) != 0
    }

    pub fn is_failed(&self) -> bool {
        (self.status & STATUS_FAILED) != 0
    }

    pub fn time(&self) -> i64 {
        i64::from(self.time)
    }

    pub fn target_sample(&self) -> TargetSample {
        TargetSample {
            height: self.height,
            time: self.time(),
            bits: self.bits,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(160);
        encoder.write_hash(&self.hash);
        encoder.write_i32_le(self.height);
        write_optional_hash(&mut encoder, self.prev.as_ref());
        write_optional_hash(&mut encoder, self.next.as_ref());
        encoder.write_bytes(&self.chain_trust.to_little_endian());
        encoder.write_bool(self.proof_of_stake);
        encoder.write_u64_le(self.stake_modifier);
        encoder.write_u32_le(self.stake_modifier_checksum);
        encoder.write_hash(&self.hash_proof);
        encoder.write_i64_le(self.money_supply);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.time);
        encoder.write_u8(self.status);
        match &self.payee {
            Some(script) => {
                encoder.write_bool(true);
                encoder.write_var_bytes(script);
            }
            None => encoder.write_bool(false),
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let node = Self {
            hash: decoder.read_hash()?,
            height: decoder.read_i32_le()?,
            prev: read_optional_hash(&mut decoder)?,
            next: read_optional_hash(&mut decoder)?,
            chain_trust: U256::from_little_endian(&decoder.read_fixed::<32>()?),
            proof_of_stake: decoder.read_bool()?,
            stake_modifier: decoder.read_u64_le()?,
            stake_modifier_checksum: decoder.read_u32_le()?,
            hash_proof: decoder.read_hash()?,
            money_supply: decoder.read_i64_le()?,
            bits: decoder.read_u32_le()?,
            time: decoder.read_u32_le()?,
            status: decoder.read_u8()?,
            payee: if decoder.read_bool()? {
                Some(decoder.read_var_bytes()?)
            } else {
                None
            },
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(node)
    }
}

fn write_optional_hash(encoder: &mut Encoder, hash: Option<&Hash256>) {
    match hash {
        Some(hash) => {
            encoder.write_bool(true);
            encoder.write_hash(hash);
        }
        None => encoder.write_bool(false),
    }
}

fn read_optional_hash(decoder: &mut Decoder) -> Result<Option<Hash256>, DecodeError> {
    if decoder.read_bool()? {
        Ok(Some(decoder.read_hash()?))
    } else {
        Ok(None)
    }
}

/// Every block ever accepted, keyed by hash. Nodes are never removed.
#[derive(Clone, Debug, Default)]
pub struct BlockArena {
    nodes: HashMap<Hash256, BlockIndexNode>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockIndexNode> {
        self.nodes.get(hash)
    }

    pub fn get_mut(&mut self, hash: &Hash256) -> Option<&mut BlockIndexNode> {
        self.nodes.get_mut(hash)
    }

    pub fn insert(&mut self, node: BlockIndexNode) {
        self.nodes.insert(node.hash, node);
    }

    pub fn parent(&self, node: &BlockIndexNode) -> Option<&BlockIndexNode> {
        node.prev.as_ref().and_then(|prev| self.nodes.get(prev))
    }

    /// Ancestor of `hash` at `height`, following parent links.
    pub fn ancestor(&self, hash: &Hash256, height: i32) -> Option<&BlockIndexNode> {
        let mut node = self.nodes.get(hash)?;
        if height > node.height || height < 0 {
            return None;
        }
        while node.height > height {
            node = self.parent(node)?;
        }
        Some(node)
    }

    /// Last common ancestor of two nodes.
    pub fn fork_point(&self, a: &Hash256, b: &Hash256) -> Option<Hash256> {
        let mut left = self.nodes.get(a)?;
        let mut right = self.nodes.get(b)?;
        while left.height > right.height {
            left = self.parent(left)?;
        }
        while right.height > left.height {
            right = self.parent(right)?;
        }
        while left.hash != right.hash {
            left = self.parent(left)?;
            right = self.parent(right)?;
        }
        Some(left.hash)
    }

    /// Median timestamp of `hash` and up to `span - 1` of its ancestors.
    pub fn median_time_past(&self, hash: &Hash256, span: usize) -> i64 {
        let mut times = Vec::with_capacity(span);
        let mut cursor = self.nodes.get(hash);
        while let Some(node) = cursor {
            if times.len() == span {
                break;
            }
            times.push(node.time());
            cursor = self.parent(node);
        }
        if times.is_empty() {
            return 0;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// The two most recent non-genesis blocks of one proof type at or below `hash`.
    pub fn last_two_of_kind(
        &self,
        hash: &Hash256,
        proof_of_stake: bool,
    ) -> (Option<TargetSample>, Option<TargetSample>) {
        let mut found = Vec::with_capacity(2);
        let mut cursor = self.nodes.get(hash);
        while let Some(node) = cursor {
            if found.len() == 2 || node.prev.is_none() {
                break;
            }
            if node.proof_of_stake == proof_of_stake {
                found.push(node.target_sample());
            }
            cursor = self.parent(node);
        }
        let mut found = found.into_iter();
        (found.next(), found.next())
    }
}

/// Store-side view of the index: nodes, the height map, blocks and the tip pointer.
pub struct ChainIndex<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> ChainIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn put_node(&self, batch: &mut WriteBatch, node: &BlockIndexNode) {
        batch.put(Column::BlockIndex, node.hash, node.encode());
    }

    pub fn load_nodes(&self) -> Result<Vec<BlockIndexNode>, StoreError> {
        let entries = self.store.scan_prefix(Column::BlockIndex, &[])?;
        let mut out = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            out.push(
                BlockIndexNode::decode(&value).map_err(|err| StoreError::Backend(err.to_string()))?,
            );
        }
        Ok(out)
    }

    pub fn put_block(&self, batch: &mut WriteBatch, hash: &Hash256, block: &Block) {
        batch.put(Column::Block, hash, block.consensus_encode());
    }

    pub fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        match self.store.get(Column::Block, hash)? {
            Some(bytes) => Block::consensus_decode(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Backend(err.to_string())),
            None => Ok(None),
        }
    }

    pub fn set_best_block(&self, batch: &mut WriteBatch, hash: &Hash256) {
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, hash);
    }

    pub fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        match self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) => decode_hash(&bytes).map(Some).map_err(StoreError::Backend),
            None => Ok(None),
        }
    }

    pub fn set_money_supply(&self, batch: &mut WriteBatch, supply: Amount) {
        batch.put(Column::Meta, META_MONEY_SUPPLY_KEY, supply.to_le_bytes());
    }

    pub fn height_hash(&self, height: i32) -> Result<Option<Hash256>, StoreError> {
        match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => decode_hash(&bytes).map(Some).map_err(StoreError::Backend),
            None => Ok(None),
        }
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: i32, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), hash);
    }

    pub fn clear_height_hash(&self, batch: &mut WriteBatch, height: i32) {
        batch.delete(Column::HeightIndex, height_key(height));
    }
}

/// Big-endian so a prefix scan walks heights in order.
pub fn height_key(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, String> {
    if bytes.len() != 32 {
        return Err("invalid hash length".to_string());
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(hash)
}
