//! Block header and block types.

use stakd_consensus::Hash256;

use crate::encoding::{self, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{hash_pair, sha256d};
use crate::transaction::Transaction;

pub const CURRENT_VERSION: i32 = 7;
pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        encoding::encode(self)
    }

    /// Block identity and proof-of-work hash.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash(&self.prev_block);
        encoder.write_hash(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash()?,
            merkle_root: decoder.read_hash()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Signature over the block hash by the coinstake key. Empty for proof-of-work.
    pub signature: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    pub fn coinstake(&self) -> Option<&Transaction> {
        if self.is_proof_of_stake() {
            self.transactions.get(1)
        } else {
            None
        }
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encoding::encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        encoding::decode(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        Encodable::consensus_encode(&self.header, encoder);
        encoder.write_list(&self.transactions);
        encoder.write_var_bytes(&self.signature);
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            header: BlockHeader::consensus_decode(decoder)?,
            transactions: decoder.read_list()?,
            signature: decoder.read_var_bytes()?,
        })
    }
}

/// Merkle root over `leaves`, plus whether the tree was malleable: two identical
/// sibling hashes at any level mean a different transaction list yields the same
/// root (CVE-2012-2459).
pub fn merkle_root(leaves: &[Hash256]) -> (Hash256, bool) {
    if leaves.is_empty() {
        return ([0u8; 32], false);
    }
    let mut mutated = false;
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            if pair.len() == 2 && left == right {
                mutated = true;
            }
            next.push(hash_pair(left, right));
        }
        level = next;
    }
    (level[0], mutated)
}
