//! Transaction outpoint type.

use std::fmt;

use stakd_consensus::params::hash256_to_hex;
use stakd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Reference to output `index` of transaction `hash`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub const KEY_LEN: usize = 36;

    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }

    /// Storage key: txid followed by the big-endian index, so outputs of one
    /// transaction sort together and in order.
    pub fn key(&self) -> [u8; Self::KEY_LEN] {
        let mut key = [0u8; Self::KEY_LEN];
        key[..32].copy_from_slice(&self.hash);
        key[32..].copy_from_slice(&self.index.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != Self::KEY_LEN {
            return None;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&key[..32]);
        let index = u32::from_be_bytes([key[32], key[33], key[34], key[35]]);
        Some(Self { hash, index })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash256_to_hex(&self.hash), self.index)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}
