//! Timestamped transaction types and serialization.

use stakd_consensus::constants::LOCKTIME_THRESHOLD;
use stakd_consensus::money::{money_range, Amount};
use stakd_consensus::Hash256;

use crate::encoding::{self, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const CURRENT_TX_VERSION: i32 = 1;
pub const SEQUENCE_FINAL: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            prevout,
            script_sig,
            sequence: SEQUENCE_FINAL,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            prevout: OutPoint::consensus_decode(decoder)?,
            script_sig: decoder.read_var_bytes()?,
            sequence: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// The marker output: zero value, empty script. Coinstake transactions start with
    /// one and proof-of-stake coinbases consist only of them.
    pub fn empty() -> Self {
        Self {
            value: 0,
            script_pubkey: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            value: decoder.read_i64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
        })
    }
}

/// Role a transaction plays in a block. Kind-specific rules (reward minting, fee
/// accounting, standardness, input fetching) match on this instead of re-deriving
/// the shape of the transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransactionKind {
    /// Single null input; mints the proof-of-work reward.
    Coinbase,
    /// First output empty; spends stake inputs and mints the proof-of-stake reward.
    Coinstake,
    Standard,
}

impl TransactionKind {
    pub fn mints_reward(self) -> bool {
        matches!(self, TransactionKind::Coinbase | TransactionKind::Coinstake)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Coinbase => "coinbase",
            TransactionKind::Coinstake => "coinstake",
            TransactionKind::Standard => "standard",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    /// Creation timestamp; may not precede the time of any output it spends.
    pub time: u32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(time: u32, vin: Vec<TxIn>, vout: Vec<TxOut>) -> Self {
        Self {
            version: CURRENT_TX_VERSION,
            time,
            vin,
            vout,
            lock_time: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn is_coinstake(&self) -> bool {
        !self.vin.is_empty()
            && !self.vin[0].prevout.is_null()
            && self.vout.len() >= 2
            && self.vout[0].is_empty()
    }

    pub fn kind(&self) -> TransactionKind {
        if self.is_coinbase() {
            TransactionKind::Coinbase
        } else if self.is_coinstake() {
            TransactionKind::Coinstake
        } else {
            TransactionKind::Standard
        }
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encoding::encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        encoding::decode(bytes)
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    /// Sum of output values, or `None` if any value or the running total leaves the
    /// money range.
    pub fn value_out(&self) -> Option<Amount> {
        let mut total: Amount = 0;
        for output in &self.vout {
            if !money_range(output.value) {
                return None;
            }
            total = total.checked_add(output.value)?;
            if !money_range(total) {
                return None;
            }
        }
        Some(total)
    }

    pub fn is_final(&self, height: i32, block_time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let threshold = if self.lock_time < LOCKTIME_THRESHOLD {
            i64::from(height)
        } else {
            block_time
        };
        if i64::from(self.lock_time) < threshold {
            return true;
        }
        self.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_u32_le(self.time);
        encoder.write_list(&self.vin);
        encoder.write_list(&self.vout);
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            time: decoder.read_u32_le()?,
            vin: decoder.read_list()?,
            vout: decoder.read_list()?,
            lock_time: decoder.read_u32_le()?,
        })
    }
}
