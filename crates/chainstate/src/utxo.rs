//! Output index backed by the storage trait.
//!
//! Spent outputs keep their entry with a spent marker until the transaction that
//! created them is disconnected.

use stakd_consensus::money::Amount;
use stakd_consensus::Hash256;
use stakd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stakd_primitives::hash::sha256;
use stakd_primitives::{OutPoint, TransactionKind};
use stakd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

/// Where the creating transaction sits in the best chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxLocation {
    pub block_hash: Hash256,
    pub height: i32,
    pub position: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentMarker {
    pub txid: Hash256,
    pub height: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub height: i32,
    pub tx_time: u32,
    pub kind: TransactionKind,
    pub location: TxLocation,
    pub spent: Option<SpentMarker>,
}

impl UtxoEntry {
    pub fn is_spent(&self) -> bool {
        self.spent.is_some()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(96 + self.script_pubkey.len());
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.tx_time);
        encoder.write_u8(kind_code(self.kind));
        encoder.write_hash(&self.location.block_hash);
        encoder.write_i32_le(self.location.height);
        encoder.write_u32_le(self.location.position);
        match &self.spent {
            Some(marker) => {
                encoder.write_bool(true);
                encoder.write_hash(&marker.txid);
                encoder.write_i32_le(marker.height);
            }
            None => encoder.write_bool(false),
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_i32_le()?;
        let tx_time = decoder.read_u32_le()?;
        let kind = kind_from_code(decoder.read_u8()?)?;
        let location = TxLocation {
            block_hash: decoder.read_hash()?,
            height: decoder.read_i32_le()?,
            position: decoder.read_u32_le()?,
        };
        let spent = if decoder.read_bool()? {
            Some(SpentMarker {
                txid: decoder.read_hash()?,
                height: decoder.read_i32_le()?,
            })
        } else {
            None
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            tx_time,
            kind,
            location,
            spent,
        })
    }
}

fn kind_code(kind: TransactionKind) -> u8 {
    match kind {
        TransactionKind::Standard => 0,
        TransactionKind::Coinbase => 1,
        TransactionKind::Coinstake => 2,
    }
}

fn kind_from_code(code: u8) -> Result<TransactionKind, DecodeError> {
    match code {
        0 => Ok(TransactionKind::Standard),
        1 => Ok(TransactionKind::Coinbase),
        2 => Ok(TransactionKind::Coinstake),
        _ => Err(DecodeError::InvalidData("unknown transaction kind")),
    }
}

/// Owner script hash followed by the outpoint key.
pub fn collateral_key(script_pubkey: &[u8], outpoint: &OutPoint) -> [u8; 32 + OutPoint::KEY_LEN] {
    let mut key = [0u8; 32 + OutPoint::KEY_LEN];
    key[..32].copy_from_slice(&sha256(script_pubkey));
    key[32..].copy_from_slice(&outpoint.key());
    key
}

pub struct UtxoSet<S> {
    store: S,
}

impl<S> UtxoSet<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UtxoSet<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        match self.store.get(Column::Utxo, &outpoint.key())? {
            Some(bytes) => Ok(Some(
                UtxoEntry::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Whether any output of `txid` is indexed, spent or not.
    pub fn has_transaction(&self, txid: &Hash256) -> Result<bool, StoreError> {
        Ok(!self.store.scan_prefix(Column::Utxo, txid)?.is_empty())
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &UtxoEntry) {
        batch.put(Column::Utxo, outpoint.key(), entry.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        batch.delete(Column::Utxo, outpoint.key());
    }

    pub fn put_collateral(&self, batch: &mut WriteBatch, script_pubkey: &[u8], outpoint: &OutPoint) {
        batch.put(
            Column::CollateralScript,
            collateral_key(script_pubkey, outpoint),
            [0u8; 0],
        );
    }

    pub fn delete_collateral(
        &self,
        batch: &mut WriteBatch,
        script_pubkey: &[u8],
        outpoint: &OutPoint,
    ) {
        batch.delete(Column::CollateralScript, collateral_key(script_pubkey, outpoint));
    }

    /// Collateral-sized outputs ever created for `script_pubkey` on the best chain.
    pub fn collateral_outpoints(&self, script_pubkey: &[u8]) -> Result<Vec<OutPoint>, StoreError> {
        let prefix = sha256(script_pubkey);
        let mut out = Vec::new();
        for (key, _) in self.store.scan_prefix(Column::CollateralScript, &prefix)? {
            let outpoint = key
                .get(32..)
                .and_then(OutPoint::from_key)
                .ok_or_else(|| StoreError::Backend("invalid collateral key".to_string()))?;
            out.push(outpoint);
        }
        Ok(out)
    }
}
