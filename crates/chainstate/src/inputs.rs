//! Input resolution and connection against a block-scoped candidate set.

use std::collections::HashMap;

use stakd_consensus::money::{money_range, Amount};
use stakd_consensus::{ConsensusParams, Hash256};
use stakd_primitives::{OutPoint, Transaction, TransactionKind};
use stakd_script::interpreter::{verify_script, ScriptFlags};
use stakd_storage::KeyValueStore;

use crate::error::ConsensusError;
use crate::utxo::{SpentMarker, UtxoEntry, UtxoSet};

/// Read access to confirmed outputs.
pub trait UtxoView {
    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ConsensusError>;
    fn has_transaction(&self, txid: &Hash256) -> Result<bool, ConsensusError>;
}

impl<S: KeyValueStore> UtxoView for UtxoSet<S> {
    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ConsensusError> {
        Ok(self.get(outpoint)?)
    }

    fn has_transaction(&self, txid: &Hash256) -> Result<bool, ConsensusError> {
        Ok(UtxoSet::has_transaction(self, txid)?)
    }
}

/// Outputs created and spends made so far by the block being connected.
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    created: HashMap<OutPoint, UtxoEntry>,
    spent: HashMap<OutPoint, SpentMarker>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.created.insert(outpoint, entry);
    }

    pub fn spend(&mut self, outpoint: OutPoint, marker: SpentMarker) {
        self.spent.insert(outpoint, marker);
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains_key(outpoint)
    }

    pub fn created(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.created.iter()
    }

    pub fn spends(&self) -> impl Iterator<Item = (&OutPoint, &SpentMarker)> {
        self.spent.iter()
    }

    pub fn into_parts(self) -> (HashMap<OutPoint, UtxoEntry>, HashMap<OutPoint, SpentMarker>) {
        (self.created, self.spent)
    }

    /// Whether the block already created an output of `txid`.
    pub fn created_by(&self, txid: &Hash256) -> bool {
        self.created.keys().any(|outpoint| outpoint.hash == *txid)
    }
}

/// A resolved input.
#[derive(Clone, Debug)]
pub struct PrevOut {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

#[derive(Clone, Copy, Debug)]
pub struct ConnectContext<'a> {
    pub params: &'a ConsensusParams,
    /// Height the spending transaction confirms at.
    pub height: i32,
    pub flags: ScriptFlags,
    /// Skip signature checks below the last checkpoint.
    pub skip_scripts: bool,
}

/// Resolves every input of `tx`, looking in `candidate` before the confirmed view.
pub fn fetch_inputs(
    tx: &Transaction,
    candidate: &CandidateSet,
    view: &impl UtxoView,
) -> Result<Vec<PrevOut>, ConsensusError> {
    if tx.kind() == TransactionKind::Coinbase {
        return Ok(Vec::new());
    }
    let mut prevouts = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        let outpoint = &input.prevout;
        let entry = match candidate.created.get(outpoint) {
            Some(entry) => Some(entry.clone()),
            None => view.utxo(outpoint)?,
        };
        let Some(entry) = entry else {
            if candidate.created_by(&outpoint.hash) || view.has_transaction(&outpoint.hash)? {
                return Err(ConsensusError::malformed(format!(
                    "input {outpoint} out of range"
                )));
            }
            return Err(ConsensusError::missing_inputs(format!(
                "input {outpoint} not found"
            )));
        };
        prevouts.push(PrevOut {
            outpoint: outpoint.clone(),
            entry,
        });
    }
    Ok(prevouts)
}

/// Checks and spends the inputs resolved by [`fetch_inputs`]. Returns the fee; a
/// coinstake pays none.
pub fn connect_inputs(
    tx: &Transaction,
    prevouts: &[PrevOut],
    candidate: &mut CandidateSet,
    ctx: &ConnectContext<'_>,
) -> Result<Amount, ConsensusError> {
    let kind = tx.kind();
    if kind == TransactionKind::Coinbase {
        return Ok(0);
    }
    if prevouts.len() != tx.vin.len() {
        return Err(ConsensusError::internal("input count mismatch"));
    }
    let txid = tx.txid();
    let mut value_in: Amount = 0;

    for (index, prev) in prevouts.iter().enumerate() {
        let entry = &prev.entry;
        if entry.kind.mints_reward() && ctx.height - entry.height < ctx.params.coinbase_maturity {
            return Err(ConsensusError::violation(format!(
                "premature spend of {} at depth {}",
                entry.kind.as_str(),
                ctx.height - entry.height
            )));
        }
        if tx.time < entry.tx_time {
            return Err(ConsensusError::violation(
                "transaction timestamp earlier than input",
            ));
        }
        value_in = value_in
            .checked_add(entry.value)
            .filter(|total| money_range(entry.value) && money_range(*total))
            .ok_or_else(|| ConsensusError::violation("input values out of range"))?;
        if entry.is_spent() || candidate.is_spent(&prev.outpoint) {
            return Err(ConsensusError::double_spend(format!(
                "{} already spent",
                prev.outpoint
            )));
        }
        if !ctx.skip_scripts {
            let script_sig = &tx.vin[index].script_sig;
            if let Err(err) = verify_script(script_sig, &entry.script_pubkey, tx, index, ctx.flags) {
                return Err(ConsensusError::violation(format!(
                    "input {index} script failed: {err}"
                )));
            }
        }
        candidate.spend(
            prev.outpoint.clone(),
            SpentMarker {
                txid,
                height: ctx.height,
            },
        );
    }

    if kind == TransactionKind::Coinstake {
        return Ok(0);
    }
    let value_out = tx
        .value_out()
        .ok_or_else(|| ConsensusError::structural("output values out of range"))?;
    let fee = value_in - value_out;
    if fee < 0 {
        return Err(ConsensusError::violation(format!(
            "value in {value_in} below value out {value_out}"
        )));
    }
    if !money_range(fee) {
        return Err(ConsensusError::violation("fee out of range"));
    }
    Ok(fee)
}
