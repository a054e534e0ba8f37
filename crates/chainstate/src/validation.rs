//! Context-free block and transaction checks.

use std::collections::HashSet;

use stakd_consensus::constants::{
    MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_COINBASE_SCRIPT_SIZE, MIN_COINBASE_SCRIPT_SIZE,
};
use stakd_consensus::money::{money_range, Amount};
use stakd_consensus::{ConsensusParams, Hash256};
use stakd_pow::validation::check_proof_of_work;
use stakd_primitives::block::merkle_root;
use stakd_primitives::hash::hash160;
use stakd_primitives::{Block, Transaction, TransactionKind};
use stakd_script::message::{recover_signed_message_pubkey, verify_hash_signature};
use stakd_script::standard::{legacy_sigop_count, p2pk_pubkey, p2pkh_hash};

use crate::error::ConsensusError;

/// Structural checks on a transaction in isolation.
pub fn check_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if tx.vin.is_empty() {
        return Err(ConsensusError::structural("transaction has no inputs"));
    }
    if tx.vout.is_empty() {
        return Err(ConsensusError::structural("transaction has no outputs"));
    }
    if tx.serialized_size() > MAX_BLOCK_SIZE as usize {
        return Err(ConsensusError::structural("transaction too large"));
    }

    let kind = tx.kind();
    let mut total: Amount = 0;
    for output in &tx.vout {
        if output.is_empty() && !kind.mints_reward() {
            return Err(ConsensusError::structural(
                "empty output in user transaction",
            ));
        }
        if output.value < 0 {
            return Err(ConsensusError::structural("output value negative"));
        }
        if !money_range(output.value) {
            return Err(ConsensusError::structural("output value too high"));
        }
        total = total
            .checked_add(output.value)
            .filter(|total| money_range(*total))
            .ok_or_else(|| ConsensusError::structural("total output value out of range"))?;
    }

    let mut seen = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen.insert(&input.prevout) {
            return Err(ConsensusError::structural("duplicate input"));
        }
    }

    match kind {
        TransactionKind::Coinbase => {
            let len = tx.vin[0].script_sig.len();
            if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
                return Err(ConsensusError::structural("coinbase script size"));
            }
        }
        TransactionKind::Coinstake | TransactionKind::Standard => {
            if tx.vin.iter().any(|input| input.prevout.is_null()) {
                return Err(ConsensusError::structural("null prevout"));
            }
        }
    }
    Ok(())
}

/// Legacy sig-op count of every script in the transaction.
pub fn legacy_sigops(tx: &Transaction) -> u32 {
    let inputs: u32 = tx
        .vin
        .iter()
        .map(|input| legacy_sigop_count(&input.script_sig, false))
        .sum();
    let outputs: u32 = tx
        .vout
        .iter()
        .map(|output| legacy_sigop_count(&output.script_pubkey, false))
        .sum();
    inputs + outputs
}

/// Structural checks on a block. Returns its transaction ids.
///
/// The merkle commitment is checked first so that every later failure is a property
/// of the block hash. Failures in data the hash does not cover (the commitment itself,
/// the serialized size and the block signature) are flagged as possible corruption.
pub fn check_block(
    block: &Block,
    params: &ConsensusParams,
    now: i64,
) -> Result<Vec<Hash256>, ConsensusError> {
    if block.transactions.is_empty() {
        return Err(ConsensusError::structural(
            "block must contain at least one transaction",
        )
        .corruption_possible());
    }
    let txids = block.txids();
    let (root, mutated) = merkle_root(&txids);
    if mutated {
        return Err(ConsensusError::structural("merkle tree mutated").corruption_possible());
    }
    if root != block.header.merkle_root {
        return Err(ConsensusError::structural("merkle root mismatch").corruption_possible());
    }
    if block.serialized_size() > MAX_BLOCK_SIZE as usize {
        return Err(ConsensusError::structural("block size too large").corruption_possible());
    }

    let block_time = i64::from(block.header.time);
    if block_time > now + params.max_clock_drift {
        return Err(ConsensusError::policy("block timestamp too far in the future"));
    }

    let coinbase = &block.transactions[0];
    if !coinbase.is_coinbase() {
        return Err(ConsensusError::structural("first transaction is not coinbase"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(ConsensusError::structural("more than one coinbase"));
    }
    if i64::from(coinbase.time) > block_time + params.max_clock_drift {
        return Err(ConsensusError::structural("coinbase timestamp too late"));
    }

    if block.is_proof_of_stake() {
        check_stake_shape(block)?;
        check_block_signature(block).map_err(ConsensusError::corruption_possible)?;
    } else {
        check_proof_of_work(&block.hash(), block.header.bits, params)?;
        if block.transactions[1..].iter().any(Transaction::is_coinstake) {
            return Err(ConsensusError::structural("coinstake in proof-of-work block"));
        }
    }

    for tx in &block.transactions {
        check_transaction(tx)?;
    }

    let mut seen = HashSet::with_capacity(txids.len());
    if !txids.iter().all(|txid| seen.insert(*txid)) {
        return Err(ConsensusError::structural("duplicate transaction"));
    }

    let sigops: u32 = block.transactions.iter().map(legacy_sigops).sum();
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(ConsensusError::structural("block sigops limit exceeded"));
    }
    Ok(txids)
}

fn check_stake_shape(block: &Block) -> Result<(), ConsensusError> {
    let coinbase = &block.transactions[0];
    if coinbase.vout.iter().any(|output| !output.is_empty()) {
        return Err(ConsensusError::structural(
            "coinbase output not empty in proof-of-stake block",
        ));
    }
    if block.transactions[2..].iter().any(Transaction::is_coinstake) {
        return Err(ConsensusError::structural("more than one coinstake"));
    }
    let coinstake = &block.transactions[1];
    if coinstake.time != block.header.time {
        return Err(ConsensusError::structural(
            "coinstake timestamp differs from block",
        ));
    }
    Ok(())
}

/// The coinstake's second output key must sign the block hash: a DER signature for
/// pay-to-pubkey, a recoverable signed message for pay-to-pubkey-hash.
pub fn check_block_signature(block: &Block) -> Result<(), ConsensusError> {
    let Some(coinstake) = block.coinstake() else {
        if block.signature.is_empty() {
            return Ok(());
        }
        return Err(ConsensusError::structural(
            "signature on proof-of-work block",
        ));
    };
    if block.signature.is_empty() {
        return Err(ConsensusError::structural("missing block signature"));
    }
    let hash = block.hash();
    let script = &coinstake.vout[1].script_pubkey;
    if let Some(pubkey) = p2pk_pubkey(script) {
        return verify_hash_signature(pubkey, &block.signature, &hash)
            .map_err(|err| ConsensusError::structural(format!("bad block signature: {err}")));
    }
    if let Some(expected) = p2pkh_hash(script) {
        let pubkey = recover_signed_message_pubkey(&block.signature, &hash)
            .map_err(|err| ConsensusError::structural(format!("bad block signature: {err}")))?;
        if hash160(&pubkey) == expected {
            return Ok(());
        }
        return Err(ConsensusError::structural("block signed by wrong key"));
    }
    Err(ConsensusError::structural(
        "coinstake output cannot sign blocks",
    ))
}
