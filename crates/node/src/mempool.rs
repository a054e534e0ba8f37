//! Transaction memory pool.
//!
//! Admission validates against the confirmed output set only: a transaction whose
//! inputs are created by another pool transaction is held as an orphan until its
//! parent confirms.

use std::collections::HashMap;

use stakd_chainstate::inputs::{connect_inputs, fetch_inputs, CandidateSet, ConnectContext};
use stakd_chainstate::state::ChainState;
use stakd_chainstate::validation::check_transaction;
use stakd_chainstate::{ConsensusError, ErrorKind, UtxoView};
use stakd_consensus::constants::{
    DEFAULT_BLOCK_PRIORITY_SIZE, MAX_BLOCK_SIZE_GEN, MAX_STANDARD_TX_SIZE,
};
use stakd_consensus::money::{money_range, Amount, MAX_MONEY, MIN_RELAY_TX_FEE, MIN_TX_FEE};
use stakd_consensus::params::hash256_to_hex;
use stakd_consensus::Hash256;
use stakd_log::{log_debug, log_trace};
use stakd_primitives::{Block, OutPoint, Transaction, TransactionKind};
use stakd_script::interpreter::{BLOCK_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS};
use stakd_script::standard::{is_standard_script_pubkey, is_standard_script_sig};
use stakd_storage::KeyValueStore;

use crate::orphans::OrphanPool;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    AlreadyInChain,
    ConflictingInput,
    InsufficientFee,
    MissingInput,
    NonStandard,
    InvalidTransaction,
    Internal,
}

impl MempoolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MempoolErrorKind::AlreadyInMempool => "already-in-mempool",
            MempoolErrorKind::AlreadyInChain => "already-in-chain",
            MempoolErrorKind::ConflictingInput => "conflicting-input",
            MempoolErrorKind::InsufficientFee => "insufficient-fee",
            MempoolErrorKind::MissingInput => "missing-inputs",
            MempoolErrorKind::NonStandard => "non-standard",
            MempoolErrorKind::InvalidTransaction => "invalid",
            MempoolErrorKind::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
    pub missing_inputs: Vec<OutPoint>,
    pub penalty: u32,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            missing_inputs: Vec::new(),
            penalty: 0,
        }
    }

    pub fn missing_inputs(missing_inputs: Vec<OutPoint>) -> Self {
        Self {
            kind: MempoolErrorKind::MissingInput,
            message: "missing inputs".to_string(),
            missing_inputs,
            penalty: 0,
        }
    }

    pub fn is_policy(&self) -> bool {
        matches!(
            self.kind,
            MempoolErrorKind::InsufficientFee | MempoolErrorKind::NonStandard
        )
    }
}

impl From<ConsensusError> for MempoolError {
    fn from(err: ConsensusError) -> Self {
        let kind = match err.kind {
            ErrorKind::MissingInputs => MempoolErrorKind::MissingInput,
            ErrorKind::Policy => MempoolErrorKind::NonStandard,
            ErrorKind::Internal => MempoolErrorKind::Internal,
            ErrorKind::Structural
            | ErrorKind::ConsensusViolation
            | ErrorKind::DoubleSpend
            | ErrorKind::Malformed => MempoolErrorKind::InvalidTransaction,
        };
        Self {
            kind,
            message: err.reason.into_owned(),
            missing_inputs: Vec::new(),
            penalty: err.penalty,
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for MempoolError {}

pub const DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE: u64 = 15;
pub const DEFAULT_MAX_ORPHAN_TRANSACTIONS: usize = 10_000;
pub const DEFAULT_MAX_ORPHAN_BYTES: usize = 5 * 1024 * 1024;
/// Orphans larger than this are not kept.
const MAX_ORPHAN_TX_SIZE: usize = 5_000;

#[derive(Clone, Debug)]
pub struct MempoolPolicy {
    pub require_standard: bool,
    /// Fee per 1000 bytes below which a transaction is rate limited as free.
    pub min_relay_fee_per_kb: Amount,
    /// Thousands of bytes per minute.
    pub limit_free_relay_kb_per_minute: u64,
    pub max_orphans: usize,
    pub max_orphan_bytes: usize,
}

impl MempoolPolicy {
    pub fn standard(require_standard: bool) -> Self {
        Self {
            require_standard,
            min_relay_fee_per_kb: MIN_RELAY_TX_FEE,
            limit_free_relay_kb_per_minute: DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE,
            max_orphans: DEFAULT_MAX_ORPHAN_TRANSACTIONS,
            max_orphan_bytes: DEFAULT_MAX_ORPHAN_BYTES,
        }
    }

    pub fn min_relay_fee_for_size(&self, size: usize) -> Amount {
        min_relay_fee_for_size(self.min_relay_fee_per_kb, size)
    }
}

/// Minimum fee for a transaction of `size` bytes joining a block already holding
/// `block_size` bytes.
pub fn min_fee(size: usize, block_size: usize) -> Amount {
    let mut fee = (1 + (size / 1000) as Amount) * MIN_TX_FEE;
    let new_block_size = block_size.saturating_add(size);
    if size < 1000 && new_block_size < DEFAULT_BLOCK_PRIORITY_SIZE as usize {
        fee = 0;
    }
    let generated = MAX_BLOCK_SIZE_GEN as usize;
    if new_block_size >= generated / 2 {
        if new_block_size >= generated {
            return MAX_MONEY;
        }
        fee = fee.saturating_mul((generated / (generated - new_block_size)) as Amount);
    }
    if !money_range(fee) {
        return MAX_MONEY;
    }
    fee
}

fn min_relay_fee_for_size(fee_per_kb: Amount, size: usize) -> Amount {
    let fee = fee_per_kb.saturating_mul(size as Amount) / 1000;
    if fee == 0 && fee_per_kb > 0 {
        return fee_per_kb;
    }
    fee
}

/// Exponentially decaying byte counter for free transactions.
#[derive(Debug, Default)]
pub struct FreeRelayLimiter {
    count: f64,
    last_time: i64,
}

impl FreeRelayLimiter {
    /// Admits `size` bytes at `now` unless the decayed count is over the limit.
    pub fn allow(&mut self, limit_kb_per_minute: u64, size: usize, now: i64) -> bool {
        let threshold = (limit_kb_per_minute as f64) * 10.0 * 1000.0;
        let delta = now.saturating_sub(self.last_time).max(0);
        self.count *= (1.0_f64 - 1.0_f64 / 600.0_f64).powf(delta as f64);
        self.last_time = now;
        if self.count >= threshold {
            return false;
        }
        self.count += size as f64;
        true
    }
}

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub size: usize,
    pub fee: Amount,
    /// Value-weighted input depth per byte at entry.
    pub priority: f64,
    pub time: i64,
    pub spent_outpoints: Vec<OutPoint>,
}

#[derive(Clone, Debug, Default)]
pub struct MempoolAcceptOutcome {
    pub txid: Hash256,
    pub fee: Amount,
    /// Orphans admitted after this transaction.
    pub accepted_orphans: Vec<Hash256>,
}

/// Result of removing a connected block's transactions.
#[derive(Clone, Debug, Default)]
pub struct BlockRemoval {
    pub confirmed: Vec<Hash256>,
    /// Pool transactions that spent an input the block also spent, and their
    /// descendants.
    pub conflicted: Vec<Transaction>,
}

#[derive(Clone, Debug)]
struct OrphanTx {
    tx: Transaction,
    limit_free: bool,
}

pub struct Mempool {
    policy: MempoolPolicy,
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    orphans: OrphanPool<OrphanTx>,
    limiter: FreeRelayLimiter,
    total_bytes: usize,
}

impl Mempool {
    pub fn new(policy: MempoolPolicy) -> Self {
        Self {
            orphans: OrphanPool::new(policy.max_orphans, policy.max_orphan_bytes),
            policy,
            entries: HashMap::new(),
            spent: HashMap::new(),
            limiter: FreeRelayLimiter::default(),
            total_bytes: 0,
        }
    }

    pub fn policy(&self) -> &MempoolPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        let mut out: Vec<_> = self.entries.keys().copied().collect();
        out.sort();
        out
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn has_orphan(&self, txid: &Hash256) -> bool {
        self.orphans.contains(txid)
    }

    /// Validates `tx` against the confirmed chain and adds it to the pool. With
    /// `limit_free`, the minimum fee and the free relay limiter apply.
    pub fn accept<S: KeyValueStore>(
        &mut self,
        chain: &ChainState<S>,
        tx: Transaction,
        limit_free: bool,
        now: i64,
    ) -> Result<MempoolAcceptOutcome, MempoolError> {
        let txid = tx.txid();
        let entry = match self.build_entry(chain, &tx, txid, limit_free, now) {
            Ok(entry) => entry,
            Err(err) => {
                if err.kind == MempoolErrorKind::MissingInput {
                    self.store_orphan(txid, tx, &err.missing_inputs, limit_free);
                }
                return Err(err);
            }
        };
        let fee = entry.fee;
        self.insert(entry);
        log_debug!(
            "accepted {} to mempool, fee {fee}, pool size {}",
            hash256_to_hex(&txid),
            self.entries.len()
        );
        let accepted_orphans = self.process_orphans(chain, &[txid], now);
        Ok(MempoolAcceptOutcome {
            txid,
            fee,
            accepted_orphans,
        })
    }

    fn build_entry<S: KeyValueStore>(
        &mut self,
        chain: &ChainState<S>,
        tx: &Transaction,
        txid: Hash256,
        limit_free: bool,
        now: i64,
    ) -> Result<MempoolEntry, MempoolError> {
        let params = chain.params();
        let next_height = chain.best_height() + 1;

        if tx.kind() != TransactionKind::Standard {
            return Err(MempoolError {
                penalty: 100,
                ..MempoolError::new(
                    MempoolErrorKind::InvalidTransaction,
                    format!("{} as loose transaction", tx.kind().as_str()),
                )
            });
        }
        check_transaction(tx)?;

        let size = tx.serialized_size();
        if params.require_standard {
            if size > MAX_STANDARD_TX_SIZE as usize {
                return Err(MempoolError::new(MempoolErrorKind::NonStandard, "tx-size"));
            }
            if tx.vout.iter().any(|output| !is_standard_script_pubkey(&output.script_pubkey)) {
                return Err(MempoolError::new(MempoolErrorKind::NonStandard, "scriptpubkey"));
            }
            if tx.vin.iter().any(|input| !is_standard_script_sig(&input.script_sig)) {
                return Err(MempoolError::new(MempoolErrorKind::NonStandard, "scriptsig"));
            }
        }
        if !tx.is_final(next_height, now) {
            return Err(MempoolError::new(MempoolErrorKind::NonStandard, "non-final"));
        }

        if self.entries.contains_key(&txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "transaction already in mempool",
            ));
        }
        if chain.has_transaction(&txid)? {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInChain,
                "transaction already in chain",
            ));
        }
        for input in &tx.vin {
            if let Some(conflict) = self.spent.get(&input.prevout) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "input {} already spent by {}",
                        input.prevout,
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }

        let mut missing = Vec::new();
        for input in &tx.vin {
            if chain.utxo(&input.prevout)?.is_none() && !chain.has_transaction(&input.prevout.hash)? {
                missing.push(input.prevout.clone());
            }
        }
        if !missing.is_empty() {
            return Err(MempoolError::missing_inputs(missing));
        }
        let prevouts = fetch_inputs(tx, &CandidateSet::new(), chain)?;

        let value_in: Amount = prevouts.iter().map(|prev| prev.entry.value).sum();
        let value_out = tx.value_out().ok_or_else(|| {
            MempoolError::new(MempoolErrorKind::InvalidTransaction, "value out of range")
        })?;
        if value_in < value_out {
            return Err(MempoolError::new(
                MempoolErrorKind::InvalidTransaction,
                format!("value in {value_in} below value out {value_out}"),
            ));
        }
        let fee = value_in - value_out;

        if limit_free {
            let required = min_fee(size, self.total_bytes);
            if fee < required {
                return Err(MempoolError::new(
                    MempoolErrorKind::InsufficientFee,
                    format!("fee {fee} below minimum {required}"),
                ));
            }
            if fee < self.policy.min_relay_fee_for_size(size)
                && !self
                    .limiter
                    .allow(self.policy.limit_free_relay_kb_per_minute, size, now)
            {
                return Err(MempoolError::new(
                    MempoolErrorKind::InsufficientFee,
                    "rate limited free transaction",
                ));
            }
        }

        let flags = if params.require_standard {
            STANDARD_SCRIPT_VERIFY_FLAGS
        } else {
            BLOCK_SCRIPT_VERIFY_FLAGS
        };
        let ctx = ConnectContext {
            params: &params.consensus,
            height: next_height,
            flags,
            skip_scripts: false,
        };
        connect_inputs(tx, &prevouts, &mut CandidateSet::new(), &ctx)?;

        let weighted: f64 = prevouts
            .iter()
            .map(|prev| prev.entry.value as f64 * f64::from(next_height - prev.entry.height))
            .sum();
        Ok(MempoolEntry {
            txid,
            tx: tx.clone(),
            size,
            fee,
            priority: weighted / size.max(1) as f64,
            time: now,
            spent_outpoints: tx.vin.iter().map(|input| input.prevout.clone()).collect(),
        })
    }

    fn insert(&mut self, entry: MempoolEntry) {
        for outpoint in &entry.spent_outpoints {
            self.spent.insert(outpoint.clone(), entry.txid);
        }
        self.total_bytes += entry.size;
        self.entries.insert(entry.txid, entry);
    }

    fn store_orphan(&mut self, txid: Hash256, tx: Transaction, missing: &[OutPoint], limit_free: bool) {
        let size = tx.serialized_size();
        if size > MAX_ORPHAN_TX_SIZE {
            log_debug!("ignoring large orphan {}", hash256_to_hex(&txid));
            return;
        }
        let mut parents: Vec<Hash256> = missing.iter().map(|outpoint| outpoint.hash).collect();
        parents.sort();
        parents.dedup();
        let evicted = self
            .orphans
            .insert(txid, OrphanTx { tx, limit_free }, size, parents);
        if !evicted.is_empty() {
            log_debug!("orphan pool full, evicted {} transactions", evicted.len());
        }
    }

    /// Retries orphans waiting on any of `parents`, recursively. Returns the ones
    /// admitted.
    pub fn process_orphans<S: KeyValueStore>(
        &mut self,
        chain: &ChainState<S>,
        parents: &[Hash256],
        now: i64,
    ) -> Vec<Hash256> {
        let mut queue: Vec<Hash256> = parents.to_vec();
        let mut accepted = Vec::new();
        while let Some(parent) = queue.pop() {
            for (txid, orphan) in self.orphans.take_children(&parent) {
                match self.build_entry(chain, &orphan.tx, txid, orphan.limit_free, now) {
                    Ok(entry) => {
                        self.insert(entry);
                        accepted.push(txid);
                        queue.push(txid);
                    }
                    Err(err) if err.kind == MempoolErrorKind::MissingInput => {
                        self.store_orphan(txid, orphan.tx, &err.missing_inputs, orphan.limit_free);
                    }
                    Err(err) => {
                        log_trace!("dropped orphan {}: {err}", hash256_to_hex(&txid));
                    }
                }
            }
        }
        accepted
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.total_bytes -= entry.size;
        for outpoint in &entry.spent_outpoints {
            if self.spent.get(outpoint) == Some(txid) {
                self.spent.remove(outpoint);
            }
        }
        Some(entry)
    }

    /// Removes `txid` and every pool transaction spending its outputs, children first.
    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut order = Vec::new();
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            if order.contains(&current) {
                continue;
            }
            let Some(entry) = self.entries.get(&current) else {
                continue;
            };
            order.push(current);
            for index in 0..entry.tx.vout.len() {
                if let Some(child) = self.spent.get(&OutPoint::new(current, index as u32)) {
                    stack.push(*child);
                }
            }
        }
        order
            .iter()
            .rev()
            .filter_map(|txid| self.remove(txid))
            .collect()
    }

    /// Drops `txid` and its descendants from the pool.
    pub fn evict(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let removed = self.remove_with_descendants(txid);
        if !removed.is_empty() {
            log_debug!("evicted {} transactions from mempool", removed.len());
        }
        removed
    }

    /// Drops pool transactions whose inputs are no longer unspent in the confirmed
    /// set, as after a reorganization disconnected their funding block.
    pub fn remove_unspendable<S: KeyValueStore>(
        &mut self,
        chain: &ChainState<S>,
    ) -> Result<Vec<Transaction>, MempoolError> {
        let mut stale = Vec::new();
        for entry in self.entries.values() {
            for outpoint in &entry.spent_outpoints {
                let spendable = matches!(chain.utxo(outpoint)?, Some(utxo) if !utxo.is_spent());
                if !spendable {
                    stale.push(entry.txid);
                    break;
                }
            }
        }
        let mut removed = Vec::new();
        for txid in stale {
            removed.extend(self.remove_with_descendants(&txid).into_iter().map(|entry| entry.tx));
        }
        Ok(removed)
    }

    /// Drops the transactions `block` confirms and every pool transaction that
    /// conflicts with it.
    pub fn remove_for_block(&mut self, block: &Block) -> BlockRemoval {
        let mut removal = BlockRemoval::default();
        for tx in &block.transactions {
            let txid = tx.txid();
            if self.remove(&txid).is_some() {
                removal.confirmed.push(txid);
            }
        }
        for tx in &block.transactions {
            if tx.kind() == TransactionKind::Coinbase {
                continue;
            }
            for input in &tx.vin {
                let Some(conflict) = self.spender(&input.prevout) else {
                    continue;
                };
                removal.conflicted.extend(
                    self.remove_with_descendants(&conflict)
                        .into_iter()
                        .map(|entry| entry.tx),
                );
            }
        }
        removal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_transactions_are_free_in_an_empty_block() {
        assert_eq!(min_fee(250, 0), 0);
        assert_eq!(min_fee(999, 1_000), 0);
        assert_eq!(min_fee(250, DEFAULT_BLOCK_PRIORITY_SIZE as usize), MIN_TX_FEE);
    }

    #[test]
    fn fee_is_charged_per_started_kilobyte() {
        assert_eq!(min_fee(1_000, 0), 2 * MIN_TX_FEE);
        assert_eq!(min_fee(2_500, 0), 3 * MIN_TX_FEE);
    }

    #[test]
    fn fee_scales_as_the_block_fills() {
        let generated = MAX_BLOCK_SIZE_GEN as usize;
        let base = min_fee(1_000, 0);
        let half = generated / 2;
        assert_eq!(min_fee(1_000, half - 1_000), base * 2);
        assert!(min_fee(1_000, generated - 2_000) > base * 2);
        assert_eq!(min_fee(1_000, generated), MAX_MONEY);
    }

    #[test]
    fn free_relay_limiter_decays() {
        let mut limiter = FreeRelayLimiter::default();
        // 1 kB per minute allows 10_000 bytes before throttling
        assert!(limiter.allow(1, 9_000, 1_000));
        assert!(limiter.allow(1, 2_000, 1_000));
        assert!(!limiter.allow(1, 100, 1_000));
        assert!(limiter.allow(1, 100, 1_000 + 600));
    }

    #[test]
    fn consensus_errors_map_to_mempool_kinds() {
        let err = MempoolError::from(ConsensusError::double_spend("spent"));
        assert_eq!(err.kind, MempoolErrorKind::InvalidTransaction);
        assert_eq!(err.penalty, 0);
        let err = MempoolError::from(ConsensusError::structural("bad"));
        assert_eq!(err.penalty, 100);
    }
}
