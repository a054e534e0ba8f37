//! Chain state: block acceptance, connection, disconnection and best-chain selection.

use std::collections::HashSet;
use std::sync::Arc;

use primitive_types::U256;
use smallvec::SmallVec;
use stakd_consensus::constants::{MAX_BLOCK_SIGOPS, MEDIAN_TIME_SPAN};
use stakd_consensus::money::Amount;
use stakd_consensus::params::hash256_to_hex;
use stakd_consensus::{pow_reward, stake_reward, ChainParams, ConsensusParams, Hash256};
use stakd_log::{log_debug, log_error, log_info, log_warn};
use stakd_masternode::{
    ChainView, CollateralInfo, CollateralView, MasternodeError, PaymentConsensus, PaymentMatch,
};
use stakd_pow::difficulty::{block_trust, next_target_required};
use stakd_pow::kernel::{
    check_stake_kernel, coin_age, next_stake_modifier, stake_modifier_checksum, KernelInput,
    StakeInput,
};
use stakd_primitives::block::{merkle_root, CURRENT_VERSION};
use stakd_primitives::{
    Block, BlockHeader, OutPoint, Transaction, TransactionKind, TxIn, TxOut,
};
use stakd_script::interpreter::BLOCK_SCRIPT_VERIFY_FLAGS;
use stakd_script::opcodes::push_data;
use stakd_script::standard::{is_unspendable, p2sh_sigop_count};
use stakd_storage::{KeyValueStore, WriteBatch};

use crate::error::{ConsensusError, ErrorKind};
use crate::index::{
    BlockArena, BlockIndexNode, ChainIndex, STATUS_CONNECTED, STATUS_FAILED, STATUS_HAVE_DATA,
};
use crate::inputs::{connect_inputs, fetch_inputs, CandidateSet, ConnectContext, UtxoView};
use crate::utxo::{TxLocation, UtxoEntry, UtxoSet};
use crate::validation::{check_block, legacy_sigops};

/// Result of moving the tip to a different branch.
#[derive(Clone, Debug, Default)]
pub struct Reorganization {
    pub fork_height: i32,
    /// Newest first.
    pub disconnected: Vec<Hash256>,
    /// Oldest first.
    pub connected: Vec<Block>,
    /// User transactions from disconnected blocks that the new branch does not confirm.
    pub resurrected: Vec<Transaction>,
}

#[derive(Clone, Debug)]
pub struct AcceptedBlock {
    pub hash: Hash256,
    pub height: i32,
    /// Set when the block (or the branch it completes) became the best chain.
    pub reorganization: Option<Reorganization>,
}

/// The deterministic genesis block of a network.
pub fn genesis_block(params: &ConsensusParams) -> Block {
    let genesis = &params.genesis;
    let mut script_sig = Vec::with_capacity(genesis.message.len() + 2);
    push_data(&mut script_sig, genesis.message.as_bytes());
    let coinbase = Transaction::new(
        genesis.time,
        vec![TxIn::new(OutPoint::null(), script_sig)],
        vec![TxOut::new(genesis.output_value, Vec::new())],
    );
    let (root, _) = merkle_root(&[coinbase.txid()]);
    Block {
        header: BlockHeader {
            version: CURRENT_VERSION,
            prev_block: [0u8; 32],
            merkle_root: root,
            time: genesis.time,
            bits: genesis.bits,
            nonce: genesis.nonce,
        },
        transactions: vec![coinbase],
        signature: Vec::new(),
    }
}

pub struct ChainState<S> {
    store: Arc<S>,
    params: ChainParams,
    index: ChainIndex<S>,
    utxos: UtxoSet<Arc<S>>,
    arena: BlockArena,
    /// Best-chain hashes by height.
    active: Vec<Hash256>,
    payments: Arc<PaymentConsensus>,
}

impl<S: KeyValueStore> ChainState<S> {
    /// Opens the chain in `store`, writing the genesis block into an empty store.
    pub fn new(
        store: Arc<S>,
        params: ChainParams,
        payments: Arc<PaymentConsensus>,
    ) -> Result<Self, ConsensusError> {
        let mut state = Self {
            index: ChainIndex::new(Arc::clone(&store)),
            utxos: UtxoSet::new(Arc::clone(&store)),
            store,
            params,
            arena: BlockArena::new(),
            active: Vec::new(),
            payments,
        };
        let nodes = state.index.load_nodes()?;
        if nodes.is_empty() {
            state.write_genesis()?;
        } else {
            for node in nodes {
                state.arena.insert(node);
            }
            let best = state
                .index
                .best_block()?
                .ok_or_else(|| ConsensusError::internal("block index without best block"))?;
            state.rebuild_active(best)?;
            log_info!(
                "loaded {} index entries, tip {} at height {}",
                state.arena.len(),
                hash256_to_hex(&best),
                state.best_height()
            );
        }
        Ok(state)
    }

    fn write_genesis(&mut self) -> Result<(), ConsensusError> {
        let block = genesis_block(&self.params.consensus);
        let hash = block.hash();
        let checksum = stake_modifier_checksum(0, false, &hash, 0);
        let node = BlockIndexNode {
            hash,
            height: 0,
            prev: None,
            next: None,
            chain_trust: block_trust(block.header.bits)?,
            proof_of_stake: false,
            stake_modifier: 0,
            stake_modifier_checksum: checksum,
            hash_proof: hash,
            money_supply: 0,
            bits: block.header.bits,
            time: block.header.time,
            status: STATUS_HAVE_DATA | STATUS_CONNECTED,
            payee: None,
        };
        let mut batch = WriteBatch::new();
        self.index.put_block(&mut batch, &hash, &block);
        self.index.put_node(&mut batch, &node);
        self.index.set_height_hash(&mut batch, 0, &hash);
        self.index.set_best_block(&mut batch, &hash);
        self.index.set_money_supply(&mut batch, 0);
        self.store.write_batch(&batch)?;
        self.arena.insert(node);
        self.active = vec![hash];
        log_info!("initialized chain at genesis {}", hash256_to_hex(&hash));
        Ok(())
    }

    fn rebuild_active(&mut self, best: Hash256) -> Result<(), ConsensusError> {
        let mut hashes = Vec::new();
        let mut cursor = self.arena.get(&best);
        while let Some(node) = cursor {
            hashes.push(node.hash);
            cursor = self.arena.parent(node);
        }
        hashes.reverse();
        let tip_height = self.arena.get(&best).map(|node| node.height);
        if tip_height != Some(hashes.len() as i32 - 1) {
            return Err(ConsensusError::internal("best chain has gaps"));
        }
        self.active = hashes;
        Ok(())
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn payments(&self) -> &Arc<PaymentConsensus> {
        &self.payments
    }

    pub fn best_hash(&self) -> Hash256 {
        self.active.last().copied().unwrap_or([0u8; 32])
    }

    pub fn best_height(&self) -> i32 {
        self.active.len() as i32 - 1
    }

    pub fn best_node(&self) -> Option<&BlockIndexNode> {
        self.arena.get(&self.best_hash())
    }

    pub fn node(&self, hash: &Hash256) -> Option<&BlockIndexNode> {
        self.arena.get(hash)
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.arena.get(hash).is_some_and(BlockIndexNode::has_data)
    }

    pub fn hash_at(&self, height: i32) -> Option<Hash256> {
        usize::try_from(height)
            .ok()
            .and_then(|height| self.active.get(height).copied())
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ConsensusError> {
        Ok(self.index.read_block(hash)?)
    }

    pub fn block_by_height(&self, height: i32) -> Result<Option<Block>, ConsensusError> {
        match self.hash_at(height) {
            Some(hash) => self.block_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn money_supply(&self) -> Amount {
        self.best_node().map(|node| node.money_supply).unwrap_or(0)
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ConsensusError> {
        Ok(self.utxos.get(outpoint)?)
    }

    /// Median time past of the tip.
    pub fn median_time_past(&self) -> i64 {
        self.arena
            .median_time_past(&self.best_hash(), MEDIAN_TIME_SPAN)
    }

    /// Compact target a child of `parent` must carry.
    pub fn required_bits(
        &self,
        parent: &Hash256,
        proof_of_stake: bool,
    ) -> Result<u32, ConsensusError> {
        let (last, before_last) = self.arena.last_two_of_kind(parent, proof_of_stake);
        Ok(next_target_required(
            last.as_ref(),
            before_last.as_ref(),
            proof_of_stake,
            &self.params.consensus,
        )?)
    }

    /// Validates `block`, stores it and moves the best chain when it carries more trust.
    pub fn accept_block(&mut self, block: &Block, now: i64) -> Result<AcceptedBlock, ConsensusError> {
        let hash = block.hash();
        if let Some(existing) = self.arena.get(&hash) {
            if existing.is_failed() {
                return Err(ConsensusError::violation("block previously marked invalid"));
            }
            if existing.has_data() {
                return Err(ConsensusError::policy("duplicate block"));
            }
        }
        let Some(parent) = self.arena.get(&block.header.prev_block).cloned() else {
            return Err(ConsensusError::missing_inputs(format!(
                "orphan block, parent {} unknown",
                hash256_to_hex(&block.header.prev_block)
            )));
        };
        if parent.is_failed() {
            self.record_failed(block, &parent)?;
            return Err(ConsensusError::violation("parent block marked invalid"));
        }

        let checked = check_block(block, &self.params.consensus, now)
            .and_then(|_| self.check_contextual(block, &parent));
        if let Err(err) = checked {
            log_warn!("rejected block {}: {err}", hash256_to_hex(&hash));
            if err.marks_failed() {
                self.record_failed(block, &parent)?;
            }
            return Err(err);
        }

        let trust = parent
            .chain_trust
            .saturating_add(block_trust(block.header.bits)?);
        let node = BlockIndexNode {
            hash,
            height: parent.height + 1,
            prev: Some(parent.hash),
            next: None,
            chain_trust: trust,
            proof_of_stake: block.is_proof_of_stake(),
            stake_modifier: 0,
            stake_modifier_checksum: 0,
            hash_proof: [0u8; 32],
            money_supply: 0,
            bits: block.header.bits,
            time: block.header.time,
            status: STATUS_HAVE_DATA,
            payee: None,
        };
        let height = node.height;
        let mut batch = WriteBatch::new();
        self.index.put_block(&mut batch, &hash, block);
        self.index.put_node(&mut batch, &node);
        self.store.write_batch(&batch)?;
        self.arena.insert(node);
        log_debug!("accepted block {} at height {height}", hash256_to_hex(&hash));

        let reorganization = self.set_best_chain(&hash)?;
        Ok(AcceptedBlock {
            hash,
            height,
            reorganization,
        })
    }

    /// Rules that depend on the parent but not on the output set.
    fn check_contextual(&self, block: &Block, parent: &BlockIndexNode) -> Result<(), ConsensusError> {
        let consensus = &self.params.consensus;
        let height = parent.height + 1;
        let block_time = i64::from(block.header.time);
        let proof_of_stake = block.is_proof_of_stake();

        if !proof_of_stake && height > consensus.last_pow_block {
            return Err(ConsensusError::violation("proof-of-work block after last pow height"));
        }
        if block_time <= self.arena.median_time_past(&parent.hash, MEDIAN_TIME_SPAN) {
            return Err(ConsensusError::violation("block timestamp too early"));
        }
        let required = self.required_bits(&parent.hash, proof_of_stake)?;
        if block.header.bits != required {
            return Err(ConsensusError::violation(format!(
                "incorrect difficulty bits {:#010x}, expected {required:#010x}",
                block.header.bits
            )));
        }
        if let Some(checkpoint) = consensus.checkpoint_at(height) {
            if checkpoint.hash != block.hash() {
                return Err(ConsensusError::violation("checkpoint mismatch"));
            }
        }
        if block
            .transactions
            .iter()
            .any(|tx| !tx.is_final(height, block_time))
        {
            return Err(ConsensusError::violation("contains a non-final transaction"));
        }
        Ok(())
    }

    fn record_failed(&mut self, block: &Block, parent: &BlockIndexNode) -> Result<(), ConsensusError> {
        let node = BlockIndexNode {
            hash: block.hash(),
            height: parent.height + 1,
            prev: Some(parent.hash),
            next: None,
            chain_trust: parent.chain_trust,
            proof_of_stake: block.is_proof_of_stake(),
            stake_modifier: 0,
            stake_modifier_checksum: 0,
            hash_proof: [0u8; 32],
            money_supply: 0,
            bits: block.header.bits,
            time: block.header.time,
            status: STATUS_FAILED,
            payee: None,
        };
        let mut batch = WriteBatch::new();
        self.index.put_node(&mut batch, &node);
        self.store.write_batch(&batch)?;
        self.arena.insert(node);
        Ok(())
    }

    fn mark_failed(&mut self, hash: &Hash256) {
        let Some(node) = self.arena.get_mut(hash) else {
            return;
        };
        node.status |= STATUS_FAILED;
        let node = node.clone();
        let mut batch = WriteBatch::new();
        self.index.put_node(&mut batch, &node);
        if let Err(err) = self.store.write_batch(&batch) {
            log_error!("failed to persist invalid mark for {}: {err}", hash256_to_hex(hash));
        }
    }

    /// Makes `candidate` the tip if its cumulative trust is strictly higher,
    /// reorganizing through the fork point when needed. A failed connect leaves the
    /// previous tip in place.
    pub fn set_best_chain(
        &mut self,
        candidate: &Hash256,
    ) -> Result<Option<Reorganization>, ConsensusError> {
        let best = self.best_hash();
        let candidate_trust = self
            .arena
            .get(candidate)
            .map(|node| node.chain_trust)
            .ok_or_else(|| ConsensusError::internal("candidate not indexed"))?;
        let best_trust = self
            .best_node()
            .map(|node| node.chain_trust)
            .unwrap_or_else(U256::zero);
        if candidate_trust <= best_trust {
            return Ok(None);
        }

        let fork = self
            .arena
            .fork_point(&best, candidate)
            .ok_or_else(|| ConsensusError::internal("no common ancestor"))?;
        let fork_height = self.arena.get(&fork).map(|node| node.height).unwrap_or(0);
        let mut path = Vec::new();
        let mut cursor = *candidate;
        while cursor != fork {
            let node = self
                .arena
                .get(&cursor)
                .ok_or_else(|| ConsensusError::internal("broken parent link"))?;
            if node.is_failed() || !node.has_data() {
                return Ok(None);
            }
            path.push(cursor);
            cursor = node
                .prev
                .ok_or_else(|| ConsensusError::internal("branch does not reach fork"))?;
        }
        path.reverse();

        if fork != best {
            log_info!(
                "reorganize at height {fork_height}: disconnect {} blocks, connect {}",
                self.best_height() - fork_height,
                path.len()
            );
        }

        let checkpoint_height = self.params.consensus.last_checkpoint_height();
        let mut disconnected = Vec::new();
        let mut resurrect: Vec<Vec<Transaction>> = Vec::new();
        while self.best_hash() != fork {
            let hash = self.best_hash();
            let height = self.best_height();
            let block = self.disconnect_block(&hash)?;
            if height > checkpoint_height {
                resurrect.push(
                    block
                        .transactions
                        .into_iter()
                        .filter(|tx| tx.kind() == TransactionKind::Standard)
                        .collect(),
                );
            }
            disconnected.push(hash);
        }

        let mut connected = Vec::with_capacity(path.len());
        for (offset, hash) in path.iter().enumerate() {
            self.payments.invalidate_ranks(fork_height + 1 + offset as i32)?;
            match self.connect_block(hash) {
                Ok(block) => connected.push(block),
                Err(err) => {
                    log_warn!("failed to connect {}: {err}", hash256_to_hex(hash));
                    if err.marks_failed() {
                        for failed in &path[offset..] {
                            self.mark_failed(failed);
                        }
                    }
                    self.rollback(&fork, &disconnected)?;
                    return Err(err);
                }
            }
        }

        let confirmed: HashSet<Hash256> = connected
            .iter()
            .flat_map(|block| block.transactions.iter().map(Transaction::txid))
            .collect();
        let resurrected = resurrect
            .into_iter()
            .rev()
            .flatten()
            .filter(|tx| !confirmed.contains(&tx.txid()))
            .collect();
        Ok(Some(Reorganization {
            fork_height,
            disconnected,
            connected,
            resurrected,
        }))
    }

    /// Unwinds to `fork` and reconnects the original branch (`original` newest first).
    fn rollback(&mut self, fork: &Hash256, original: &[Hash256]) -> Result<(), ConsensusError> {
        while self.best_hash() != *fork {
            let hash = self.best_hash();
            self.disconnect_block(&hash)?;
        }
        for hash in original.iter().rev() {
            if let Some(node) = self.arena.get(hash) {
                self.payments.invalidate_ranks(node.height)?;
            }
            self.connect_block(hash).map_err(|err| {
                log_error!("rollback could not reconnect {}: {err}", hash256_to_hex(hash));
                ConsensusError::internal(format!("rollback failed: {err}"))
            })?;
        }
        Ok(())
    }

    /// Connects the stored block `hash` on top of the current tip.
    pub fn connect_block(&mut self, hash: &Hash256) -> Result<Block, ConsensusError> {
        let mut node = self
            .arena
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::internal("block not indexed"))?;
        let mut parent = self
            .arena
            .parent(&node)
            .cloned()
            .ok_or_else(|| ConsensusError::internal("parent not indexed"))?;
        if parent.hash != self.best_hash() {
            return Err(ConsensusError::internal("block does not extend the tip"));
        }
        let block = self
            .index
            .read_block(hash)?
            .ok_or_else(|| ConsensusError::internal("block data missing"))?;

        let consensus = &self.params.consensus;
        let height = node.height;
        let block_time = i64::from(block.header.time);
        let proof_of_stake = block.is_proof_of_stake();
        let skip_scripts = height <= consensus.last_checkpoint_height();
        if skip_scripts {
            log_debug!("skipping script checks at checkpointed height {height}");
        }

        let hash_proof = match block.coinstake() {
            Some(coinstake) => self.check_kernel(&block, coinstake, &parent)?,
            None => *hash,
        };
        let stake_modifier = next_stake_modifier(
            parent.stake_modifier,
            parent.time(),
            block_time,
            &hash_proof,
            consensus,
        );
        let checksum = stake_modifier_checksum(
            parent.stake_modifier_checksum,
            proof_of_stake,
            &hash_proof,
            stake_modifier,
        );

        let ctx = ConnectContext {
            params: consensus,
            height,
            flags: BLOCK_SCRIPT_VERIFY_FLAGS,
            skip_scripts,
        };
        let burn_script = self.params.masternode.burn_script();
        let mut candidate = CandidateSet::new();
        let mut fees: Amount = 0;
        let mut value_in: Amount = 0;
        let mut value_out: Amount = 0;
        let mut burned: Amount = 0;
        let mut sigops: u32 = 0;
        let mut stake_value_in: Amount = 0;
        let mut stake_inputs: SmallVec<[StakeInput; 4]> = SmallVec::new();

        for (position, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            let kind = tx.kind();
            // outputs of a txid already in the index, spent or not, may not be recreated
            if candidate.created_by(&txid) || self.utxos.has_transaction(&txid)? {
                return Err(ConsensusError::violation(format!(
                    "transaction {} overwrites existing outputs",
                    hash256_to_hex(&txid)
                )));
            }
            sigops += legacy_sigops(tx);
            if kind != TransactionKind::Coinbase {
                let prevouts = fetch_inputs(tx, &candidate, &self.utxos).map_err(|err| {
                    if err.kind == ErrorKind::MissingInputs {
                        ConsensusError::violation(err.reason)
                    } else {
                        err
                    }
                })?;
                sigops += tx
                    .vin
                    .iter()
                    .zip(&prevouts)
                    .map(|(input, prev)| {
                        p2sh_sigop_count(&prev.entry.script_pubkey, &input.script_sig)
                    })
                    .sum::<u32>();
                fees += connect_inputs(tx, &prevouts, &mut candidate, &ctx)?;
                let tx_in: Amount = prevouts.iter().map(|prev| prev.entry.value).sum();
                value_in += tx_in;
                if kind == TransactionKind::Coinstake {
                    stake_value_in = tx_in;
                    stake_inputs = prevouts
                        .iter()
                        .map(|prev| StakeInput {
                            value: prev.entry.value,
                            tx_time: i64::from(prev.entry.tx_time),
                        })
                        .collect();
                }
            }
            if sigops > MAX_BLOCK_SIGOPS {
                return Err(ConsensusError::structural("block sigops limit exceeded"));
            }

            value_out += tx
                .value_out()
                .ok_or_else(|| ConsensusError::structural("output values out of range"))?;
            for (index, output) in tx.vout.iter().enumerate() {
                let unspendable = is_unspendable(&output.script_pubkey);
                if unspendable || output.script_pubkey == burn_script {
                    burned += output.value;
                }
                if unspendable || output.is_empty() {
                    continue;
                }
                candidate.create(
                    OutPoint::new(txid, index as u32),
                    UtxoEntry {
                        value: output.value,
                        script_pubkey: output.script_pubkey.clone(),
                        height,
                        tx_time: tx.time,
                        kind,
                        location: TxLocation {
                            block_hash: *hash,
                            height,
                            position: position as u32,
                        },
                        spent: None,
                    },
                );
            }
        }

        let minted = match block.coinstake() {
            Some(coinstake) => {
                let stake_out = coinstake
                    .value_out()
                    .ok_or_else(|| ConsensusError::structural("coinstake value out of range"))?;
                let minted = stake_out - stake_value_in;
                let age = coin_age(&stake_inputs, i64::from(coinstake.time), consensus);
                let limit = stake_reward(age, consensus).saturating_add(fees);
                if minted > limit {
                    return Err(ConsensusError::violation(format!(
                        "coinstake mints {minted}, limit {limit}"
                    )));
                }
                minted
            }
            None => {
                let minted = block.transactions[0]
                    .value_out()
                    .ok_or_else(|| ConsensusError::structural("coinbase value out of range"))?;
                let limit = pow_reward(height, consensus).saturating_add(fees);
                if minted > limit {
                    return Err(ConsensusError::violation(format!(
                        "coinbase pays {minted}, limit {limit}"
                    )));
                }
                minted
            }
        };

        let reward_outputs = match block.coinstake() {
            Some(coinstake) => coinstake.vout.as_slice(),
            None => block.transactions[0].vout.as_slice(),
        };
        let payment = self
            .payments
            .check_block_payment(height, minted, reward_outputs, &*self)?;

        let collateral = self.params.masternode.collateral;
        let (created, spent) = candidate.into_parts();
        let mut batch = WriteBatch::new();
        batch.reserve(created.len() + spent.len() + 6);
        for (outpoint, entry) in &created {
            let mut entry = entry.clone();
            entry.spent = spent.get(outpoint).cloned();
            if entry.value == collateral {
                self.utxos
                    .put_collateral(&mut batch, &entry.script_pubkey, outpoint);
            }
            self.utxos.put(&mut batch, outpoint, &entry);
        }
        for (outpoint, marker) in &spent {
            if created.contains_key(outpoint) {
                continue;
            }
            let mut entry = self
                .utxos
                .get(outpoint)?
                .ok_or_else(|| ConsensusError::internal("spent output vanished"))?;
            entry.spent = Some(marker.clone());
            self.utxos.put(&mut batch, outpoint, &entry);
        }

        node.status |= STATUS_CONNECTED;
        node.hash_proof = hash_proof;
        node.stake_modifier = stake_modifier;
        node.stake_modifier_checksum = checksum;
        node.money_supply = parent.money_supply + value_out - value_in - burned;
        node.payee = payment.as_ref().map(|matched| matched.payee_script.clone());
        parent.next = Some(*hash);
        self.index.put_node(&mut batch, &node);
        self.index.put_node(&mut batch, &parent);
        self.index.set_height_hash(&mut batch, height, hash);
        self.index.set_best_block(&mut batch, hash);
        self.index.set_money_supply(&mut batch, node.money_supply);
        self.store.write_batch(&batch)?;

        let supply = node.money_supply;
        self.arena.insert(node);
        self.arena.insert(parent);
        self.active.push(*hash);

        if let Some(PaymentMatch {
            collateral: Some(collateral),
            amount,
            ..
        }) = &payment
        {
            self.payments.record_payment(height, collateral, *amount)?;
        }
        log_debug!(
            "connected block {} at height {height}, {} txs, supply {supply}",
            hash256_to_hex(hash),
            block.transactions.len()
        );
        Ok(block)
    }

    fn check_kernel(
        &self,
        block: &Block,
        coinstake: &Transaction,
        parent: &BlockIndexNode,
    ) -> Result<Hash256, ConsensusError> {
        let prevout = &coinstake.vin[0].prevout;
        let staked = self
            .utxos
            .get(prevout)?
            .ok_or_else(|| ConsensusError::violation(format!("stake input {prevout} not found")))?;
        if staked.is_spent() {
            return Err(ConsensusError::double_spend(format!(
                "stake input {prevout} already spent"
            )));
        }
        let staked_block_time = self
            .arena
            .get(&staked.location.block_hash)
            .map(BlockIndexNode::time)
            .ok_or_else(|| ConsensusError::internal("stake input block not indexed"))?;
        let input = KernelInput {
            prevout,
            value: staked.value,
            block_time: staked_block_time,
            tx_time: i64::from(staked.tx_time),
        };
        Ok(check_stake_kernel(
            parent.stake_modifier,
            block.header.bits,
            &input,
            i64::from(coinstake.time),
            &self.params.consensus,
        )?)
    }

    /// Disconnects the tip block `hash`, restoring the output set and the masternode
    /// ledger to the parent's state.
    pub fn disconnect_block(&mut self, hash: &Hash256) -> Result<Block, ConsensusError> {
        if *hash != self.best_hash() {
            return Err(ConsensusError::internal("only the tip can be disconnected"));
        }
        let mut node = self
            .arena
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::internal("block not indexed"))?;
        let mut parent = self
            .arena
            .parent(&node)
            .cloned()
            .ok_or_else(|| ConsensusError::internal("cannot disconnect genesis"))?;
        let block = self
            .index
            .read_block(hash)?
            .ok_or_else(|| ConsensusError::internal("block data missing"))?;
        let collateral = self.params.masternode.collateral;

        let mut batch = WriteBatch::new();
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for index in 0..tx.vout.len() {
                let outpoint = OutPoint::new(txid, index as u32);
                if let Some(entry) = self.utxos.get(&outpoint)? {
                    if entry.value == collateral {
                        self.utxos
                            .delete_collateral(&mut batch, &entry.script_pubkey, &outpoint);
                    }
                    self.utxos.delete(&mut batch, &outpoint);
                }
            }
            if tx.kind() == TransactionKind::Coinbase {
                continue;
            }
            for input in &tx.vin {
                let mut entry = self.utxos.get(&input.prevout)?.ok_or_else(|| {
                    ConsensusError::internal(format!("spent output {} missing", input.prevout))
                })?;
                entry.spent = None;
                self.utxos.put(&mut batch, &input.prevout, &entry);
            }
        }

        let height = node.height;
        node.status &= !STATUS_CONNECTED;
        node.hash_proof = [0u8; 32];
        node.stake_modifier = 0;
        node.stake_modifier_checksum = 0;
        node.money_supply = 0;
        node.payee = None;
        parent.next = None;
        self.index.put_node(&mut batch, &node);
        self.index.put_node(&mut batch, &parent);
        self.index.clear_height_hash(&mut batch, height);
        self.index.set_best_block(&mut batch, &parent.hash);
        self.index.set_money_supply(&mut batch, parent.money_supply);
        self.store.write_batch(&batch)?;

        self.arena.insert(node);
        self.arena.insert(parent);
        self.active.pop();

        let undone = self.payments.undo_payment(height)?;
        self.payments.invalidate_ranks(height)?;
        log_debug!(
            "disconnected block {} at height {height}, {undone} payments undone",
            hash256_to_hex(hash)
        );
        Ok(block)
    }
}

impl<S: KeyValueStore> UtxoView for ChainState<S> {
    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ConsensusError> {
        Ok(self.utxos.get(outpoint)?)
    }

    fn has_transaction(&self, txid: &Hash256) -> Result<bool, ConsensusError> {
        Ok(self.utxos.has_transaction(txid)?)
    }
}

impl<S: KeyValueStore> ChainView for ChainState<S> {
    fn tip_height(&self) -> i32 {
        self.best_height()
    }

    fn block_hash(&self, height: i32) -> Option<Hash256> {
        self.hash_at(height)
    }

    fn payee_at(&self, height: i32) -> Option<Vec<u8>> {
        self.hash_at(height)
            .and_then(|hash| self.arena.get(&hash))
            .and_then(|node| node.payee.clone())
    }
}

impl<S: KeyValueStore> CollateralView for ChainState<S> {
    fn collateral(&self, outpoint: &OutPoint) -> Result<Option<CollateralInfo>, MasternodeError> {
        let entry = match self.utxos.get(outpoint) {
            Ok(Some(entry)) if !entry.is_spent() => entry,
            Ok(_) => return Ok(None),
            Err(err) => {
                return Err(MasternodeError::internal(format!(
                    "collateral lookup for {outpoint} failed: {err}"
                )));
            }
        };
        Ok(Some(CollateralInfo {
            value: entry.value,
            script_pubkey: entry.script_pubkey,
            confirmations: self.best_height() - entry.height + 1,
        }))
    }

    fn script_owns_unspent(&self, script: &[u8], value: Amount) -> bool {
        if value != self.params.masternode.collateral {
            return false;
        }
        let outpoints = match self.utxos.collateral_outpoints(script) {
            Ok(outpoints) => outpoints,
            Err(err) => {
                log_warn!("collateral index scan failed: {err}");
                return false;
            }
        };
        outpoints.iter().any(|outpoint| {
            matches!(
                self.utxos.get(outpoint),
                Ok(Some(entry)) if !entry.is_spent() && entry.value == value
            )
        })
    }
}
