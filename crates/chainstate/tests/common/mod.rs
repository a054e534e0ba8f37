#![allow(dead_code)]

use std::sync::Arc;

use stakd_chainstate::state::{AcceptedBlock, ChainState};
use stakd_chainstate::ConsensusError;
use stakd_consensus::money::Amount;
use stakd_consensus::params::{chain_params, Network};
use stakd_consensus::{pow_reward, ChainParams, Hash256};
use stakd_masternode::PaymentConsensus;
use stakd_pow::validation::check_proof_of_work;
use stakd_primitives::block::{merkle_root, Block, BlockHeader, CURRENT_VERSION};
use stakd_primitives::{OutPoint, Transaction, TxIn, TxOut};
use stakd_script::sighash::{SighashType, SIGHASH_ALL};
use stakd_script::signer::{public_key, sign_input};
use stakd_script::standard::p2pkh_script_for_pubkey;
use stakd_script::SecretKey;
use stakd_storage::memory::MemoryStore;

pub const SPACING: u32 = 30;

pub fn regtest() -> ChainParams {
    chain_params(Network::Regtest)
}

pub fn secret(tag: u8) -> SecretKey {
    SecretKey::from_slice(&[tag; 32]).expect("secret key")
}

pub fn key_script(secret: &SecretKey) -> Vec<u8> {
    p2pkh_script_for_pubkey(&public_key(secret))
}

pub fn coinbase_tx(height: i32, time: u32, tag: u8, vout: Vec<TxOut>) -> Transaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.push(tag);
    Transaction::new(time, vec![TxIn::new(OutPoint::null(), script_sig)], vout)
}

/// Signs every input of `tx`, each spending an output locked to `script`.
pub fn sign_all(tx: &mut Transaction, script: &[u8], secret: &SecretKey) {
    for index in 0..tx.vin.len() {
        let script_sig = sign_input(tx, index, script, secret, SighashType(SIGHASH_ALL))
            .expect("sign input");
        tx.vin[index].script_sig = script_sig;
    }
}

pub fn spend(
    prevout: OutPoint,
    script: &[u8],
    secret: &SecretKey,
    time: u32,
    vout: Vec<TxOut>,
) -> Transaction {
    let mut tx = Transaction::new(time, vec![TxIn::new(prevout, Vec::new())], vout);
    sign_all(&mut tx, script, secret);
    tx
}

/// Fills in the merkle root and grinds the nonce until the header meets `bits`.
pub fn seal(mut block: Block, chain: &ChainParams) -> Block {
    let (root, _) = merkle_root(&block.txids());
    block.header.merkle_root = root;
    while check_proof_of_work(&block.hash(), block.header.bits, &chain.consensus).is_err() {
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
    block
}

pub struct TestChain {
    pub store: Arc<MemoryStore>,
    pub chain: ChainState<MemoryStore>,
    pub miner: SecretKey,
    pub miner_script: Vec<u8>,
}

impl TestChain {
    pub fn new() -> Self {
        let params = regtest();
        let store = Arc::new(MemoryStore::new());
        let payments = Arc::new(PaymentConsensus::new(params.masternode.clone()));
        let chain = ChainState::new(Arc::clone(&store), params, payments).expect("chain state");
        let miner = secret(1);
        let miner_script = key_script(&miner);
        Self {
            store,
            chain,
            miner,
            miner_script,
        }
    }

    pub fn now(&self) -> i64 {
        i64::from(self.chain.params().consensus.genesis.time) + 10_000_000
    }

    pub fn height_of(&self, hash: &Hash256) -> i32 {
        self.chain.node(hash).expect("indexed").height
    }

    pub fn time_after(&self, parent: &Hash256) -> u32 {
        self.chain.node(parent).expect("indexed").time + SPACING
    }

    /// Proof-of-work block on `parent` whose coinbase pays the subsidy plus `fees`
    /// to the miner, followed by `txs`.
    pub fn block_on(&self, parent: &Hash256, tag: u8, fees: Amount, txs: Vec<Transaction>) -> Block {
        let height = self.height_of(parent) + 1;
        let reward = pow_reward(height, &self.chain.params().consensus) + fees;
        let vout = vec![TxOut::new(reward, self.miner_script.clone())];
        self.block_with_coinbase(parent, tag, vout, txs)
    }

    pub fn block_with_coinbase(
        &self,
        parent: &Hash256,
        tag: u8,
        coinbase_vout: Vec<TxOut>,
        txs: Vec<Transaction>,
    ) -> Block {
        let height = self.height_of(parent) + 1;
        let time = self.time_after(parent) + u32::from(tag);
        let mut transactions = vec![coinbase_tx(height, time, tag, coinbase_vout)];
        transactions.extend(txs);
        let bits = self
            .chain
            .required_bits(parent, false)
            .expect("required bits");
        let block = Block {
            header: BlockHeader {
                version: CURRENT_VERSION,
                prev_block: *parent,
                merkle_root: [0u8; 32],
                time,
                bits,
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        };
        seal(block, self.chain.params())
    }

    pub fn accept(&mut self, block: &Block) -> Result<AcceptedBlock, ConsensusError> {
        let now = self.now();
        self.chain.accept_block(block, now)
    }

    /// Mines an empty block on the tip.
    pub fn mine(&mut self) -> Hash256 {
        self.mine_with(Vec::new(), 0)
    }

    pub fn mine_with(&mut self, txs: Vec<Transaction>, fees: Amount) -> Hash256 {
        let tip = self.chain.best_hash();
        let block = self.block_on(&tip, 0, fees, txs);
        self.accept(&block).expect("accept block").hash
    }

    pub fn mine_to(&mut self, height: i32) {
        while self.chain.best_height() < height {
            self.mine();
        }
    }

    /// The miner's coinbase output at `height` on the best chain.
    pub fn coinbase_at(&self, height: i32) -> (OutPoint, Amount) {
        let block = self
            .chain
            .block_by_height(height)
            .expect("read block")
            .expect("block at height");
        let coinbase = &block.transactions[0];
        (OutPoint::new(coinbase.txid(), 0), coinbase.vout[0].value)
    }
}
