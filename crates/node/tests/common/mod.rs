#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use stakd_consensus::money::Amount;
use stakd_consensus::params::{chain_params, Network};
use stakd_consensus::{pow_reward, Hash256};
use stakd_node::mempool::MempoolPolicy;
use stakd_node::{Node, NodeEvents};
use stakd_pow::validation::check_proof_of_work;
use stakd_primitives::block::{merkle_root, Block, BlockHeader, CURRENT_VERSION};
use stakd_primitives::{OutPoint, Transaction, TxIn, TxOut};
use stakd_script::sighash::{SighashType, SIGHASH_ALL};
use stakd_script::signer::{public_key, sign_input};
use stakd_script::standard::p2pkh_script_for_pubkey;
use stakd_script::SecretKey;
use stakd_storage::memory::MemoryStore;

pub fn secret(tag: u8) -> SecretKey {
    SecretKey::from_slice(&[tag; 32]).expect("secret key")
}

pub fn key_script(secret: &SecretKey) -> Vec<u8> {
    p2pkh_script_for_pubkey(&public_key(secret))
}

pub fn spend(
    prevouts: Vec<OutPoint>,
    script: &[u8],
    secret: &SecretKey,
    time: u32,
    vout: Vec<TxOut>,
) -> Transaction {
    let vin = prevouts
        .into_iter()
        .map(|prevout| TxIn::new(prevout, Vec::new()))
        .collect();
    let mut tx = Transaction::new(time, vin, vout);
    for index in 0..tx.vin.len() {
        let script_sig = sign_input(&tx, index, script, secret, SighashType(SIGHASH_ALL))
            .expect("sign input");
        tx.vin[index].script_sig = script_sig;
    }
    tx
}

#[derive(Default)]
pub struct RecordingEvents {
    pub confirmed: Mutex<Vec<(Hash256, i32)>>,
    pub conflicted: Mutex<Vec<Hash256>>,
    pub tips: Mutex<Vec<(Hash256, i32)>>,
}

impl RecordingEvents {
    pub fn confirmed(&self) -> Vec<(Hash256, i32)> {
        self.confirmed.lock().expect("events").clone()
    }

    pub fn conflicted(&self) -> Vec<Hash256> {
        self.conflicted.lock().expect("events").clone()
    }

    pub fn last_tip(&self) -> Option<(Hash256, i32)> {
        self.tips.lock().expect("events").last().copied()
    }
}

impl NodeEvents for RecordingEvents {
    fn on_transaction_confirmed(&self, txid: &Hash256, height: i32) {
        self.confirmed.lock().expect("events").push((*txid, height));
    }

    fn on_transaction_conflicted(&self, tx: &Transaction) {
        self.conflicted.lock().expect("events").push(tx.txid());
    }

    fn on_best_chain_changed(&self, tip: &Hash256, height: i32) {
        self.tips.lock().expect("events").push((*tip, height));
    }
}

pub struct TestNode {
    pub store: Arc<MemoryStore>,
    pub node: Node<MemoryStore>,
    pub events: Arc<RecordingEvents>,
    pub miner: SecretKey,
    pub miner_script: Vec<u8>,
    pub now: i64,
}

impl TestNode {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingEvents::default());
        let node = Self::open(&store, Arc::clone(&events));
        let params = chain_params(Network::Regtest);
        let miner = secret(1);
        Self {
            store,
            node,
            events,
            miner_script: key_script(&miner),
            miner,
            now: i64::from(params.consensus.genesis.time) + 10_000_000,
        }
    }

    fn open(store: &Arc<MemoryStore>, events: Arc<RecordingEvents>) -> Node<MemoryStore> {
        let params = chain_params(Network::Regtest);
        let policy = MempoolPolicy::standard(params.require_standard);
        Node::open(Arc::clone(store), params, policy, events).expect("open node")
    }

    /// A second node over the same store.
    pub fn reopen(&self) -> Node<MemoryStore> {
        Self::open(&self.store, Arc::new(RecordingEvents::default()))
    }

    pub fn tip(&self) -> Hash256 {
        self.node.best_hash().expect("best hash")
    }

    pub fn height(&self) -> i32 {
        self.node.best_height().expect("best height")
    }

    pub fn tip_time(&self) -> u32 {
        let tip = self.tip();
        self.node
            .with_chain(|chain| chain.node(&tip).map(|node| node.time))
            .expect("chain")
            .expect("indexed tip")
    }

    /// Proof-of-work block at `height` on `parent`, which need not be known yet.
    pub fn build_block(
        &self,
        parent: Hash256,
        height: i32,
        time: u32,
        coinbase_vout: Vec<TxOut>,
        txs: Vec<Transaction>,
    ) -> Block {
        // regtest never retargets, so the tip's requirement holds on any branch
        let bits = self
            .node
            .with_chain(|chain| chain.required_bits(&chain.best_hash(), false))
            .expect("chain")
            .expect("required bits");
        let mut script_sig = height.to_le_bytes().to_vec();
        script_sig.push((time & 0xff) as u8);
        let mut transactions = vec![Transaction::new(
            time,
            vec![TxIn::new(OutPoint::null(), script_sig)],
            coinbase_vout,
        )];
        transactions.extend(txs);
        let mut block = Block {
            header: BlockHeader {
                version: CURRENT_VERSION,
                prev_block: parent,
                merkle_root: [0u8; 32],
                time,
                bits,
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        };
        let (root, _) = merkle_root(&block.txids());
        block.header.merkle_root = root;
        let params = chain_params(Network::Regtest);
        while check_proof_of_work(&block.hash(), block.header.bits, &params.consensus).is_err() {
            block.header.nonce = block.header.nonce.wrapping_add(1);
        }
        block
    }

    pub fn reward(&self, height: i32) -> Amount {
        pow_reward(height, &chain_params(Network::Regtest).consensus)
    }

    /// Block on the tip paying subsidy plus `fees` to the miner.
    pub fn next_block(&self, fees: Amount, txs: Vec<Transaction>) -> Block {
        let height = self.height() + 1;
        let vout = vec![TxOut::new(self.reward(height) + fees, self.miner_script.clone())];
        self.build_block(self.tip(), height, self.tip_time() + 30, vout, txs)
    }

    pub fn mine_with(&self, txs: Vec<Transaction>, fees: Amount) -> Hash256 {
        let block = self.next_block(fees, txs);
        let hash = block.hash();
        self.node.submit_block(block, self.now).expect("submit block");
        assert_eq!(self.tip(), hash);
        hash
    }

    pub fn mine_to(&self, height: i32) {
        while self.height() < height {
            self.mine_with(Vec::new(), 0);
        }
    }

    pub fn coinbase_at(&self, height: i32) -> (OutPoint, Amount) {
        let block = self
            .node
            .block_by_height(height)
            .expect("read block")
            .expect("block at height");
        let coinbase = &block.transactions[0];
        (OutPoint::new(coinbase.txid(), 0), coinbase.vout[0].value)
    }

    /// Spends the miner's coinbase at `height` back to the miner, paying `fee`.
    pub fn pay_fee(&self, height: i32, fee: Amount) -> Transaction {
        let (prevout, value) = self.coinbase_at(height);
        spend(
            vec![prevout],
            &self.miner_script,
            &self.miner,
            self.tip_time(),
            vec![TxOut::new(value - fee, self.miner_script.clone())],
        )
    }
}
