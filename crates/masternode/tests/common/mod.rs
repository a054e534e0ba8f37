#![allow(dead_code)]

use std::collections::HashMap;

use stakd_consensus::params::{chain_params, Network};
use stakd_consensus::{Hash256, MasternodeParams};
use stakd_masternode::{
    ChainView, CollateralInfo, CollateralView, MasternodeError, PaymentVote, Ping, Registration,
};
use stakd_primitives::hash::sha256d;
use stakd_primitives::OutPoint;
use stakd_script::signer::public_key;
use stakd_script::standard::p2pkh_script_for_pubkey;
use stakd_script::SecretKey;

pub const NOW: i64 = 1_700_000_000;

pub fn params() -> MasternodeParams {
    chain_params(Network::Regtest).masternode
}

#[derive(Default)]
pub struct FakeChain {
    pub tip: i32,
    pub payees: HashMap<i32, Vec<u8>>,
    pub outputs: HashMap<OutPoint, CollateralInfo>,
    pub failing_lookups: bool,
}

impl FakeChain {
    pub fn with_tip(tip: i32) -> Self {
        Self {
            tip,
            ..Self::default()
        }
    }
}

impl ChainView for FakeChain {
    fn tip_height(&self) -> i32 {
        self.tip
    }

    fn block_hash(&self, height: i32) -> Option<Hash256> {
        (0..=self.tip)
            .contains(&height)
            .then(|| sha256d(&height.to_le_bytes()))
    }

    fn payee_at(&self, height: i32) -> Option<Vec<u8>> {
        self.payees.get(&height).cloned()
    }
}

impl CollateralView for FakeChain {
    fn collateral(&self, outpoint: &OutPoint) -> Result<Option<CollateralInfo>, MasternodeError> {
        if self.failing_lookups {
            return Err(MasternodeError::internal("store unavailable"));
        }
        Ok(self.outputs.get(outpoint).cloned())
    }

    fn script_owns_unspent(&self, script: &[u8], value: i64) -> bool {
        self.outputs
            .values()
            .any(|info| info.script_pubkey == script && info.value == value)
    }
}

pub struct Operator {
    pub collateral_key: SecretKey,
    pub operator_key: SecretKey,
    pub collateral: OutPoint,
}

impl Operator {
    pub fn new(seed: u8) -> Self {
        Self {
            collateral_key: SecretKey::from_slice(&[seed; 32]).expect("collateral key"),
            operator_key: SecretKey::from_slice(&[seed.wrapping_add(100); 32])
                .expect("operator key"),
            collateral: OutPoint::new([seed; 32], 0),
        }
    }

    pub fn collateral_pubkey(&self) -> Vec<u8> {
        public_key(&self.collateral_key).to_vec()
    }

    pub fn payee_script(&self) -> Vec<u8> {
        p2pkh_script_for_pubkey(&self.collateral_pubkey())
    }

    pub fn fund(&self, chain: &mut FakeChain, value: i64, confirmations: i32) {
        chain.outputs.insert(
            self.collateral.clone(),
            CollateralInfo {
                value,
                script_pubkey: self.payee_script(),
                confirmations,
            },
        );
    }

    pub fn registration(&self, sig_time: i64) -> Registration {
        let mut msg = Registration {
            collateral: self.collateral.clone(),
            addr: "127.0.0.1:19999".parse().expect("addr"),
            collateral_pubkey: self.collateral_pubkey(),
            operator_pubkey: public_key(&self.operator_key).to_vec(),
            sig_time,
            protocol_version: params().min_protocol_version,
            signature: Vec::new(),
        };
        msg.sign(&self.collateral_key);
        msg
    }

    pub fn ping(&self, sig_time: i64, stop: bool) -> Ping {
        let mut msg = Ping {
            collateral: self.collateral.clone(),
            sig_time,
            stop,
            signature: Vec::new(),
        };
        msg.sign(&self.operator_key);
        msg
    }

    pub fn vote(&self, height: i32, payee: &OutPoint) -> PaymentVote {
        let mut msg = PaymentVote {
            voter: self.collateral.clone(),
            height,
            payee: payee.clone(),
            signature: Vec::new(),
        };
        msg.sign(&self.operator_key);
        msg
    }
}

/// Funded operators with seeds `1..=count`.
pub fn funded_operators(chain: &mut FakeChain, count: u8) -> Vec<Operator> {
    (1..=count)
        .map(|seed| {
            let operator = Operator::new(seed);
            operator.fund(chain, params().collateral, 5);
            operator
        })
        .collect()
}
