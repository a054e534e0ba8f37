//! Consensus parameter definitions.

use crate::money::{Amount, CENT, COIN};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// One step of the proof-of-work subsidy schedule. Applies to every height up to
/// and including `last_height`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RewardEra {
    pub last_height: i32,
    pub reward: Amount,
}

#[derive(Clone, Debug)]
pub struct GenesisParams {
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub message: &'static str,
    pub output_value: Amount,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub genesis: GenesisParams,
    pub pow_limit: Hash256,
    pub pos_limit: Hash256,
    /// Keep every block at the limit target. Used by regtest.
    pub pow_no_retargeting: bool,
    pub target_spacing: i64,
    pub target_timespan: i64,
    pub last_pow_block: i32,
    pub coinbase_maturity: i32,
    pub stake_min_age: i64,
    pub stake_max_age: i64,
    pub stake_modifier_interval: i64,
    /// Yearly proof-of-stake interest, in satoshi per coin-year.
    pub coin_year_reward: Amount,
    pub max_clock_drift: i64,
    pub pow_reward_eras: Vec<RewardEra>,
    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    pub fn retarget_interval(&self) -> i64 {
        (self.target_timespan / self.target_spacing).max(1)
    }

    pub fn last_checkpoint_height(&self) -> i32 {
        self.checkpoints
            .iter()
            .map(|checkpoint| checkpoint.height)
            .max()
            .unwrap_or(0)
    }

    pub fn checkpoint_at(&self, height: i32) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
    }
}

#[derive(Clone, Debug)]
pub struct MasternodeParams {
    /// Exact collateral value locked by every masternode.
    pub collateral: Amount,
    pub min_confirmations: i32,
    pub min_protocol_version: i32,
    /// First height whose blocks are checked for a masternode payment.
    pub payment_start_height: i32,
    /// First height at which a missing payment rejects the block.
    pub payment_enforce_height: i32,
    pub expiration_secs: i64,
    pub removal_secs: i64,
    pub min_ping_spacing_secs: i64,
    pub max_sig_time_drift_secs: i64,
    pub min_payment_window: usize,
    pub payment_rounds: usize,
    pub max_voter_rank: usize,
    pub vote_lookahead: i32,
    pub min_winner_retention: i32,
    pub ledger_capacity: usize,
    pub burn_pubkey_hash: [u8; 20],
}

impl MasternodeParams {
    /// Pay-to-pubkey-hash script of the burn destination.
    pub fn burn_script(&self) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xa9, 0x14]);
        script.extend_from_slice(&self.burn_pubkey_hash);
        script.extend_from_slice(&[0x88, 0xac]);
        script
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a big-endian display hex string into a little-endian hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let padded = format!("{hex:0>64}");
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&padded[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    pub masternode: MasternodeParams,
    /// Relay policy only. Consensus never consults it.
    pub require_standard: bool,
    pub message_start: [u8; 4],
    pub default_port: u16,
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            consensus: mainnet_consensus_params(),
            masternode: mainnet_masternode_params(),
            require_standard: true,
            message_start: [0xfa, 0xf2, 0xef, 0xb4],
            default_port: 33_369,
        },
        Network::Testnet => ChainParams {
            network,
            consensus: testnet_consensus_params(),
            masternode: testnet_masternode_params(),
            require_standard: false,
            message_start: [0xcd, 0xf2, 0xc0, 0xef],
            default_port: 33_368,
        },
        Network::Regtest => ChainParams {
            network,
            consensus: regtest_consensus_params(),
            masternode: regtest_masternode_params(),
            require_standard: false,
            message_start: [0xfa, 0xbf, 0xb5, 0xda],
            default_port: 33_370,
        },
    }
}

const MAINNET_REWARD_ERAS: [RewardEra; 5] = [
    RewardEra {
        last_height: 1,
        reward: 1_000_000 * COIN,
    },
    RewardEra {
        last_height: 1_000_000,
        reward: 3 * COIN,
    },
    RewardEra {
        last_height: 2_000_000,
        reward: 3 * COIN / 2,
    },
    RewardEra {
        last_height: 3_000_000,
        reward: 3 * COIN / 4,
    },
    RewardEra {
        last_height: i32::MAX,
        reward: 0,
    },
];

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        genesis: GenesisParams {
            time: 1_497_476_511,
            bits: 0x1e0f_ffff,
            nonce: 630_877,
            message: "hybrid stake chain genesis 2017-06-14",
            output_value: 0,
        },
        pow_limit: hash256_from_hex(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet pow limit"),
        pos_limit: hash256_from_hex(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet pos limit"),
        pow_no_retargeting: false,
        target_spacing: 30,
        target_timespan: 30 * 40,
        last_pow_block: 3_000_000,
        coinbase_maturity: 100,
        stake_min_age: 8 * 60 * 60,
        stake_max_age: 30 * 24 * 60 * 60,
        stake_modifier_interval: 10 * 60,
        coin_year_reward: 6 * CENT,
        max_clock_drift: 2 * 60 * 60,
        pow_reward_eras: MAINNET_REWARD_ERAS.to_vec(),
        checkpoints: Vec::new(),
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        genesis: GenesisParams {
            time: 1_497_476_511,
            bits: 0x1f00_ffff,
            nonce: 2_537,
            message: "hybrid stake chain testnet genesis",
            output_value: 0,
        },
        pow_limit: hash256_from_hex(
            "0000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("testnet pow limit"),
        pos_limit: hash256_from_hex(
            "0000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("testnet pos limit"),
        pow_no_retargeting: false,
        target_spacing: 30,
        target_timespan: 30 * 40,
        last_pow_block: 200_000,
        coinbase_maturity: 10,
        stake_min_age: 60 * 60,
        stake_max_age: 30 * 24 * 60 * 60,
        stake_modifier_interval: 60,
        coin_year_reward: 6 * CENT,
        max_clock_drift: 2 * 60 * 60,
        pow_reward_eras: vec![
            RewardEra {
                last_height: 1,
                reward: 1_000_000 * COIN,
            },
            RewardEra {
                last_height: i32::MAX,
                reward: 3 * COIN,
            },
        ],
        checkpoints: Vec::new(),
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        genesis: GenesisParams {
            time: 1_497_476_511,
            bits: 0x207f_ffff,
            nonce: 0,
            message: "hybrid stake chain regtest genesis",
            output_value: 0,
        },
        pow_limit: hash256_from_hex(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("regtest pow limit"),
        pos_limit: hash256_from_hex(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("regtest pos limit"),
        pow_no_retargeting: true,
        target_spacing: 30,
        target_timespan: 30 * 40,
        last_pow_block: i32::MAX,
        coinbase_maturity: 5,
        stake_min_age: 60,
        stake_max_age: 30 * 24 * 60 * 60,
        stake_modifier_interval: 60,
        coin_year_reward: 6 * CENT,
        max_clock_drift: 2 * 60 * 60,
        pow_reward_eras: vec![
            RewardEra {
                last_height: 1,
                reward: 100_000 * COIN,
            },
            RewardEra {
                last_height: 150,
                reward: 50 * COIN,
            },
            RewardEra {
                last_height: i32::MAX,
                reward: 25 * COIN,
            },
        ],
        checkpoints: Vec::new(),
    }
}

fn mainnet_masternode_params() -> MasternodeParams {
    MasternodeParams {
        collateral: 5_000 * COIN,
        min_confirmations: 15,
        min_protocol_version: 31_000,
        payment_start_height: 30_000,
        payment_enforce_height: 35_000,
        expiration_secs: 65 * 60,
        removal_secs: 70 * 60,
        min_ping_spacing_secs: 30 * 60,
        max_sig_time_drift_secs: 60 * 60,
        min_payment_window: 50,
        payment_rounds: 2,
        max_voter_rank: 10,
        vote_lookahead: 20,
        min_winner_retention: 100,
        ledger_capacity: 128,
        burn_pubkey_hash: [0u8; 20],
    }
}

fn testnet_masternode_params() -> MasternodeParams {
    MasternodeParams {
        payment_start_height: 1_000,
        payment_enforce_height: 1_500,
        min_confirmations: 5,
        ..mainnet_masternode_params()
    }
}

fn regtest_masternode_params() -> MasternodeParams {
    MasternodeParams {
        payment_start_height: 20,
        payment_enforce_height: 30,
        min_confirmations: 1,
        min_payment_window: 5,
        min_winner_retention: 10,
        ..mainnet_masternode_params()
    }
}
