//! Consensus constants, parameters, and reward schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;

pub use params::{
    chain_params, consensus_params, ChainParams, Checkpoint, ConsensusParams, GenesisParams,
    MasternodeParams, Network, RewardEra,
};
pub use rewards::{masternode_payment, pow_reward, stake_reward};

pub type Hash256 = [u8; 32];
