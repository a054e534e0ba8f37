//! Subsidy schedule and reward split helpers.

use crate::money::Amount;
use crate::params::ConsensusParams;

/// Proof-of-work subsidy for a block at `height`, excluding fees.
///
/// The schedule is a step function over `params.pow_reward_eras`; the first era whose
/// `last_height` is at or above `height` wins. Height zero (genesis) earns nothing.
pub fn pow_reward(height: i32, params: &ConsensusParams) -> Amount {
    if height <= 0 {
        return 0;
    }
    params
        .pow_reward_eras
        .iter()
        .find(|era| height <= era.last_height)
        .map(|era| era.reward)
        .unwrap_or(0)
}

/// Proof-of-stake interest for `coin_days` of consumed coin age, excluding fees.
pub fn stake_reward(coin_days: u64, params: &ConsensusParams) -> Amount {
    let coin_days = i128::from(coin_days);
    let reward = coin_days * i128::from(params.coin_year_reward) / 365;
    Amount::try_from(reward).unwrap_or(Amount::MAX)
}

/// Share of the minted block reward owed to the elected masternode.
pub fn masternode_payment(block_reward: Amount) -> Amount {
    if block_reward <= 0 {
        return 0;
    }
    block_reward / 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{CENT, COIN};
    use crate::params::{consensus_params, Network};

    #[test]
    fn mainnet_pow_schedule_steps_at_era_boundaries() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(pow_reward(0, &params), 0);
        assert_eq!(pow_reward(1, &params), 1_000_000 * COIN);
        assert_eq!(pow_reward(2, &params), 3 * COIN);
        assert_eq!(pow_reward(1_000_000, &params), 3 * COIN);
        assert_eq!(pow_reward(1_000_001, &params), 3 * COIN / 2);
        assert_eq!(pow_reward(2_000_001, &params), 3 * COIN / 4);
        assert_eq!(pow_reward(3_000_001, &params), 0);
    }

    #[test]
    fn stake_reward_is_six_percent_per_coin_year() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(params.coin_year_reward, 6 * CENT);
        // 100 coins held for a full year.
        assert_eq!(stake_reward(100 * 365, &params), 6 * COIN);
        assert_eq!(stake_reward(0, &params), 0);
    }

    #[test]
    fn masternode_payment_floors_a_third() {
        assert_eq!(masternode_payment(3 * COIN), COIN);
        assert_eq!(masternode_payment(10), 3);
        assert_eq!(masternode_payment(2), 0);
        assert_eq!(masternode_payment(-5), 0);
    }
}
