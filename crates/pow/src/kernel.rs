//! Proof-of-stake kernel, coin age and the stake modifier.
//!
//! A coinstake proves stake by hashing its first input's outpoint together with
//! the stake modifier of the parent block and the relevant timestamps. The hash
//! must fall under the compact target scaled by the coin-day weight of the staked
//! output, so larger and older outputs find kernels more often.

use primitive_types::{U256, U512};
use stakd_consensus::constants::SECONDS_PER_DAY;
use stakd_consensus::money::{Amount, CENT, COIN};
use stakd_consensus::{ConsensusParams, Hash256};
use stakd_primitives::encoding::Encoder;
use stakd_primitives::hash::sha256d;
use stakd_primitives::OutPoint;

use crate::difficulty::{compact_to_u256, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeError {
    /// Coinstake timestamp precedes the staked output.
    TimeViolation,
    /// Staked output younger than `stake_min_age`.
    MinAgeViolation,
    /// Kernel hash above the weighted target.
    TargetNotMet,
    NonPositiveValue,
    Compact(CompactError),
}

impl std::fmt::Display for StakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StakeError::TimeViolation => write!(f, "coinstake time precedes staked output"),
            StakeError::MinAgeViolation => write!(f, "staked output below minimum age"),
            StakeError::TargetNotMet => write!(f, "kernel hash does not meet stake target"),
            StakeError::NonPositiveValue => write!(f, "staked output has no value"),
            StakeError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StakeError {}

impl From<CompactError> for StakeError {
    fn from(err: CompactError) -> Self {
        StakeError::Compact(err)
    }
}

/// The staked output as the kernel sees it.
#[derive(Clone, Debug)]
pub struct KernelInput<'a> {
    pub prevout: &'a OutPoint,
    pub value: Amount,
    /// Time of the block that confirmed the staked output.
    pub block_time: i64,
    /// Timestamp of the transaction that created it.
    pub tx_time: i64,
}

/// Seconds of stake age counted towards the kernel weight: time held beyond
/// `stake_min_age`, capped at `stake_max_age`.
pub fn coin_age_weight(from_time: i64, to_time: i64, params: &ConsensusParams) -> i64 {
    (to_time - from_time - params.stake_min_age).clamp(0, params.stake_max_age)
}

pub fn kernel_hash(
    stake_modifier: u64,
    input: &KernelInput<'_>,
    coinstake_time: i64,
) -> Hash256 {
    let mut encoder = Encoder::with_capacity(8 + 4 + 4 + 36 + 4);
    encoder.write_u64_le(stake_modifier);
    encoder.write_u32_le(input.block_time as u32);
    encoder.write_u32_le(input.tx_time as u32);
    encoder.write_hash(&input.prevout.hash);
    encoder.write_u32_le(input.prevout.index);
    encoder.write_u32_le(coinstake_time as u32);
    sha256d(&encoder.into_inner())
}

/// Checks the stake kernel of a coinstake and returns its hash (the block's
/// proof hash).
pub fn check_stake_kernel(
    stake_modifier: u64,
    bits: u32,
    input: &KernelInput<'_>,
    coinstake_time: i64,
    params: &ConsensusParams,
) -> Result<Hash256, StakeError> {
    if coinstake_time < input.tx_time {
        return Err(StakeError::TimeViolation);
    }
    if input.block_time + params.stake_min_age > coinstake_time {
        return Err(StakeError::MinAgeViolation);
    }
    if input.value <= 0 {
        return Err(StakeError::NonPositiveValue);
    }

    let target_per_coin_day = compact_to_u256(bits)?;
    let weight = coin_age_weight(input.tx_time, coinstake_time, params);
    let coin_day_weight =
        i128::from(input.value) * i128::from(weight) / i128::from(COIN) / i128::from(SECONDS_PER_DAY);
    let weighted_target: U512 =
        target_per_coin_day.full_mul(U256::from(coin_day_weight.max(0) as u128));

    let hash = kernel_hash(stake_modifier, input, coinstake_time);
    let hash_value = U512::from(U256::from_little_endian(&hash));
    if hash_value > weighted_target {
        return Err(StakeError::TargetNotMet);
    }
    Ok(hash)
}

/// One input of a coinstake for coin-age accounting.
#[derive(Clone, Copy, Debug)]
pub struct StakeInput {
    pub value: Amount,
    /// Timestamp of the transaction that created the spent output.
    pub tx_time: i64,
}

/// Coin-days consumed by a coinstake at `tx_time`. Inputs younger than
/// `stake_min_age` contribute nothing.
pub fn coin_age(inputs: &[StakeInput], tx_time: i64, params: &ConsensusParams) -> u64 {
    let mut cent_seconds: i128 = 0;
    for input in inputs {
        if tx_time < input.tx_time + params.stake_min_age {
            continue;
        }
        let held = i128::from(tx_time - input.tx_time);
        cent_seconds += i128::from(input.value) * held / i128::from(CENT);
    }
    let coin_days = cent_seconds * i128::from(CENT) / i128::from(COIN) / i128::from(SECONDS_PER_DAY);
    u64::try_from(coin_days).unwrap_or(0)
}

/// Stake modifier of a block whose parent carries `prev_modifier` at `prev_time`.
///
/// The modifier is only regenerated when the block crosses into a new
/// `stake_modifier_interval`; inside an interval the parent's value carries over.
pub fn next_stake_modifier(
    prev_modifier: u64,
    prev_time: i64,
    time: i64,
    hash_proof: &Hash256,
    params: &ConsensusParams,
) -> u64 {
    let interval = params.stake_modifier_interval.max(1);
    if prev_time.div_euclid(interval) == time.div_euclid(interval) {
        return prev_modifier;
    }
    let mut encoder = Encoder::with_capacity(40);
    encoder.write_u64_le(prev_modifier);
    encoder.write_hash(hash_proof);
    let digest = sha256d(&encoder.into_inner());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Rolling checksum over the modifier chain, used to pin modifiers at checkpoints.
pub fn stake_modifier_checksum(
    prev_checksum: u32,
    proof_of_stake: bool,
    hash_proof: &Hash256,
    stake_modifier: u64,
) -> u32 {
    let mut encoder = Encoder::with_capacity(4 + 1 + 32 + 8);
    encoder.write_u32_le(prev_checksum);
    encoder.write_bool(proof_of_stake);
    encoder.write_hash(hash_proof);
    encoder.write_u64_le(stake_modifier);
    let digest = sha256d(&encoder.into_inner());
    u32::from_le_bytes([digest[28], digest[29], digest[30], digest[31]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakd_consensus::params::{consensus_params, Network};

    #[test]
    fn coin_age_skips_young_inputs() {
        let params = consensus_params(Network::Mainnet);
        let now = 10 * SECONDS_PER_DAY;
        let inputs = [
            StakeInput {
                value: 100 * COIN,
                tx_time: now - 5 * SECONDS_PER_DAY,
            },
            StakeInput {
                value: 1_000 * COIN,
                tx_time: now - 60,
            },
        ];
        assert_eq!(coin_age(&inputs, now, &params), 500);
    }

    #[test]
    fn weight_is_capped() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(coin_age_weight(0, params.stake_min_age - 1, &params), 0);
        assert_eq!(
            coin_age_weight(0, 10 * params.stake_max_age, &params),
            params.stake_max_age
        );
    }

    #[test]
    fn modifier_changes_only_across_intervals() {
        let params = consensus_params(Network::Regtest);
        let proof = [7u8; 32];
        let interval = params.stake_modifier_interval;
        assert_eq!(next_stake_modifier(42, interval, interval + 1, &proof, &params), 42);
        let next = next_stake_modifier(42, interval, 2 * interval, &proof, &params);
        assert_ne!(next, 42);
        assert_eq!(next, next_stake_modifier(42, interval, 2 * interval, &proof, &params));
    }

    #[test]
    fn kernel_rejects_young_and_backdated_stakes() {
        let params = consensus_params(Network::Regtest);
        let prevout = OutPoint::new([3u8; 32], 1);
        let input = KernelInput {
            prevout: &prevout,
            value: 1_000 * COIN,
            block_time: 10_000,
            tx_time: 10_000,
        };
        assert_eq!(
            check_stake_kernel(0, 0x207f_ffff, &input, 9_999, &params),
            Err(StakeError::TimeViolation)
        );
        assert_eq!(
            check_stake_kernel(0, 0x207f_ffff, &input, 10_000 + params.stake_min_age - 1, &params),
            Err(StakeError::MinAgeViolation)
        );
    }

    #[test]
    fn easy_target_with_weight_accepts_kernel() {
        let params = consensus_params(Network::Regtest);
        let prevout = OutPoint::new([3u8; 32], 1);
        let input = KernelInput {
            prevout: &prevout,
            value: 1_000 * COIN,
            block_time: 10_000,
            tx_time: 10_000,
        };
        let time = 10_000 + params.stake_min_age + SECONDS_PER_DAY;
        let hash = check_stake_kernel(5, 0x207f_ffff, &input, time, &params).expect("kernel");
        assert_eq!(hash, kernel_hash(5, &input, time));
    }
}
