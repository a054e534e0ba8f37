//! Compact target encoding, block trust and next-target calculation.

use std::cmp::Ordering;

use primitive_types::{U256, U512};
use stakd_consensus::{ConsensusParams, Hash256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    if (bits & 0x0080_0000) != 0 && word != 0 {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32))
        {
            return Err(CompactError::Overflow);
        }
        U256::from(word) << (8 * (size - 3))
    };
    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }
    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };
    // Keep the mantissa positive.
    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }
    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    Ok(compact_to_u256(bits)?.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    U256::from_little_endian(hash) <= U256::from_little_endian(target)
}

/// Compares two little-endian hashes as 256-bit numbers.
pub fn cmp_hashes(a: &Hash256, b: &Hash256) -> Ordering {
    U256::from_little_endian(a).cmp(&U256::from_little_endian(b))
}

/// Trust contributed by one block: `2^256 / (target + 1)`. Zero for an empty target.
pub fn block_trust(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    // 2^256 does not fit; (~target / (target + 1)) + 1 is the same quotient.
    let one = U256::one();
    Ok((!target / (target + one)) + one)
}

/// Height, time and bits of a block that feeds the retarget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TargetSample {
    pub height: i32,
    pub time: i64,
    pub bits: u32,
}

pub fn target_limit(params: &ConsensusParams, proof_of_stake: bool) -> U256 {
    if proof_of_stake {
        U256::from_little_endian(&params.pos_limit)
    } else {
        U256::from_little_endian(&params.pow_limit)
    }
}

/// Compact target required of the next block of the given proof type.
///
/// `last` is the most recent non-genesis block of that type and `before_last` the
/// one preceding it. Each retarget moves the target towards the spacing observed
/// between the two, smoothed over `target_timespan / target_spacing` blocks:
///
/// `new = last_target * ((n - 1) * spacing + 2 * actual) / ((n + 1) * spacing)`
///
/// The result is clamped to the network limit for that proof type.
pub fn next_target_required(
    last: Option<&TargetSample>,
    before_last: Option<&TargetSample>,
    proof_of_stake: bool,
    params: &ConsensusParams,
) -> Result<u32, CompactError> {
    let limit = target_limit(params, proof_of_stake);
    let limit_bits = u256_to_compact(limit);
    let Some(last) = last else {
        return Ok(limit_bits);
    };
    if params.pow_no_retargeting {
        return Ok(last.bits);
    }
    let Some(before_last) = before_last else {
        return Ok(limit_bits);
    };

    let spacing = params.target_spacing;
    let mut actual_spacing = last.time - before_last.time;
    if actual_spacing < 0 {
        actual_spacing = spacing;
    }
    let interval = params.retarget_interval();
    let numerator = (interval - 1) * spacing + 2 * actual_spacing;
    let denominator = (interval + 1) * spacing;

    let last_target = compact_to_u256(last.bits)?;
    let scaled: U512 = last_target.full_mul(U256::from(numerator as u64))
        / U512::from(denominator as u64);
    let next = match U256::try_from(scaled) {
        Ok(next) if !next.is_zero() && next <= limit => next,
        _ => limit,
    };
    Ok(u256_to_compact(next))
}
