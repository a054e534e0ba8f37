use primitive_types::U256;
use stakd_consensus::{ConsensusParams, Hash256};

use crate::difficulty::{compact_to_u256, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    InvalidBits(&'static str),
    HashAboveTarget,
    Compact(CompactError),
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::HashAboveTarget => write!(f, "proof-of-work hash does not meet target"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

/// Checks that `hash` meets the target encoded by `bits` and that the target is
/// within the network's proof-of-work limit.
pub fn check_proof_of_work(
    hash: &Hash256,
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("proof-of-work target is zero"));
    }
    if target > U256::from_little_endian(&params.pow_limit) {
        return Err(PowError::InvalidBits("proof-of-work target above limit"));
    }
    if U256::from_little_endian(hash) > target {
        return Err(PowError::HashAboveTarget);
    }
    Ok(())
}
