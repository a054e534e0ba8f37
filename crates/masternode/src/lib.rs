//! Masternode registry, deterministic election and payment consensus.
//!
//! The crate never touches chain storage directly. Block hashes, recorded payees and
//! collateral outputs are read through [`ChainView`] and [`CollateralView`], which the
//! chain state implements.

pub mod messages;
pub mod payments;
pub mod record;
pub mod registry;
pub mod score;

use std::fmt;

use stakd_consensus::money::Amount;
use stakd_consensus::Hash256;
use stakd_primitives::OutPoint;

pub use messages::{Ping, PaymentVote, Registration};
pub use payments::{
    MaintenanceReport, PaymentConsensus, PaymentError, PaymentMatch, PaymentWinner, VoteOutcome,
};
pub use record::{MasternodeRecord, MasternodeState, PaymentRecord};
pub use registry::{Election, MasternodeRegistry, PingOutcome, RegisterOutcome};
pub use score::{calculate_score, RankEntry, RankTable};
pub use primitive_types::U256;

/// Best-chain data the election reads.
pub trait ChainView {
    fn tip_height(&self) -> i32;
    fn block_hash(&self, height: i32) -> Option<Hash256>;
    /// Masternode payee script recorded when the block at `height` connected.
    fn payee_at(&self, height: i32) -> Option<Vec<u8>>;
}

/// Unspent output backing a masternode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CollateralInfo {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub confirmations: i32,
}

pub trait CollateralView {
    /// The output at `outpoint` if it exists and is unspent. An error means the lookup
    /// itself failed and says nothing about the output.
    fn collateral(&self, outpoint: &OutPoint) -> Result<Option<CollateralInfo>, MasternodeError>;
    /// Whether `script` owns an unspent output of exactly `value`.
    fn script_owns_unspent(&self, script: &[u8], value: Amount) -> bool;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MasternodeErrorKind {
    SigTimeInFuture,
    ProtocolVersion,
    BadSignature,
    /// A message no newer than the state it would replace.
    Stale,
    UnknownMasternode,
    InvalidCollateral,
    CollateralSpent,
    VoterNotEligible,
    PayeeNotActive,
    Internal,
}

impl MasternodeErrorKind {
    pub fn default_penalty(self) -> u32 {
        match self {
            MasternodeErrorKind::BadSignature => 100,
            MasternodeErrorKind::InvalidCollateral => 20,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MasternodeErrorKind::SigTimeInFuture => "sig-time-in-future",
            MasternodeErrorKind::ProtocolVersion => "protocol-version",
            MasternodeErrorKind::BadSignature => "bad-signature",
            MasternodeErrorKind::Stale => "stale",
            MasternodeErrorKind::UnknownMasternode => "unknown-masternode",
            MasternodeErrorKind::InvalidCollateral => "invalid-collateral",
            MasternodeErrorKind::CollateralSpent => "collateral-spent",
            MasternodeErrorKind::VoterNotEligible => "voter-not-eligible",
            MasternodeErrorKind::PayeeNotActive => "payee-not-active",
            MasternodeErrorKind::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasternodeError {
    pub kind: MasternodeErrorKind,
    pub penalty: u32,
    pub message: String,
}

impl MasternodeError {
    pub fn new(kind: MasternodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            penalty: kind.default_penalty(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(MasternodeErrorKind::Internal, message)
    }
}

impl fmt::Display for MasternodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for MasternodeError {}
