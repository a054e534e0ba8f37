//! Validation failures with a kind and a misbehavior penalty.

use std::borrow::Cow;
use std::fmt;

use stakd_masternode::{MasternodeError, MasternodeErrorKind, PaymentError};
use stakd_pow::difficulty::CompactError;
use stakd_pow::kernel::StakeError;
use stakd_pow::validation::PowError;
use stakd_primitives::encoding::DecodeError;
use stakd_script::interpreter::ScriptError;
use stakd_storage::StoreError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Malformed block or transaction; never valid in any context.
    Structural,
    /// Refused by local policy only.
    Policy,
    /// An input is unknown. Outside a block the transaction is an orphan.
    MissingInputs,
    /// Well formed but breaks a chain rule in its context.
    ConsensusViolation,
    DoubleSpend,
    Malformed,
    Internal,
}

impl ErrorKind {
    pub fn default_penalty(self) -> u32 {
        match self {
            ErrorKind::Structural | ErrorKind::ConsensusViolation => 100,
            ErrorKind::Malformed => 10,
            ErrorKind::Policy
            | ErrorKind::MissingInputs
            | ErrorKind::DoubleSpend
            | ErrorKind::Internal => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Structural => "structural",
            ErrorKind::Policy => "policy",
            ErrorKind::MissingInputs => "missing-inputs",
            ErrorKind::ConsensusViolation => "consensus",
            ErrorKind::DoubleSpend => "double-spend",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsensusError {
    pub kind: ErrorKind,
    pub reason: Cow<'static, str>,
    pub penalty: u32,
    /// The failing data is not committed to by the block hash, so a relay could have
    /// altered it. Such a failure never condemns the hash.
    pub corruption_possible: bool,
}

impl ConsensusError {
    pub fn new(kind: ErrorKind, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            penalty: kind.default_penalty(),
            corruption_possible: false,
        }
    }

    pub fn structural(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Structural, reason)
    }

    pub fn policy(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Policy, reason)
    }

    pub fn missing_inputs(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::MissingInputs, reason)
    }

    pub fn violation(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ConsensusViolation, reason)
    }

    pub fn double_spend(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::DoubleSpend, reason)
    }

    pub fn malformed(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Malformed, reason)
    }

    pub fn internal(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, reason)
    }

    pub fn with_penalty(mut self, penalty: u32) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn corruption_possible(mut self) -> Self {
        self.corruption_possible = true;
        self
    }

    /// Whether the failure condemns the block hash itself rather than its context or
    /// the copy that was relayed.
    pub fn marks_failed(&self) -> bool {
        !self.corruption_possible
            && matches!(
                self.kind,
                ErrorKind::Structural | ErrorKind::ConsensusViolation | ErrorKind::DoubleSpend
            )
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

impl std::error::Error for ConsensusError {}

impl From<StoreError> for ConsensusError {
    fn from(err: StoreError) -> Self {
        ConsensusError::internal(format!("store: {err}"))
    }
}

impl From<DecodeError> for ConsensusError {
    fn from(err: DecodeError) -> Self {
        ConsensusError::internal(format!("corrupt record: {err}"))
    }
}

impl From<ScriptError> for ConsensusError {
    fn from(err: ScriptError) -> Self {
        ConsensusError::violation(format!("script verification failed: {err}"))
    }
}

impl From<CompactError> for ConsensusError {
    fn from(err: CompactError) -> Self {
        ConsensusError::structural(format!("bad compact target: {err}"))
    }
}

impl From<PowError> for ConsensusError {
    fn from(err: PowError) -> Self {
        ConsensusError::structural(err.to_string())
    }
}

impl From<StakeError> for ConsensusError {
    fn from(err: StakeError) -> Self {
        ConsensusError::violation(format!("stake kernel: {err}"))
    }
}

impl From<MasternodeError> for ConsensusError {
    fn from(err: MasternodeError) -> Self {
        let kind = match err.kind {
            MasternodeErrorKind::Internal => ErrorKind::Internal,
            MasternodeErrorKind::BadSignature | MasternodeErrorKind::InvalidCollateral => {
                ErrorKind::ConsensusViolation
            }
            _ => ErrorKind::Policy,
        };
        ConsensusError::new(kind, err.to_string()).with_penalty(err.penalty)
    }
}

impl From<PaymentError> for ConsensusError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingPayment { .. } => ConsensusError::violation(err.to_string()),
            PaymentError::Unavailable(_) => ConsensusError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_default_penalties() {
        assert_eq!(ConsensusError::structural("x").penalty, 100);
        assert_eq!(ConsensusError::violation("x").penalty, 100);
        assert_eq!(ConsensusError::malformed("x").penalty, 10);
        assert_eq!(ConsensusError::double_spend("x").penalty, 0);
        assert_eq!(ConsensusError::policy("x").penalty, 0);
        assert_eq!(ConsensusError::missing_inputs("x").penalty, 0);
    }

    #[test]
    fn masternode_errors_keep_their_penalty() {
        let err = ConsensusError::from(MasternodeError::new(
            MasternodeErrorKind::InvalidCollateral,
            "wrong value",
        ));
        assert_eq!(err.kind, ErrorKind::ConsensusViolation);
        assert_eq!(err.penalty, 20);
        assert!(err.reason.contains("wrong value"));
    }

    #[test]
    fn missing_payment_is_penalized() {
        let err = ConsensusError::from(PaymentError::MissingPayment {
            height: 30,
            expected: 10,
        });
        assert_eq!(err.kind, ErrorKind::ConsensusViolation);
        assert_eq!(err.penalty, 100);
    }
}
