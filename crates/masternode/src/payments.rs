//! Payment winners, vote processing and block payment enforcement.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use primitive_types::U256;
use stakd_consensus::money::Amount;
use stakd_consensus::{masternode_payment, MasternodeParams};
use stakd_log::{log_debug, log_warn};
use stakd_primitives::{OutPoint, TxOut};
use stakd_storage::KeyValueStore;

use crate::messages::{Ping, PaymentVote, Registration};
use crate::registry::{MasternodeRegistry, PingOutcome, RegisterOutcome};
use crate::{ChainView, CollateralView, MasternodeError, MasternodeErrorKind};

/// Accepted payee for one height.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentWinner {
    pub height: i32,
    pub collateral: OutPoint,
    pub payee_script: Vec<u8>,
    pub score: U256,
    /// Signature of the vote that set this winner; empty for a local election.
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteOutcome {
    Accepted,
    Ignored,
}

/// Output that satisfied the payment check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentMatch {
    pub payee_script: Vec<u8>,
    pub amount: Amount,
    /// Set when the payee is a listed masternode.
    pub collateral: Option<OutPoint>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PaymentError {
    MissingPayment { height: i32, expected: Amount },
    Unavailable(String),
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::MissingPayment { height, expected } => write!(
                f,
                "block {height} lacks a masternode payment of {expected}"
            ),
            PaymentError::Unavailable(message) => write!(f, "masternode list unavailable: {message}"),
        }
    }
}

impl std::error::Error for PaymentError {}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MaintenanceReport {
    pub state_changes: usize,
    pub swept: usize,
    pub pruned_winners: usize,
}

#[derive(Debug)]
struct PaymentState {
    registry: MasternodeRegistry,
    winners: BTreeMap<i32, PaymentWinner>,
}

/// The registry and the per-height winners behind one lock.
#[derive(Debug)]
pub struct PaymentConsensus {
    params: MasternodeParams,
    state: Mutex<PaymentState>,
}

impl PaymentConsensus {
    pub fn new(params: MasternodeParams) -> Self {
        Self::with_registry(MasternodeRegistry::new(params))
    }

    pub fn with_registry(registry: MasternodeRegistry) -> Self {
        Self {
            params: registry.params().clone(),
            state: Mutex::new(PaymentState {
                registry,
                winners: BTreeMap::new(),
            }),
        }
    }

    pub fn params(&self) -> &MasternodeParams {
        &self.params
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaymentState>, MasternodeError> {
        self.state
            .lock()
            .map_err(|_| MasternodeError::internal("masternode lock poisoned"))
    }

    pub fn with_registry_ref<R>(
        &self,
        f: impl FnOnce(&MasternodeRegistry) -> R,
    ) -> Result<R, MasternodeError> {
        let state = self.lock()?;
        Ok(f(&state.registry))
    }

    pub fn register(
        &self,
        msg: Registration,
        chain: &impl CollateralView,
        now: i64,
    ) -> Result<RegisterOutcome, MasternodeError> {
        self.lock()?.registry.register(msg, chain, now)
    }

    pub fn ping(&self, msg: &Ping, now: i64) -> Result<PingOutcome, MasternodeError> {
        self.lock()?.registry.ping(msg, now)
    }

    /// Winners are kept this many blocks below the tip.
    fn retention(&self, active_count: usize) -> i32 {
        let doubled = i32::try_from(active_count.saturating_mul(2)).unwrap_or(i32::MAX);
        doubled.max(self.params.min_winner_retention)
    }

    /// The voted winner for `height`, or the local election when no vote arrived.
    pub fn expected_payee(
        &self,
        height: i32,
        chain: &impl ChainView,
    ) -> Result<Option<PaymentWinner>, MasternodeError> {
        let mut state = self.lock()?;
        if let Some(winner) = state.winners.get(&height) {
            return Ok(Some(winner.clone()));
        }
        Ok(state
            .registry
            .select_winner(height, chain)
            .map(|election| PaymentWinner {
                height,
                collateral: election.collateral,
                payee_script: election.payee_script,
                score: election.score,
                signature: Vec::new(),
            }))
    }

    pub fn process_vote(
        &self,
        vote: &PaymentVote,
        chain: &impl ChainView,
    ) -> Result<VoteOutcome, MasternodeError> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let registry = &mut state.registry;

        let voter = registry.get(&vote.voter).ok_or_else(|| {
            MasternodeError::new(
                MasternodeErrorKind::UnknownMasternode,
                format!("vote from unknown masternode {}", vote.voter),
            )
        })?;
        if !voter.is_active() {
            return Err(MasternodeError::new(
                MasternodeErrorKind::VoterNotEligible,
                format!("voter {} is {}", vote.voter, voter.state.as_str()),
            ));
        }
        vote.verify(&voter.operator_pubkey).map_err(|err| {
            MasternodeError::new(
                MasternodeErrorKind::BadSignature,
                format!("vote from {}: {err}", vote.voter),
            )
        })?;

        let tip = chain.tip_height();
        let retention = self.retention(registry.active_count());
        if vote.height < tip - retention || vote.height > tip + self.params.vote_lookahead {
            log_debug!("vote for height {} outside window at tip {tip}", vote.height);
            return Ok(VoteOutcome::Ignored);
        }

        match registry.rank(&vote.voter, vote.height, chain) {
            Some(rank) if rank <= self.params.max_voter_rank => {}
            rank => {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::VoterNotEligible,
                    format!("voter {} ranked {rank:?} at {}", vote.voter, vote.height),
                ))
            }
        }

        let payee_script = match registry.get(&vote.payee) {
            Some(record) if record.is_active() => record.payee_script(),
            _ => {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::PayeeNotActive,
                    format!("payee {} is not active", vote.payee),
                ))
            }
        };
        let Some(score) = registry.score(&vote.payee, vote.height, chain) else {
            return Ok(VoteOutcome::Ignored);
        };

        if let Some(current) = state.winners.get(&vote.height) {
            if current.score >= score {
                return Ok(VoteOutcome::Ignored);
            }
        }
        log_debug!(
            "payee {} wins height {} by vote from {}",
            vote.payee,
            vote.height,
            vote.voter
        );
        state.winners.insert(
            vote.height,
            PaymentWinner {
                height: vote.height,
                collateral: vote.payee.clone(),
                payee_script,
                score,
                signature: vote.signature.clone(),
            },
        );
        Ok(VoteOutcome::Accepted)
    }

    /// Checks that a block minting `reward` pays the masternode share to a valid payee.
    ///
    /// `outputs` are the reward-paying outputs (coinbase for proof-of-work, coinstake
    /// for proof-of-stake). Below the enforcement height a missing payment is only
    /// logged.
    pub fn check_block_payment<C>(
        &self,
        height: i32,
        reward: Amount,
        outputs: &[TxOut],
        chain: &C,
    ) -> Result<Option<PaymentMatch>, PaymentError>
    where
        C: ChainView + CollateralView,
    {
        if height < self.params.payment_start_height {
            return Ok(None);
        }
        let expected = masternode_payment(reward);
        if expected <= 0 {
            return Ok(None);
        }
        let burn_script = self.params.burn_script();
        let mut state = self
            .lock()
            .map_err(|err| PaymentError::Unavailable(err.to_string()))?;

        for output in outputs.iter().filter(|output| output.value == expected) {
            let script = &output.script_pubkey;
            if *script == burn_script {
                return Ok(Some(PaymentMatch {
                    payee_script: script.clone(),
                    amount: expected,
                    collateral: None,
                }));
            }
            for collateral in state.registry.active_by_payee(script) {
                if state.registry.is_eligible(&collateral, height, chain) {
                    return Ok(Some(PaymentMatch {
                        payee_script: script.clone(),
                        amount: expected,
                        collateral: Some(collateral),
                    }));
                }
            }
            if chain.script_owns_unspent(script, self.params.collateral) {
                return Ok(Some(PaymentMatch {
                    payee_script: script.clone(),
                    amount: expected,
                    collateral: None,
                }));
            }
        }

        if height >= self.params.payment_enforce_height {
            return Err(PaymentError::MissingPayment { height, expected });
        }
        log_warn!("block {height} has no valid masternode payment of {expected}");
        Ok(None)
    }

    pub fn record_payment(
        &self,
        height: i32,
        collateral: &OutPoint,
        amount: Amount,
    ) -> Result<bool, MasternodeError> {
        Ok(self.lock()?.registry.record_payment(height, collateral, amount))
    }

    pub fn undo_payment(&self, height: i32) -> Result<usize, MasternodeError> {
        Ok(self.lock()?.registry.undo_payment(height))
    }

    pub fn invalidate_ranks(&self, height: i32) -> Result<(), MasternodeError> {
        self.lock()?.registry.invalidate_ranks(height);
        Ok(())
    }

    /// Rank of `collateral` for the block after the tip.
    pub fn rank(
        &self,
        collateral: &OutPoint,
        chain: &impl ChainView,
    ) -> Result<Option<usize>, MasternodeError> {
        let pay_height = chain.tip_height() + 1;
        Ok(self.lock()?.registry.rank(collateral, pay_height, chain))
    }

    /// Drops winners older than the retention window below `tip`.
    pub fn prune(&self, tip: i32) -> Result<usize, MasternodeError> {
        let mut state = self.lock()?;
        let cutoff = tip - self.retention(state.registry.active_count());
        let before = state.winners.len();
        state.winners.retain(|height, _| *height >= cutoff);
        Ok(before - state.winners.len())
    }

    pub fn winner_count(&self) -> Result<usize, MasternodeError> {
        Ok(self.lock()?.winners.len())
    }

    /// Liveness check, sweep and winner pruning.
    pub fn maintenance<C>(&self, chain: &C, now: i64) -> Result<MaintenanceReport, MasternodeError>
    where
        C: ChainView + CollateralView,
    {
        let (state_changes, swept) = {
            let mut state = self.lock()?;
            let changes = state.registry.check(chain, now);
            (changes, state.registry.sweep().len())
        };
        let pruned_winners = self.prune(chain.tip_height())?;
        Ok(MaintenanceReport {
            state_changes,
            swept,
            pruned_winners,
        })
    }

    pub fn persist<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), MasternodeError> {
        self.lock()?.registry.persist(store)
    }
}
