//! The node façade: one entry point per inbound message, behind ordered locks.
//!
//! Lock order is chain, then mempool, then the masternode state inside
//! [`PaymentConsensus`]. Every mutating call takes the chain lock first and holds it
//! for its whole duration.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use stakd_chainstate::state::{AcceptedBlock, ChainState};
use stakd_chainstate::validation::check_block;
use stakd_chainstate::{BlockIndexNode, ConsensusError, ErrorKind};
use stakd_consensus::money::Amount;
use stakd_consensus::params::hash256_to_hex;
use stakd_consensus::{ChainParams, Hash256};
use stakd_log::{log_debug, log_info, log_warn};
use stakd_masternode::{
    MaintenanceReport, MasternodeError, MasternodeErrorKind, MasternodeRegistry,
    PaymentConsensus, PaymentVote, PaymentWinner, Ping, PingOutcome, RegisterOutcome,
    Registration, VoteOutcome,
};
use stakd_primitives::{Block, OutPoint, Transaction};
use stakd_storage::KeyValueStore;

use crate::mempool::{Mempool, MempoolError, MempoolErrorKind, MempoolPolicy};
use crate::orphans::OrphanPool;

pub const DEFAULT_MAX_ORPHAN_BLOCKS: usize = 750;
pub const DEFAULT_MAX_ORPHAN_BLOCK_BYTES: usize = 64 * 1024 * 1024;

/// Notifications fired while the chain lock is held. Implementations must not call
/// back into the node.
pub trait NodeEvents: Send + Sync {
    fn on_transaction_confirmed(&self, _txid: &Hash256, _height: i32) {}
    fn on_transaction_conflicted(&self, _tx: &Transaction) {}
    fn on_best_chain_changed(&self, _tip: &Hash256, _height: i32) {}
}

pub struct NoEvents;

impl NodeEvents for NoEvents {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectKind {
    Invalid,
    Policy,
    /// Waiting on an unknown parent.
    Orphan,
    Duplicate,
    Conflict,
    Internal,
}

impl RejectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectKind::Invalid => "invalid",
            RejectKind::Policy => "policy",
            RejectKind::Orphan => "orphan",
            RejectKind::Duplicate => "duplicate",
            RejectKind::Conflict => "conflict",
            RejectKind::Internal => "internal",
        }
    }
}

/// Why an inbound message was refused, and how much the sender misbehaved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RejectReason {
    pub kind: RejectKind,
    pub reason: String,
    pub penalty: u32,
}

impl RejectReason {
    pub fn internal(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Internal,
            reason: reason.into(),
            penalty: 0,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

impl std::error::Error for RejectReason {}

impl From<ConsensusError> for RejectReason {
    fn from(err: ConsensusError) -> Self {
        let kind = match err.kind {
            ErrorKind::Structural | ErrorKind::ConsensusViolation | ErrorKind::Malformed => {
                RejectKind::Invalid
            }
            ErrorKind::Policy => RejectKind::Policy,
            ErrorKind::MissingInputs => RejectKind::Orphan,
            ErrorKind::DoubleSpend => RejectKind::Conflict,
            ErrorKind::Internal => RejectKind::Internal,
        };
        Self {
            kind,
            reason: err.reason.into_owned(),
            penalty: err.penalty,
        }
    }
}

impl From<MempoolError> for RejectReason {
    fn from(err: MempoolError) -> Self {
        let kind = match err.kind {
            MempoolErrorKind::AlreadyInMempool | MempoolErrorKind::AlreadyInChain => {
                RejectKind::Duplicate
            }
            MempoolErrorKind::ConflictingInput => RejectKind::Conflict,
            MempoolErrorKind::InsufficientFee | MempoolErrorKind::NonStandard => RejectKind::Policy,
            MempoolErrorKind::MissingInput => RejectKind::Orphan,
            MempoolErrorKind::InvalidTransaction => RejectKind::Invalid,
            MempoolErrorKind::Internal => RejectKind::Internal,
        };
        Self {
            kind,
            reason: format!("{}: {}", err.kind.as_str(), err.message),
            penalty: err.penalty,
        }
    }
}

impl From<MasternodeError> for RejectReason {
    fn from(err: MasternodeError) -> Self {
        let kind = match err.kind {
            MasternodeErrorKind::BadSignature | MasternodeErrorKind::InvalidCollateral => {
                RejectKind::Invalid
            }
            MasternodeErrorKind::Stale => RejectKind::Duplicate,
            MasternodeErrorKind::Internal => RejectKind::Internal,
            MasternodeErrorKind::SigTimeInFuture
            | MasternodeErrorKind::ProtocolVersion
            | MasternodeErrorKind::UnknownMasternode
            | MasternodeErrorKind::CollateralSpent
            | MasternodeErrorKind::VoterNotEligible
            | MasternodeErrorKind::PayeeNotActive => RejectKind::Policy,
        };
        Self {
            kind,
            reason: format!("{}: {}", err.kind.as_str(), err.message),
            penalty: err.penalty,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockVerdict {
    /// The block is on the best chain.
    Connected { height: i32, reorganized: bool },
    /// Stored on a branch with less trust than the tip.
    SideChain { height: i32 },
    /// Held until its parent arrives.
    Orphan { missing_parent: Hash256 },
}

struct ChainHandle<S> {
    state: ChainState<S>,
    orphans: OrphanPool<Block>,
}

pub struct Node<S> {
    store: Arc<S>,
    chain: Mutex<ChainHandle<S>>,
    mempool: Mutex<Mempool>,
    payments: Arc<PaymentConsensus>,
    events: Arc<dyn NodeEvents>,
}

impl<S: KeyValueStore> Node<S> {
    /// Opens the chain and the persisted masternode list in `store`.
    pub fn open(
        store: Arc<S>,
        params: ChainParams,
        policy: MempoolPolicy,
        events: Arc<dyn NodeEvents>,
    ) -> Result<Self, RejectReason> {
        let registry = MasternodeRegistry::load(params.masternode.clone(), &*store)?;
        if !registry.is_empty() {
            log_info!("loaded {} masternodes", registry.len());
        }
        let payments = Arc::new(PaymentConsensus::with_registry(registry));
        let state = ChainState::new(Arc::clone(&store), params, Arc::clone(&payments))?;
        Ok(Self {
            store,
            chain: Mutex::new(ChainHandle {
                state,
                orphans: OrphanPool::new(DEFAULT_MAX_ORPHAN_BLOCKS, DEFAULT_MAX_ORPHAN_BLOCK_BYTES),
            }),
            mempool: Mutex::new(Mempool::new(policy)),
            payments,
            events,
        })
    }

    fn lock_chain(&self) -> Result<MutexGuard<'_, ChainHandle<S>>, RejectReason> {
        self.chain
            .lock()
            .map_err(|_| RejectReason::internal("chain lock poisoned"))
    }

    fn lock_mempool(&self) -> Result<MutexGuard<'_, Mempool>, RejectReason> {
        self.mempool
            .lock()
            .map_err(|_| RejectReason::internal("mempool lock poisoned"))
    }

    pub fn payments(&self) -> &Arc<PaymentConsensus> {
        &self.payments
    }

    /// Read access to the chain state under the chain lock.
    pub fn with_chain<R>(&self, f: impl FnOnce(&ChainState<S>) -> R) -> Result<R, RejectReason> {
        let chain = self.lock_chain()?;
        Ok(f(&chain.state))
    }

    pub fn submit_transaction(&self, tx: Transaction, now: i64) -> Result<Hash256, RejectReason> {
        let chain = self.lock_chain()?;
        let mut mempool = self.lock_mempool()?;
        let outcome = mempool.accept(&chain.state, tx, true, now)?;
        if !outcome.accepted_orphans.is_empty() {
            log_debug!(
                "{} orphans accepted after {}",
                outcome.accepted_orphans.len(),
                hash256_to_hex(&outcome.txid)
            );
        }
        Ok(outcome.txid)
    }

    pub fn submit_block(&self, block: Block, now: i64) -> Result<BlockVerdict, RejectReason> {
        let mut guard = self.lock_chain()?;
        let chain = &mut *guard;
        let hash = block.hash();
        let parent = block.header.prev_block;

        if chain.orphans.contains(&hash) {
            return Ok(BlockVerdict::Orphan {
                missing_parent: parent,
            });
        }
        // a child of a known-invalid block goes to the chain state, which condemns it
        let parent_failed = chain
            .state
            .node(&parent)
            .is_some_and(BlockIndexNode::is_failed);
        if !parent_failed && !chain.state.contains_block(&parent) {
            check_block(&block, &chain.state.params().consensus, now)?;
            let size = block.serialized_size();
            let evicted = chain.orphans.insert(hash, block, size, vec![parent]);
            if !evicted.is_empty() {
                log_debug!("orphan block pool full, dropped {}", evicted.len());
            }
            log_debug!(
                "orphan block {}, waiting for {}",
                hash256_to_hex(&hash),
                hash256_to_hex(&parent)
            );
            return Ok(BlockVerdict::Orphan {
                missing_parent: parent,
            });
        }

        let accepted = chain.state.accept_block(&block, now)?;
        let verdict = match &accepted.reorganization {
            Some(reorg) => BlockVerdict::Connected {
                height: accepted.height,
                reorganized: !reorg.disconnected.is_empty(),
            },
            None => BlockVerdict::SideChain {
                height: accepted.height,
            },
        };
        self.apply_accepted(&chain.state, &accepted, now)?;

        let mut queue = vec![hash];
        while let Some(parent) = queue.pop() {
            for (child_hash, child) in chain.orphans.take_children(&parent) {
                match chain.state.accept_block(&child, now) {
                    Ok(accepted) => {
                        self.apply_accepted(&chain.state, &accepted, now)?;
                        queue.push(child_hash);
                    }
                    Err(err) => {
                        log_debug!("orphan block {} rejected: {err}", hash256_to_hex(&child_hash));
                    }
                }
            }
        }
        Ok(verdict)
    }

    /// Moves the mempool along with a best-chain change.
    fn apply_accepted(
        &self,
        state: &ChainState<S>,
        accepted: &AcceptedBlock,
        now: i64,
    ) -> Result<(), RejectReason> {
        let Some(reorg) = &accepted.reorganization else {
            return Ok(());
        };
        let mut mempool = self.lock_mempool()?;
        let mut confirmed = Vec::new();
        for (offset, block) in reorg.connected.iter().enumerate() {
            let height = reorg.fork_height + 1 + offset as i32;
            let removal = mempool.remove_for_block(block);
            for txid in &removal.confirmed {
                self.events.on_transaction_confirmed(txid, height);
            }
            for tx in &removal.conflicted {
                self.events.on_transaction_conflicted(tx);
            }
            confirmed.extend(block.txids());
        }
        if !reorg.disconnected.is_empty() {
            log_info!(
                "reorganized {} blocks at fork height {}",
                reorg.disconnected.len(),
                reorg.fork_height
            );
            for tx in mempool.remove_unspendable(state)? {
                self.events.on_transaction_conflicted(&tx);
            }
            for tx in &reorg.resurrected {
                if let Err(err) = mempool.accept(state, tx.clone(), false, now) {
                    log_debug!("not resurrecting {}: {err}", hash256_to_hex(&tx.txid()));
                }
            }
        }
        mempool.process_orphans(state, &confirmed, now);
        self.events
            .on_best_chain_changed(&state.best_hash(), state.best_height());
        Ok(())
    }

    pub fn submit_vote(&self, vote: &PaymentVote) -> Result<VoteOutcome, RejectReason> {
        let chain = self.lock_chain()?;
        Ok(self.payments.process_vote(vote, &chain.state)?)
    }

    pub fn submit_registration(
        &self,
        msg: Registration,
        now: i64,
    ) -> Result<RegisterOutcome, RejectReason> {
        let chain = self.lock_chain()?;
        Ok(self.payments.register(msg, &chain.state, now)?)
    }

    pub fn submit_ping(&self, ping: &Ping, now: i64) -> Result<PingOutcome, RejectReason> {
        let _chain = self.lock_chain()?;
        Ok(self.payments.ping(ping, now)?)
    }

    pub fn best_height(&self) -> Result<i32, RejectReason> {
        Ok(self.lock_chain()?.state.best_height())
    }

    pub fn best_hash(&self) -> Result<Hash256, RejectReason> {
        Ok(self.lock_chain()?.state.best_hash())
    }

    pub fn block_by_height(&self, height: i32) -> Result<Option<Block>, RejectReason> {
        Ok(self.lock_chain()?.state.block_by_height(height)?)
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, RejectReason> {
        Ok(self.lock_chain()?.state.block_by_hash(hash)?)
    }

    pub fn money_supply(&self) -> Result<Amount, RejectReason> {
        Ok(self.lock_chain()?.state.money_supply())
    }

    /// Rank of `collateral` in the election for the block after the tip.
    pub fn masternode_rank(&self, collateral: &OutPoint) -> Result<Option<usize>, RejectReason> {
        let chain = self.lock_chain()?;
        Ok(self.payments.rank(collateral, &chain.state)?)
    }

    pub fn expected_payee(&self, height: i32) -> Result<Option<PaymentWinner>, RejectReason> {
        let chain = self.lock_chain()?;
        Ok(self.payments.expected_payee(height, &chain.state)?)
    }

    pub fn mempool_len(&self) -> Result<usize, RejectReason> {
        let _chain = self.lock_chain()?;
        Ok(self.lock_mempool()?.len())
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> Result<bool, RejectReason> {
        let _chain = self.lock_chain()?;
        Ok(self.lock_mempool()?.contains(txid))
    }

    pub fn orphan_block_count(&self) -> Result<usize, RejectReason> {
        Ok(self.lock_chain()?.orphans.len())
    }

    /// Masternode liveness check, sweep and winner prune, then persists the list.
    pub fn run_maintenance(&self, now: i64) -> Result<MaintenanceReport, RejectReason> {
        let chain = self.lock_chain()?;
        let report = self.payments.maintenance(&chain.state, now)?;
        if report.state_changes > 0 || report.swept > 0 {
            log_info!(
                "masternode maintenance: {} state changes, {} removed, {} winners pruned",
                report.state_changes,
                report.swept,
                report.pruned_winners
            );
        }
        if let Err(err) = self.payments.persist(&*self.store) {
            log_warn!("failed to persist masternode list: {err}");
            return Err(err.into());
        }
        Ok(report)
    }
}
