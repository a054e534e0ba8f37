//! The masternode list: registration, liveness, election and payment ledgers.

use std::collections::VecDeque;

use primitive_types::U256;
use stakd_consensus::money::Amount;
use stakd_consensus::MasternodeParams;
use stakd_log::{log_debug, log_info, log_warn};
use stakd_primitives::OutPoint;
use stakd_script::standard::p2pkh_script_for_pubkey;
use stakd_storage::{Column, KeyValueStore, WriteBatch};

use crate::messages::{Ping, Registration};
use crate::record::{MasternodeRecord, MasternodeState};
use crate::score::{RankEntry, RankTable};
use crate::{ChainView, CollateralView, MasternodeError, MasternodeErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterOutcome {
    /// New record, `Active` when the collateral already has enough confirmations.
    Created(MasternodeState),
    Updated,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PingOutcome {
    Accepted,
    Ignored,
}

/// Winner of an election for one payment height.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Election {
    pub collateral: OutPoint,
    pub payee_script: Vec<u8>,
    pub score: U256,
}

#[derive(Debug)]
pub struct MasternodeRegistry {
    params: MasternodeParams,
    /// Registration order.
    records: Vec<MasternodeRecord>,
    next_order: u64,
    ranks: RankTable,
}

impl MasternodeRegistry {
    pub fn new(params: MasternodeParams) -> Self {
        Self {
            params,
            records: Vec::new(),
            next_order: 0,
            ranks: RankTable::new(),
        }
    }

    pub fn params(&self) -> &MasternodeParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MasternodeRecord] {
        &self.records
    }

    pub fn get(&self, collateral: &OutPoint) -> Option<&MasternodeRecord> {
        self.records
            .iter()
            .find(|record| &record.collateral == collateral)
    }

    fn position(&self, collateral: &OutPoint) -> Option<usize> {
        self.records
            .iter()
            .position(|record| &record.collateral == collateral)
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_active()).count()
    }

    /// Collaterals of every active record paying to `script`, in registration order.
    pub fn active_by_payee(&self, script: &[u8]) -> Vec<OutPoint> {
        self.records
            .iter()
            .filter(|record| record.is_active() && record.payee_script() == script)
            .map(|record| record.collateral.clone())
            .collect()
    }

    pub fn register(
        &mut self,
        msg: Registration,
        chain: &impl CollateralView,
        now: i64,
    ) -> Result<RegisterOutcome, MasternodeError> {
        if msg.sig_time > now + self.params.max_sig_time_drift_secs {
            return Err(MasternodeError::new(
                MasternodeErrorKind::SigTimeInFuture,
                format!("registration sig_time {} too far ahead of {now}", msg.sig_time),
            ));
        }
        if msg.protocol_version < self.params.min_protocol_version {
            return Err(MasternodeError::new(
                MasternodeErrorKind::ProtocolVersion,
                format!("protocol version {} below minimum", msg.protocol_version),
            ));
        }
        msg.verify().map_err(|err| {
            MasternodeError::new(
                MasternodeErrorKind::BadSignature,
                format!("registration for {}: {err}", msg.collateral),
            )
        })?;

        if let Some(index) = self.position(&msg.collateral) {
            let record = &mut self.records[index];
            if record.sig_time >= msg.sig_time {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::Stale,
                    format!("registration for {} is not newer", msg.collateral),
                ));
            }
            if record.state == MasternodeState::InputSpent {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::CollateralSpent,
                    format!("collateral {} already spent", msg.collateral),
                ));
            }
            if record.collateral_pubkey != msg.collateral_pubkey {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::InvalidCollateral,
                    format!("collateral key changed for {}", msg.collateral),
                ));
            }
            record.addr = msg.addr;
            record.operator_pubkey = msg.operator_pubkey;
            record.signature = msg.signature;
            record.sig_time = msg.sig_time;
            record.protocol_version = msg.protocol_version;
            log_debug!("masternode {} updated, addr {}", record.collateral, record.addr);
            return Ok(RegisterOutcome::Updated);
        }

        let info = chain.collateral(&msg.collateral)?.ok_or_else(|| {
            MasternodeError::new(
                MasternodeErrorKind::InvalidCollateral,
                format!("collateral {} missing or spent", msg.collateral),
            )
        })?;
        if info.value != self.params.collateral {
            return Err(MasternodeError::new(
                MasternodeErrorKind::InvalidCollateral,
                format!(
                    "collateral {} holds {} not {}",
                    msg.collateral, info.value, self.params.collateral
                ),
            ));
        }
        if info.script_pubkey != p2pkh_script_for_pubkey(&msg.collateral_pubkey) {
            return Err(MasternodeError::new(
                MasternodeErrorKind::InvalidCollateral,
                format!("collateral {} not owned by the registering key", msg.collateral),
            ));
        }

        let state = if info.confirmations >= self.params.min_confirmations {
            MasternodeState::Active
        } else {
            MasternodeState::Pending
        };
        let record = MasternodeRecord {
            collateral: msg.collateral,
            addr: msg.addr,
            collateral_pubkey: msg.collateral_pubkey,
            operator_pubkey: msg.operator_pubkey,
            signature: msg.signature,
            sig_time: msg.sig_time,
            last_ping: msg.sig_time,
            protocol_version: msg.protocol_version,
            state,
            registered_order: self.next_order,
            last_paid_height: 0,
            ledger: VecDeque::new(),
        };
        self.next_order += 1;
        log_info!(
            "masternode {} registered at {} ({})",
            record.collateral,
            record.addr,
            state.as_str()
        );
        self.records.push(record);
        self.ranks.clear();
        Ok(RegisterOutcome::Created(state))
    }

    pub fn ping(&mut self, msg: &Ping, now: i64) -> Result<PingOutcome, MasternodeError> {
        let Some(index) = self.position(&msg.collateral) else {
            return Err(MasternodeError::new(
                MasternodeErrorKind::UnknownMasternode,
                format!("ping for unknown masternode {}", msg.collateral),
            ));
        };
        if msg.sig_time > now + self.params.max_sig_time_drift_secs {
            return Err(MasternodeError::new(
                MasternodeErrorKind::SigTimeInFuture,
                format!("ping sig_time {} too far ahead of {now}", msg.sig_time),
            ));
        }
        let spacing = self.params.min_ping_spacing_secs;
        let record = &mut self.records[index];
        match record.state {
            MasternodeState::InputSpent => {
                return Err(MasternodeError::new(
                    MasternodeErrorKind::CollateralSpent,
                    format!("ping for spent collateral {}", msg.collateral),
                ))
            }
            MasternodeState::RemovalPending => return Ok(PingOutcome::Ignored),
            _ => {}
        }
        msg.verify(&record.operator_pubkey).map_err(|err| {
            MasternodeError::new(
                MasternodeErrorKind::BadSignature,
                format!("ping for {}: {err}", msg.collateral),
            )
        })?;
        if msg.sig_time <= record.last_ping {
            return Ok(PingOutcome::Ignored);
        }
        if !msg.stop && msg.sig_time - record.last_ping < spacing {
            return Ok(PingOutcome::Ignored);
        }

        record.last_ping = msg.sig_time;
        let next = match (msg.stop, record.state) {
            (true, _) => MasternodeState::Expired,
            (false, MasternodeState::Expired) => MasternodeState::Active,
            (false, state) => state,
        };
        if next != record.state {
            log_debug!(
                "masternode {} {} -> {}",
                record.collateral,
                record.state.as_str(),
                next.as_str()
            );
            record.state = next;
            self.ranks.clear();
        }
        Ok(PingOutcome::Accepted)
    }

    /// Periodic liveness and collateral check. Returns the number of state changes.
    pub fn check(&mut self, chain: &impl CollateralView, now: i64) -> usize {
        let mut changed = 0;
        for record in &mut self.records {
            if record.state.is_removable() {
                continue;
            }
            let next = match chain.collateral(&record.collateral) {
                Err(err) => {
                    log_warn!("skipping masternode {} this pass: {err}", record.collateral);
                    continue;
                }
                Ok(None) => MasternodeState::InputSpent,
                Ok(Some(info)) => {
                    let unseen = now - record.last_ping;
                    if unseen > self.params.removal_secs {
                        MasternodeState::RemovalPending
                    } else if unseen > self.params.expiration_secs {
                        MasternodeState::Expired
                    } else if record.state == MasternodeState::Pending
                        && info.confirmations >= self.params.min_confirmations
                    {
                        MasternodeState::Active
                    } else {
                        record.state
                    }
                }
            };
            if next != record.state {
                log_debug!(
                    "masternode {} {} -> {}",
                    record.collateral,
                    record.state.as_str(),
                    next.as_str()
                );
                record.state = next;
                changed += 1;
            }
        }
        if changed > 0 {
            self.ranks.clear();
        }
        changed
    }

    /// Drops `RemovalPending` and `InputSpent` records.
    pub fn sweep(&mut self) -> Vec<OutPoint> {
        let mut removed = Vec::new();
        self.records.retain(|record| {
            if record.state.is_removable() {
                removed.push(record.collateral.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            log_info!("swept {} masternodes", removed.len());
            self.ranks.clear();
        }
        removed
    }

    /// Height whose block hash seeds the election for `pay_height`. Offset by the
    /// vote lookahead so every height open for voting already has its seed block.
    pub fn score_height(&self, pay_height: i32) -> i32 {
        (pay_height - self.params.vote_lookahead).max(0)
    }

    pub fn score(
        &mut self,
        collateral: &OutPoint,
        pay_height: i32,
        chain: &impl ChainView,
    ) -> Option<U256> {
        self.refresh_ranks(chain);
        let anchor = self.score_height(pay_height);
        self.ranks.score(collateral, anchor, chain)
    }

    /// Blocks looked back over when counting recent payments.
    pub fn payment_window(&self) -> usize {
        self.params.min_payment_window.max(self.active_count()) * self.params.payment_rounds
    }

    /// Most payments a record may have inside the window and still be elected.
    pub fn payment_gate(&self) -> usize {
        let active = self.active_count();
        if active == 0 {
            return 0;
        }
        self.payment_window().div_ceil(active)
    }

    /// Payments to `script` over the window preceding `pay_height`, memoized until
    /// the tip moves.
    fn window_payments(&mut self, script: &[u8], pay_height: i32, chain: &impl ChainView) -> usize {
        self.refresh_ranks(chain);
        let window = self.payment_window();
        self.ranks.payment_count(pay_height, window, script, chain)
    }

    pub fn payments_in_window(
        &mut self,
        collateral: &OutPoint,
        pay_height: i32,
        chain: &impl ChainView,
    ) -> usize {
        let Some(script) = self.get(collateral).map(MasternodeRecord::payee_script) else {
            return 0;
        };
        self.window_payments(&script, pay_height, chain)
    }

    pub fn is_eligible(
        &mut self,
        collateral: &OutPoint,
        pay_height: i32,
        chain: &impl ChainView,
    ) -> bool {
        self.get(collateral).is_some_and(MasternodeRecord::is_active)
            && self.payments_in_window(collateral, pay_height, chain) <= self.payment_gate()
    }

    fn refresh_ranks(&mut self, chain: &impl ChainView) {
        let active = self.active_count();
        self.ranks.refresh(chain.tip_height(), active);
    }

    /// Highest-scoring active record passing the payment-rate gate; ties go to the
    /// earliest registration.
    pub fn select_winner(&mut self, pay_height: i32, chain: &impl ChainView) -> Option<Election> {
        self.refresh_ranks(chain);
        let anchor = self.score_height(pay_height);
        let window = self.payment_window();
        let gate = self.payment_gate();

        let mut best: Option<Election> = None;
        for record in &self.records {
            if !record.is_active() {
                continue;
            }
            let payee_script = record.payee_script();
            if self
                .ranks
                .payment_count(pay_height, window, &payee_script, chain)
                > gate
            {
                continue;
            }
            let Some(score) = self.ranks.score(&record.collateral, anchor, chain) else {
                continue;
            };
            if best.as_ref().map_or(true, |current| score > current.score) {
                best = Some(Election {
                    collateral: record.collateral.clone(),
                    payee_script,
                    score,
                });
            }
        }
        best
    }

    /// Active records ordered by recent payments, then score, then registration.
    pub fn ranks(&mut self, pay_height: i32, chain: &impl ChainView) -> Vec<RankEntry> {
        self.refresh_ranks(chain);
        if let Some(cached) = self.ranks.cached_ranks(pay_height) {
            return cached.to_vec();
        }
        let anchor = self.score_height(pay_height);
        let window = self.payment_window();

        let mut scored = Vec::new();
        for record in &self.records {
            if !record.is_active() {
                continue;
            }
            let Some(score) = self.ranks.score(&record.collateral, anchor, chain) else {
                continue;
            };
            let payments =
                self.ranks
                    .payment_count(pay_height, window, &record.payee_script(), chain);
            scored.push((payments, score, record.registered_order, record.collateral.clone()));
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));

        let entries: Vec<RankEntry> = scored
            .into_iter()
            .enumerate()
            .map(|(index, (payments_in_window, score, _, collateral))| RankEntry {
                collateral,
                rank: index + 1,
                score,
                payments_in_window,
            })
            .collect();
        self.ranks.store_ranks(pay_height, entries.clone());
        entries
    }

    pub fn rank(
        &mut self,
        collateral: &OutPoint,
        pay_height: i32,
        chain: &impl ChainView,
    ) -> Option<usize> {
        self.ranks(pay_height, chain)
            .into_iter()
            .find(|entry| &entry.collateral == collateral)
            .map(|entry| entry.rank)
    }

    pub fn record_payment(&mut self, height: i32, collateral: &OutPoint, amount: Amount) -> bool {
        let capacity = self.params.ledger_capacity;
        match self
            .records
            .iter_mut()
            .find(|record| &record.collateral == collateral)
        {
            Some(record) => {
                record.record_payment(height, amount, capacity);
                true
            }
            None => false,
        }
    }

    /// Rolls back payments recorded at `height` or above. Returns how many records changed.
    pub fn undo_payment(&mut self, height: i32) -> usize {
        self.records
            .iter_mut()
            .map(|record| record.undo_payment(height))
            .filter(|changed| *changed)
            .count()
    }

    /// Forgets memoized scores seeded by the block at `height` or above.
    pub fn invalidate_ranks(&mut self, height: i32) {
        self.ranks.invalidate_height(height);
    }

    /// Writes every record to `Column::Masternode`, deleting ones no longer listed.
    pub fn persist<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), MasternodeError> {
        let existing = store
            .scan_prefix(Column::Masternode, &[])
            .map_err(|err| MasternodeError::internal(err.to_string()))?;
        let mut batch = WriteBatch::new();
        batch.reserve(existing.len() + self.records.len());
        for (key, _) in existing {
            let listed = OutPoint::from_key(&key).is_some_and(|outpoint| self.get(&outpoint).is_some());
            if !listed {
                batch.delete(Column::Masternode, key);
            }
        }
        for record in &self.records {
            batch.put(Column::Masternode, record.collateral.key(), record.encode());
        }
        store
            .write_batch(&batch)
            .map_err(|err| MasternodeError::internal(err.to_string()))
    }

    pub fn load<S: KeyValueStore + ?Sized>(
        params: MasternodeParams,
        store: &S,
    ) -> Result<Self, MasternodeError> {
        let entries = store
            .scan_prefix(Column::Masternode, &[])
            .map_err(|err| MasternodeError::internal(err.to_string()))?;
        let mut records = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let record = MasternodeRecord::decode(&value)
                .map_err(|err| MasternodeError::internal(format!("masternode record: {err}")))?;
            records.push(record);
        }
        records.sort_by_key(|record| record.registered_order);
        let next_order = records
            .last()
            .map(|record| record.registered_order + 1)
            .unwrap_or(0);
        Ok(Self {
            params,
            records,
            next_order,
            ranks: RankTable::new(),
        })
    }
}
