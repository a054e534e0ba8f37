use std::collections::VecDeque;
use std::net::SocketAddr;

use stakd_consensus::money::Amount;
use stakd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use stakd_primitives::OutPoint;
use stakd_script::standard::p2pkh_script_for_pubkey;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MasternodeState {
    Pending,
    Active,
    Expired,
    InputSpent,
    RemovalPending,
}

impl MasternodeState {
    pub fn code(self) -> i32 {
        match self {
            MasternodeState::Pending => -1,
            MasternodeState::Active => 1,
            MasternodeState::Expired => 2,
            MasternodeState::InputSpent => 3,
            MasternodeState::RemovalPending => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(MasternodeState::Pending),
            1 => Some(MasternodeState::Active),
            2 => Some(MasternodeState::Expired),
            3 => Some(MasternodeState::InputSpent),
            4 => Some(MasternodeState::RemovalPending),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MasternodeState::Pending => "pending",
            MasternodeState::Active => "active",
            MasternodeState::Expired => "expired",
            MasternodeState::InputSpent => "input-spent",
            MasternodeState::RemovalPending => "removal-pending",
        }
    }

    /// States swept from the registry and never checked again.
    pub fn is_removable(self) -> bool {
        matches!(
            self,
            MasternodeState::InputSpent | MasternodeState::RemovalPending
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PaymentRecord {
    pub height: i32,
    pub amount: Amount,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasternodeRecord {
    pub collateral: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: Vec<u8>,
    pub operator_pubkey: Vec<u8>,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub last_ping: i64,
    pub protocol_version: i32,
    pub state: MasternodeState,
    pub registered_order: u64,
    pub last_paid_height: i32,
    /// Most recent payments, oldest first.
    pub ledger: VecDeque<PaymentRecord>,
}

impl MasternodeRecord {
    /// Script payments to this masternode go to: P2PKH of the collateral key.
    pub fn payee_script(&self) -> Vec<u8> {
        p2pkh_script_for_pubkey(&self.collateral_pubkey)
    }

    pub fn is_active(&self) -> bool {
        self.state == MasternodeState::Active
    }

    pub fn pay_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn pay_value(&self) -> Amount {
        self.ledger.iter().map(|payment| payment.amount).sum()
    }

    /// Mean amount per recorded payment.
    pub fn pay_rate(&self) -> Amount {
        match self.pay_count() {
            0 => 0,
            count => self.pay_value() / count as Amount,
        }
    }

    pub fn record_payment(&mut self, height: i32, amount: Amount, capacity: usize) {
        self.ledger.push_back(PaymentRecord { height, amount });
        while self.ledger.len() > capacity.max(1) {
            self.ledger.pop_front();
        }
        self.last_paid_height = self.last_paid_height.max(height);
    }

    /// Drops every payment recorded at `height` or above. Returns whether any was removed.
    pub fn undo_payment(&mut self, height: i32) -> bool {
        let before = self.ledger.len();
        self.ledger.retain(|payment| payment.height < height);
        if self.ledger.len() == before {
            return false;
        }
        self.last_paid_height = self
            .ledger
            .iter()
            .map(|payment| payment.height)
            .max()
            .unwrap_or(0);
        true
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.collateral.consensus_encode(&mut encoder);
        encoder.write_var_bytes(self.addr.to_string().as_bytes());
        encoder.write_var_bytes(&self.collateral_pubkey);
        encoder.write_var_bytes(&self.operator_pubkey);
        encoder.write_var_bytes(&self.signature);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i64_le(self.last_ping);
        encoder.write_i32_le(self.protocol_version);
        encoder.write_i32_le(self.state.code());
        encoder.write_u64_le(self.registered_order);
        encoder.write_i32_le(self.last_paid_height);
        encoder.write_varint(self.ledger.len() as u64);
        for payment in &self.ledger {
            encoder.write_i32_le(payment.height);
            encoder.write_i64_le(payment.amount);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let collateral = OutPoint::consensus_decode(&mut decoder)?;
        let addr = read_addr(&mut decoder)?;
        let collateral_pubkey = decoder.read_var_bytes()?;
        let operator_pubkey = decoder.read_var_bytes()?;
        let signature = decoder.read_var_bytes()?;
        let sig_time = decoder.read_i64_le()?;
        let last_ping = decoder.read_i64_le()?;
        let protocol_version = decoder.read_i32_le()?;
        let state = MasternodeState::from_code(decoder.read_i32_le()?)
            .ok_or(DecodeError::InvalidData("unknown masternode state"))?;
        let registered_order = decoder.read_u64_le()?;
        let last_paid_height = decoder.read_i32_le()?;
        let count = decoder.read_len()?;
        let mut ledger = VecDeque::with_capacity(count.min(64));
        for _ in 0..count {
            ledger.push_back(PaymentRecord {
                height: decoder.read_i32_le()?,
                amount: decoder.read_i64_le()?,
            });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            collateral,
            addr,
            collateral_pubkey,
            operator_pubkey,
            signature,
            sig_time,
            last_ping,
            protocol_version,
            state,
            registered_order,
            last_paid_height,
            ledger,
        })
    }
}

pub(crate) fn read_addr(decoder: &mut Decoder<'_>) -> Result<SocketAddr, DecodeError> {
    let raw = decoder.read_var_bytes()?;
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(DecodeError::InvalidData("invalid socket address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MasternodeRecord {
        MasternodeRecord {
            collateral: OutPoint::new([4u8; 32], 1),
            addr: "127.0.0.1:19999".parse().expect("addr"),
            collateral_pubkey: vec![2u8; 33],
            operator_pubkey: vec![3u8; 33],
            signature: vec![9u8; 65],
            sig_time: 1_000,
            last_ping: 1_500,
            protocol_version: 70_001,
            state: MasternodeState::Active,
            registered_order: 7,
            last_paid_height: 0,
            ledger: VecDeque::new(),
        }
    }

    #[test]
    fn state_codes_are_stable() {
        for state in [
            MasternodeState::Pending,
            MasternodeState::Active,
            MasternodeState::Expired,
            MasternodeState::InputSpent,
            MasternodeState::RemovalPending,
        ] {
            assert_eq!(MasternodeState::from_code(state.code()), Some(state));
        }
        assert_eq!(MasternodeState::Pending.code(), -1);
        assert_eq!(MasternodeState::from_code(0), None);
    }

    #[test]
    fn ledger_is_bounded_and_undo_restores_last_paid() {
        let mut record = record();
        for height in 1..=5 {
            record.record_payment(height * 10, 100, 3);
        }
        assert_eq!(record.pay_count(), 3);
        assert_eq!(record.ledger.front().map(|p| p.height), Some(30));
        assert_eq!(record.last_paid_height, 50);
        assert_eq!(record.pay_value(), 300);
        assert_eq!(record.pay_rate(), 100);

        assert!(record.undo_payment(50));
        assert_eq!(record.last_paid_height, 40);
        assert!(!record.undo_payment(60));
    }

    #[test]
    fn record_encoding_preserves_fields() {
        let mut record = record();
        record.record_payment(12, 5_000, 10);
        let decoded = MasternodeRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);

        let mut bytes = record.encode();
        bytes.push(0);
        assert_eq!(
            MasternodeRecord::decode(&bytes),
            Err(DecodeError::TrailingBytes)
        );
    }
}
