//! Registration, ping and payment-vote messages.
//!
//! Each message signs a compact payload with the signed-message scheme: registrations
//! with the collateral key, pings and votes with the operator key.

use std::net::SocketAddr;

use stakd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use stakd_primitives::OutPoint;
use stakd_script::message::{sign_message, verify_signed_message, SignedMessageError};
use stakd_script::SecretKey;

use crate::record::read_addr;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registration {
    pub collateral: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: Vec<u8>,
    pub operator_pubkey: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: i32,
    pub signature: Vec<u8>,
}

impl Registration {
    /// `addr || sig_time || collateral_pubkey || operator_pubkey || protocol_version`
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_var_bytes(self.addr.to_string().as_bytes());
        encoder.write_i64_le(self.sig_time);
        encoder.write_var_bytes(&self.collateral_pubkey);
        encoder.write_var_bytes(&self.operator_pubkey);
        encoder.write_i32_le(self.protocol_version);
        encoder.into_inner()
    }

    pub fn sign(&mut self, collateral_key: &SecretKey) {
        self.signature = sign_message(collateral_key, &self.signed_payload(), true).to_vec();
    }

    pub fn verify(&self) -> Result<(), SignedMessageError> {
        verify_signed_message(
            &self.collateral_pubkey,
            &self.signature,
            &self.signed_payload(),
        )
    }
}

impl Encodable for Registration {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.collateral.consensus_encode(encoder);
        encoder.write_var_bytes(self.addr.to_string().as_bytes());
        encoder.write_var_bytes(&self.collateral_pubkey);
        encoder.write_var_bytes(&self.operator_pubkey);
        encoder.write_i64_le(self.sig_time);
        encoder.write_i32_le(self.protocol_version);
        encoder.write_var_bytes(&self.signature);
    }
}

impl Decodable for Registration {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            collateral: OutPoint::consensus_decode(decoder)?,
            addr: read_addr(decoder)?,
            collateral_pubkey: decoder.read_var_bytes()?,
            operator_pubkey: decoder.read_var_bytes()?,
            sig_time: decoder.read_i64_le()?,
            protocol_version: decoder.read_i32_le()?,
            signature: decoder.read_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ping {
    pub collateral: OutPoint,
    pub sig_time: i64,
    /// The operator is shutting the masternode down.
    pub stop: bool,
    pub signature: Vec<u8>,
}

impl Ping {
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(36 + 8 + 1);
        self.collateral.consensus_encode(&mut encoder);
        encoder.write_i64_le(self.sig_time);
        encoder.write_bool(self.stop);
        encoder.into_inner()
    }

    pub fn sign(&mut self, operator_key: &SecretKey) {
        self.signature = sign_message(operator_key, &self.signed_payload(), true).to_vec();
    }

    pub fn verify(&self, operator_pubkey: &[u8]) -> Result<(), SignedMessageError> {
        verify_signed_message(operator_pubkey, &self.signature, &self.signed_payload())
    }
}

impl Encodable for Ping {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.collateral.consensus_encode(encoder);
        encoder.write_i64_le(self.sig_time);
        encoder.write_bool(self.stop);
        encoder.write_var_bytes(&self.signature);
    }
}

impl Decodable for Ping {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            collateral: OutPoint::consensus_decode(decoder)?,
            sig_time: decoder.read_i64_le()?,
            stop: decoder.read_bool()?,
            signature: decoder.read_var_bytes()?,
        })
    }
}

/// A ranked masternode's claim that `payee` should be paid at `height`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentVote {
    pub voter: OutPoint,
    pub height: i32,
    pub payee: OutPoint,
    pub signature: Vec<u8>,
}

impl PaymentVote {
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(36 + 4 + 36);
        self.voter.consensus_encode(&mut encoder);
        encoder.write_i32_le(self.height);
        self.payee.consensus_encode(&mut encoder);
        encoder.into_inner()
    }

    pub fn sign(&mut self, operator_key: &SecretKey) {
        self.signature = sign_message(operator_key, &self.signed_payload(), true).to_vec();
    }

    pub fn verify(&self, operator_pubkey: &[u8]) -> Result<(), SignedMessageError> {
        verify_signed_message(operator_pubkey, &self.signature, &self.signed_payload())
    }
}

impl Encodable for PaymentVote {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.voter.consensus_encode(encoder);
        encoder.write_i32_le(self.height);
        self.payee.consensus_encode(encoder);
        encoder.write_var_bytes(&self.signature);
    }
}

impl Decodable for PaymentVote {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            voter: OutPoint::consensus_decode(decoder)?,
            height: decoder.read_i32_le()?,
            payee: OutPoint::consensus_decode(decoder)?,
            signature: decoder.read_var_bytes()?,
        })
    }
}
