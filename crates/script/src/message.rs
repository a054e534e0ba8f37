//! Signed-message and raw-hash signature helpers used by masternode messages and
//! proof-of-stake block signatures.

use stakd_consensus::constants::SIGNED_MESSAGE_MAGIC;
use stakd_consensus::Hash256;
use stakd_primitives::encoding::Encoder;
use stakd_primitives::hash::sha256d;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey, SecretKey};

use crate::secp::{secp256k1_sign, secp256k1_verify};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SignedMessageError {
    InvalidPubkey,
    InvalidSignature,
    InvalidRecoveryId,
    RecoverFailed,
    PubkeyMismatch,
}

impl std::fmt::Display for SignedMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedMessageError::InvalidPubkey => write!(f, "invalid pubkey"),
            SignedMessageError::InvalidSignature => write!(f, "invalid signature"),
            SignedMessageError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignedMessageError::RecoverFailed => write!(f, "failed to recover pubkey"),
            SignedMessageError::PubkeyMismatch => write!(f, "pubkey mismatch"),
        }
    }
}

impl std::error::Error for SignedMessageError {}

pub fn signed_message_hash(message: &[u8]) -> Hash256 {
    let mut encoder = Encoder::with_capacity(SIGNED_MESSAGE_MAGIC.len() + message.len() + 10);
    encoder.write_var_bytes(SIGNED_MESSAGE_MAGIC.as_bytes());
    encoder.write_var_bytes(message);
    sha256d(&encoder.into_inner())
}

/// 65-byte compact recoverable signature over the signed-message hash of `message`.
pub fn sign_message(secret: &SecretKey, message: &[u8], compressed: bool) -> [u8; 65] {
    let msg = Message::from_digest(signed_message_hash(message));
    let sig = secp256k1_sign().sign_ecdsa_recoverable(&msg, secret);
    encode_compact_signature(&sig, compressed)
}

pub fn verify_signed_message(
    expected_pubkey: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), SignedMessageError> {
    if expected_pubkey.is_empty() {
        return Err(SignedMessageError::InvalidPubkey);
    }
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    if compressed != (expected_pubkey.len() == 33) {
        return Err(SignedMessageError::PubkeyMismatch);
    }
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey =
        PublicKey::from_slice(expected_pubkey).map_err(|_| SignedMessageError::InvalidPubkey)?;
    secp256k1_verify()
        .verify_ecdsa(&msg, &recoverable.to_standard(), &pubkey)
        .map_err(|_| SignedMessageError::InvalidSignature)
}

pub fn recover_signed_message_pubkey(
    signature: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SignedMessageError> {
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let msg = Message::from_digest(signed_message_hash(message));
    let pubkey = secp256k1_verify()
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| SignedMessageError::RecoverFailed)?;
    if compressed {
        Ok(pubkey.serialize().to_vec())
    } else {
        Ok(pubkey.serialize_uncompressed().to_vec())
    }
}

/// DER signature (low-S) directly over `hash`.
pub fn sign_hash(secret: &SecretKey, hash: &Hash256) -> Vec<u8> {
    let msg = Message::from_digest(*hash);
    secp256k1_sign()
        .sign_ecdsa(&msg, secret)
        .serialize_der()
        .to_vec()
}

/// Verifies a DER signature over `hash`. High-S signatures are normalized first.
pub fn verify_hash_signature(
    pubkey: &[u8],
    der_signature: &[u8],
    hash: &Hash256,
) -> Result<(), SignedMessageError> {
    let pubkey = PublicKey::from_slice(pubkey).map_err(|_| SignedMessageError::InvalidPubkey)?;
    let mut sig =
        Signature::from_der(der_signature).map_err(|_| SignedMessageError::InvalidSignature)?;
    sig.normalize_s();
    secp256k1_verify()
        .verify_ecdsa(&Message::from_digest(*hash), &sig, &pubkey)
        .map_err(|_| SignedMessageError::InvalidSignature)
}

fn encode_compact_signature(sig: &RecoverableSignature, compressed: bool) -> [u8; 65] {
    let (rec_id, bytes) = sig.serialize_compact();
    let mut out = [0u8; 65];
    out[0] = 27 + rec_id.to_i32() as u8 + if compressed { 4 } else { 0 };
    out[1..].copy_from_slice(&bytes);
    out
}

fn decode_compact_signature(
    signature: &[u8],
) -> Result<(RecoverableSignature, bool), SignedMessageError> {
    if signature.len() != 65 {
        return Err(SignedMessageError::InvalidSignature);
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(SignedMessageError::InvalidSignature);
    }
    let compressed = header >= 31;
    let recovery = if compressed { header - 31 } else { header - 27 };
    let rec_id =
        RecoveryId::from_i32(recovery as i32).map_err(|_| SignedMessageError::InvalidRecoveryId)?;
    let sig = RecoverableSignature::from_compact(&signature[1..65], rec_id)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok((sig, compressed))
}
