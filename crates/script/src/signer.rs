//! Input signing for single-key outputs.

use secp256k1::{PublicKey, SecretKey};
use stakd_primitives::transaction::Transaction;

use crate::message::sign_hash;
use crate::opcodes::push_data;
use crate::secp::secp256k1_sign;
use crate::sighash::{signature_hash, SighashError, SighashType};
use crate::standard::{classify_script_pubkey, ScriptType};

/// Builds the scriptSig spending `script_pubkey` (P2PKH or P2PK) at `input_index`.
/// Other script types get an empty scriptSig.
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &[u8],
    secret: &SecretKey,
    hash_type: SighashType,
) -> Result<Vec<u8>, SighashError> {
    let sighash = signature_hash(tx, input_index, script_pubkey, hash_type)?;
    let mut sig = sign_hash(secret, &sighash);
    sig.push(hash_type.0 as u8);

    let mut script_sig = Vec::with_capacity(sig.len() + 35);
    match classify_script_pubkey(script_pubkey) {
        ScriptType::P2Pkh => {
            let pubkey = PublicKey::from_secret_key(secp256k1_sign(), secret);
            push_data(&mut script_sig, &sig);
            push_data(&mut script_sig, &pubkey.serialize());
        }
        ScriptType::P2Pk => push_data(&mut script_sig, &sig),
        _ => {}
    }
    Ok(script_sig)
}

/// Compressed public key for `secret`.
pub fn public_key(secret: &SecretKey) -> [u8; 33] {
    PublicKey::from_secret_key(secp256k1_sign(), secret).serialize()
}
