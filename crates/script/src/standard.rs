//! Output script templates, standardness policy and legacy sig-op counting.

use stakd_primitives::hash::hash160;

use crate::opcodes::{
    push_data, read_op, small_int, OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG,
    OP_CHECKSIGVERIFY, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_RETURN, OP_16,
};

/// Largest `OP_RETURN` payload relayed as standard.
pub const MAX_NULL_DATA_SIZE: usize = 80;
/// Largest standard scriptSig; enough for a 15-of-15 P2SH multisig spend.
pub const MAX_STANDARD_SCRIPT_SIG_SIZE: usize = 1650;
/// Sig-op weight of an unparsed `OP_CHECKMULTISIG`.
pub const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Multisig,
    NullData,
    Unknown,
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if p2pkh_hash(script).is_some() {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if p2pk_pubkey(script).is_some() {
        ScriptType::P2Pk
    } else if is_null_data(script) {
        ScriptType::NullData
    } else if is_bare_multisig(script) {
        ScriptType::Multisig
    } else {
        ScriptType::Unknown
    }
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2pkh_script_for_pubkey(pubkey: &[u8]) -> Vec<u8> {
    p2pkh_script(&hash160(pubkey))
}

pub fn p2pk_script(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(pubkey.len() + 2);
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

pub fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Some(hash)
    } else {
        None
    }
}

pub fn p2pk_pubkey(script: &[u8]) -> Option<&[u8]> {
    let key_len = match script.first().copied() {
        Some(len @ (33 | 65)) => len as usize,
        _ => return None,
    };
    if script.len() == key_len + 2 && script[key_len + 1] == OP_CHECKSIG {
        Some(&script[1..=key_len])
    } else {
        None
    }
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Output that can never be spent; its value leaves the money supply.
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

fn is_null_data(script: &[u8]) -> bool {
    if !is_unspendable(script) || script.len() > MAX_NULL_DATA_SIZE + 3 {
        return false;
    }
    is_push_only(&script[1..])
}

fn is_bare_multisig(script: &[u8]) -> bool {
    let mut cursor = 0;
    let Some(required) = read_op(script, &mut cursor).and_then(|(op, _)| small_int(op)) else {
        return false;
    };
    let mut keys = 0u8;
    loop {
        match read_op(script, &mut cursor) {
            Some((_, data)) if data.len() == 33 || data.len() == 65 => keys += 1,
            Some((op, data)) if data.is_empty() => {
                let Some(total) = small_int(op) else {
                    return false;
                };
                return required >= 1
                    && required <= total
                    && total == keys
                    && total <= 3
                    && read_op(script, &mut cursor) == Some((OP_CHECKMULTISIG, &[][..]))
                    && cursor == script.len();
            }
            _ => return false,
        }
    }
}

/// True when the script consists only of data pushes and small-integer opcodes.
pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0;
    while cursor < script.len() {
        match read_op(script, &mut cursor) {
            Some((opcode, _)) if opcode <= OP_16 => {}
            _ => return false,
        }
    }
    true
}

pub fn is_standard_script_pubkey(script: &[u8]) -> bool {
    !matches!(classify_script_pubkey(script), ScriptType::Unknown)
}

pub fn is_standard_script_sig(script: &[u8]) -> bool {
    script.len() <= MAX_STANDARD_SCRIPT_SIG_SIZE && is_push_only(script)
}

/// Legacy sig-op count. With `accurate`, `OP_n OP_CHECKMULTISIG` counts `n` instead
/// of the worst case; used when counting the redeem script of a P2SH spend.
pub fn legacy_sigop_count(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut cursor = 0;
    let mut last_opcode = 0xffu8;
    while cursor < script.len() {
        let Some((opcode, _)) = read_op(script, &mut cursor) else {
            break;
        };
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match small_int(last_opcode) {
                    Some(keys) if accurate && keys > 0 => u32::from(keys),
                    _ => MAX_PUBKEYS_PER_MULTISIG,
                };
            }
            _ => {}
        }
        last_opcode = opcode;
    }
    count
}

/// Sig-ops of the redeem script pushed last by `script_sig`, when `script_pubkey`
/// is P2SH.
pub fn p2sh_sigop_count(script_pubkey: &[u8], script_sig: &[u8]) -> u32 {
    if !is_p2sh(script_pubkey) {
        return 0;
    }
    let mut cursor = 0;
    let mut redeem: &[u8] = &[];
    while cursor < script_sig.len() {
        match read_op(script_sig, &mut cursor) {
            Some((opcode, data)) if opcode <= OP_16 => redeem = data,
            _ => return 0,
        }
    }
    legacy_sigop_count(redeem, true)
}
