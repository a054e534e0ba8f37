//! Script interpreter and validation.

use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::{ecdsa::Signature, Message, PublicKey};
use sha1::Sha1;
use stakd_consensus::constants::MAX_SCRIPT_SIZE;
use stakd_primitives::hash::{hash160, sha256, sha256d};
use stakd_primitives::transaction::Transaction;

use crate::opcodes::*;
use crate::secp::secp256k1_verify;
use crate::sighash::{signature_hash, SighashType};
use crate::standard::{is_p2sh, is_push_only};

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 7;

pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH;
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_LOW_S;
pub const BLOCK_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH;

const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
const MAX_OPS_PER_SCRIPT: usize = 201;
const MAX_STACK_SIZE: usize = 1000;
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;
const MAX_SCRIPT_NUM_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScriptError {
    StackUnderflow,
    EvalFalse,
    OpReturn,
    BadOpcode,
    DisabledOpcode,
    UnbalancedConditional,
    BadPush,
    PushSize,
    OpCount,
    StackSize,
    ScriptSize,
    PubkeyCount,
    SigCount,
    Verify,
    EqualVerify,
    NumEqualVerify,
    CheckSigVerify,
    CheckMultisigVerify,
    NumOverflow,
    SigEncoding,
    PubkeyEncoding,
    SigHashType,
    SigHighS,
    SigPushOnly,
    NullDummy,
    MinimalData,
    DiscourageUpgradableNops,
    CleanStack,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            ScriptError::StackUnderflow => "operation on empty stack",
            ScriptError::EvalFalse => "script evaluated to false",
            ScriptError::OpReturn => "OP_RETURN executed",
            ScriptError::BadOpcode => "invalid opcode",
            ScriptError::DisabledOpcode => "disabled opcode",
            ScriptError::UnbalancedConditional => "unbalanced conditional",
            ScriptError::BadPush => "push runs past end of script",
            ScriptError::PushSize => "push exceeds element size limit",
            ScriptError::OpCount => "operation limit exceeded",
            ScriptError::StackSize => "stack size limit exceeded",
            ScriptError::ScriptSize => "script size limit exceeded",
            ScriptError::PubkeyCount => "pubkey count out of range",
            ScriptError::SigCount => "signature count out of range",
            ScriptError::Verify => "OP_VERIFY failed",
            ScriptError::EqualVerify => "OP_EQUALVERIFY failed",
            ScriptError::NumEqualVerify => "OP_NUMEQUALVERIFY failed",
            ScriptError::CheckSigVerify => "OP_CHECKSIGVERIFY failed",
            ScriptError::CheckMultisigVerify => "OP_CHECKMULTISIGVERIFY failed",
            ScriptError::NumOverflow => "script number overflow",
            ScriptError::SigEncoding => "invalid signature encoding",
            ScriptError::PubkeyEncoding => "invalid public key encoding",
            ScriptError::SigHashType => "undefined sighash type",
            ScriptError::SigHighS => "signature s value not low",
            ScriptError::SigPushOnly => "scriptSig is not push-only",
            ScriptError::NullDummy => "multisig dummy element not null",
            ScriptError::MinimalData => "non-minimal push",
            ScriptError::DiscourageUpgradableNops => "upgradable NOP executed",
            ScriptError::CleanStack => "stack not clean after evaluation",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ScriptError {}

/// Verifies that `script_sig` satisfies `script_pubkey` for input `input_index`.
///
/// Under `SCRIPT_VERIFY_P2SH` a pay-to-script-hash output additionally requires
/// the redeem script (last item pushed by `script_sig`) to evaluate to true
/// against the remaining stack.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let checker = SignatureChecker {
        tx,
        input_index,
        flags,
    };

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, &checker)?;
    let p2sh_stack = if (flags & SCRIPT_VERIFY_P2SH) != 0 {
        Some(stack.clone())
    } else {
        None
    };

    eval_script(script_pubkey, &mut stack, &checker)?;
    if !top_is_true(&stack) {
        return Err(ScriptError::EvalFalse);
    }

    if let Some(mut p2sh_stack) = p2sh_stack.filter(|_| is_p2sh(script_pubkey)) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        let redeem_script = p2sh_stack.pop().ok_or(ScriptError::StackUnderflow)?;
        eval_script(&redeem_script, &mut p2sh_stack, &checker)?;
        if !top_is_true(&p2sh_stack) {
            return Err(ScriptError::EvalFalse);
        }
        stack = p2sh_stack;
    }

    if (flags & SCRIPT_VERIFY_CLEANSTACK) != 0 && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    Ok(())
}

struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    flags: ScriptFlags,
}

impl SignatureChecker<'_> {
    fn check_sig(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
    ) -> Result<bool, ScriptError> {
        let strict = (self.flags & SCRIPT_VERIFY_STRICTENC) != 0;
        let Some((&hash_type, der)) = sig_bytes.split_last() else {
            return Ok(false);
        };
        let hash_type = SighashType(u32::from(hash_type));
        if strict && !hash_type.is_defined() {
            return Err(ScriptError::SigHashType);
        }
        if strict && !is_compressed_or_uncompressed_pubkey(pubkey_bytes) {
            return Err(ScriptError::PubkeyEncoding);
        }

        let parsed = if strict {
            Signature::from_der(der)
        } else {
            Signature::from_der_lax(der)
        };
        let sig = match parsed {
            Ok(sig) => sig,
            Err(_) if strict => return Err(ScriptError::SigEncoding),
            Err(_) => {
                stakd_log::log_trace!("unparseable signature ({} bytes)", sig_bytes.len());
                return Ok(false);
            }
        };
        let mut normalized = sig;
        normalized.normalize_s();
        if (self.flags & SCRIPT_VERIFY_LOW_S) != 0 && normalized != sig {
            return Err(ScriptError::SigHighS);
        }

        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return Ok(false);
        };
        let Ok(sighash) = signature_hash(self.tx, self.input_index, script_code, hash_type) else {
            return Ok(false);
        };
        let msg = Message::from_digest(sighash);
        Ok(secp256k1_verify()
            .verify_ecdsa(&msg, &normalized, &pubkey)
            .is_ok())
    }
}

struct Machine<'a, 'c> {
    stack: &'a mut Vec<Vec<u8>>,
    altstack: Vec<Vec<u8>>,
    checker: &'a SignatureChecker<'c>,
}

impl Machine<'_, '_> {
    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let minimal = (self.checker.flags & SCRIPT_VERIFY_MINIMALDATA) != 0;
        decode_script_num(&self.pop()?, minimal)
    }

    fn push_num(&mut self, value: i64) {
        self.stack.push(encode_script_num(value));
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { vec![1] } else { Vec::new() });
    }

    // Item `depth` positions below the top; 0 is the top.
    fn peek(&self, depth: usize) -> Result<&Vec<u8>, ScriptError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|index| &self.stack[index])
            .ok_or(ScriptError::StackUnderflow)
    }

    fn require(&self, depth: usize) -> Result<(), ScriptError> {
        if self.stack.len() < depth {
            Err(ScriptError::StackUnderflow)
        } else {
            Ok(())
        }
    }
}

fn eval_script(
    script: &[u8],
    stack: &mut Vec<Vec<u8>>,
    checker: &SignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let flags = checker.flags;
    let mut machine = Machine {
        stack,
        altstack: Vec::new(),
        checker,
    };
    let mut cursor = 0usize;
    let mut code_start = 0usize;
    let mut exec_stack: Vec<bool> = Vec::new();
    let mut op_count = 0usize;

    while cursor < script.len() {
        let exec = exec_stack.iter().all(|branch| *branch);
        let push_start = cursor;
        let (opcode, data) = read_op(script, &mut cursor).ok_or(ScriptError::BadPush)?;

        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }
        if is_disabled(opcode) {
            return Err(ScriptError::DisabledOpcode);
        }

        if opcode <= OP_PUSHDATA4 {
            if exec {
                if (flags & SCRIPT_VERIFY_MINIMALDATA) != 0
                    && !is_minimal_push(&script[push_start..cursor], data)
                {
                    return Err(ScriptError::MinimalData);
                }
                machine.stack.push(data.to_vec());
            }
        } else if exec || (OP_IF..=OP_ENDIF).contains(&opcode) {
            match opcode {
                OP_1NEGATE => machine.push_num(-1),
                OP_1..=OP_16 => machine.push_num(i64::from(opcode - OP_1 + 1)),
                OP_NOP => {}
                OP_NOP1..=OP_NOP10 => {
                    if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0 {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                }
                OP_IF | OP_NOTIF => {
                    let mut branch = false;
                    if exec {
                        branch = cast_to_bool(&machine.pop()?);
                        if opcode == OP_NOTIF {
                            branch = !branch;
                        }
                    }
                    exec_stack.push(branch);
                }
                OP_VERIF | OP_VERNOTIF => return Err(ScriptError::BadOpcode),
                OP_ELSE => {
                    let last = exec_stack
                        .last_mut()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    *last = !*last;
                }
                OP_ENDIF => {
                    exec_stack
                        .pop()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                }
                OP_VERIFY => {
                    if !cast_to_bool(&machine.pop()?) {
                        return Err(ScriptError::Verify);
                    }
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                OP_TOALTSTACK => {
                    let item = machine.pop()?;
                    machine.altstack.push(item);
                }
                OP_FROMALTSTACK => {
                    let item = machine
                        .altstack
                        .pop()
                        .ok_or(ScriptError::StackUnderflow)?;
                    machine.stack.push(item);
                }
                OP_2DROP => {
                    machine.require(2)?;
                    machine.stack.truncate(machine.stack.len() - 2);
                }
                OP_2DUP => {
                    let (a, b) = (machine.peek(1)?.clone(), machine.peek(0)?.clone());
                    machine.stack.extend([a, b]);
                }
                OP_3DUP => {
                    let a = machine.peek(2)?.clone();
                    let b = machine.peek(1)?.clone();
                    let c = machine.peek(0)?.clone();
                    machine.stack.extend([a, b, c]);
                }
                OP_2OVER => {
                    let (a, b) = (machine.peek(3)?.clone(), machine.peek(2)?.clone());
                    machine.stack.extend([a, b]);
                }
                OP_2ROT => {
                    machine.require(6)?;
                    let start = machine.stack.len() - 6;
                    let moved: Vec<_> = machine.stack.drain(start..start + 2).collect();
                    machine.stack.extend(moved);
                }
                OP_2SWAP => {
                    machine.require(4)?;
                    let len = machine.stack.len();
                    machine.stack[len - 4..].rotate_left(2);
                }
                OP_IFDUP => {
                    let top = machine.peek(0)?.clone();
                    if cast_to_bool(&top) {
                        machine.stack.push(top);
                    }
                }
                OP_DEPTH => {
                    let depth = machine.stack.len() as i64;
                    machine.push_num(depth);
                }
                OP_DROP => {
                    machine.pop()?;
                }
                OP_DUP => {
                    let top = machine.peek(0)?.clone();
                    machine.stack.push(top);
                }
                OP_NIP => {
                    machine.require(2)?;
                    let index = machine.stack.len() - 2;
                    machine.stack.remove(index);
                }
                OP_OVER => {
                    let item = machine.peek(1)?.clone();
                    machine.stack.push(item);
                }
                OP_PICK | OP_ROLL => {
                    let depth = machine.pop_num()?;
                    let depth = usize::try_from(depth).map_err(|_| ScriptError::StackUnderflow)?;
                    let item = machine.peek(depth)?.clone();
                    if opcode == OP_ROLL {
                        let index = machine.stack.len() - depth - 1;
                        machine.stack.remove(index);
                    }
                    machine.stack.push(item);
                }
                OP_ROT => {
                    machine.require(3)?;
                    let len = machine.stack.len();
                    machine.stack[len - 3..].rotate_left(1);
                }
                OP_SWAP => {
                    machine.require(2)?;
                    let len = machine.stack.len();
                    machine.stack.swap(len - 2, len - 1);
                }
                OP_TUCK => {
                    machine.require(2)?;
                    let top = machine.peek(0)?.clone();
                    let index = machine.stack.len() - 2;
                    machine.stack.insert(index, top);
                }
                OP_SIZE => {
                    let len = machine.peek(0)?.len() as i64;
                    machine.push_num(len);
                }

                OP_EQUAL | OP_EQUALVERIFY => {
                    let b = machine.pop()?;
                    let a = machine.pop()?;
                    let equal = a == b;
                    if opcode == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::EqualVerify);
                        }
                    } else {
                        machine.push_bool(equal);
                    }
                }

                OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                    let value = machine.pop_num()?;
                    let result = match opcode {
                        OP_1ADD => value + 1,
                        OP_1SUB => value - 1,
                        OP_NEGATE => -value,
                        OP_ABS => value.abs(),
                        OP_NOT => i64::from(value == 0),
                        _ => i64::from(value != 0),
                    };
                    machine.push_num(result);
                }
                OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
                | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
                | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                    let b = machine.pop_num()?;
                    let a = machine.pop_num()?;
                    let result = match opcode {
                        OP_ADD => a + b,
                        OP_SUB => a - b,
                        OP_BOOLAND => i64::from(a != 0 && b != 0),
                        OP_BOOLOR => i64::from(a != 0 || b != 0),
                        OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                        OP_NUMNOTEQUAL => i64::from(a != b),
                        OP_LESSTHAN => i64::from(a < b),
                        OP_GREATERTHAN => i64::from(a > b),
                        OP_LESSTHANOREQUAL => i64::from(a <= b),
                        OP_GREATERTHANOREQUAL => i64::from(a >= b),
                        OP_MIN => a.min(b),
                        _ => a.max(b),
                    };
                    if opcode == OP_NUMEQUALVERIFY {
                        if result == 0 {
                            return Err(ScriptError::NumEqualVerify);
                        }
                    } else {
                        machine.push_num(result);
                    }
                }
                OP_WITHIN => {
                    let max = machine.pop_num()?;
                    let min = machine.pop_num()?;
                    let value = machine.pop_num()?;
                    machine.push_bool(min <= value && value < max);
                }

                OP_RIPEMD160 => {
                    let data = machine.pop()?;
                    machine.stack.push(Ripemd160::digest(data).to_vec());
                }
                OP_SHA1 => {
                    let data = machine.pop()?;
                    machine.stack.push(Sha1::digest(data).to_vec());
                }
                OP_SHA256 => {
                    let data = machine.pop()?;
                    machine.stack.push(sha256(&data).to_vec());
                }
                OP_HASH160 => {
                    let data = machine.pop()?;
                    machine.stack.push(hash160(&data).to_vec());
                }
                OP_HASH256 => {
                    let data = machine.pop()?;
                    machine.stack.push(sha256d(&data).to_vec());
                }
                OP_CODESEPARATOR => code_start = cursor,

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let pubkey = machine.pop()?;
                    let sig = machine.pop()?;
                    let script_code = find_and_delete(&script[code_start..], &sig);
                    let ok = checker.check_sig(&sig, &pubkey, &script_code)?;
                    if opcode == OP_CHECKSIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckSigVerify);
                        }
                    } else {
                        machine.push_bool(ok);
                    }
                }
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let ok = check_multisig(&mut machine, &script[code_start..], &mut op_count)?;
                    if opcode == OP_CHECKMULTISIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckMultisigVerify);
                        }
                    } else {
                        machine.push_bool(ok);
                    }
                }
                _ => {
                    stakd_log::log_trace!("bad opcode 0x{opcode:02x} at offset {push_start}");
                    return Err(ScriptError::BadOpcode);
                }
            }
        }

        if machine.stack.len() + machine.altstack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

fn check_multisig(
    machine: &mut Machine<'_, '_>,
    code: &[u8],
    op_count: &mut usize,
) -> Result<bool, ScriptError> {
    let key_count = machine.pop_num()?;
    if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
        return Err(ScriptError::PubkeyCount);
    }
    *op_count += key_count as usize;
    if *op_count > MAX_OPS_PER_SCRIPT {
        return Err(ScriptError::OpCount);
    }
    let mut pubkeys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        pubkeys.push(machine.pop()?);
    }
    pubkeys.reverse();

    let sig_count = machine.pop_num()?;
    if sig_count < 0 || sig_count > key_count {
        return Err(ScriptError::SigCount);
    }
    let mut sigs = Vec::with_capacity(sig_count as usize);
    for _ in 0..sig_count {
        sigs.push(machine.pop()?);
    }
    sigs.reverse();

    // Off-by-one consumption of one extra stack item.
    let dummy = machine.pop()?;
    if (machine.checker.flags & SCRIPT_VERIFY_NULLDUMMY) != 0 && !dummy.is_empty() {
        return Err(ScriptError::NullDummy);
    }

    let mut script_code = code.to_vec();
    for sig in &sigs {
        script_code = find_and_delete(&script_code, sig);
    }

    let (mut sig_index, mut key_index) = (0usize, 0usize);
    while sig_index < sigs.len() {
        if pubkeys.len() - key_index < sigs.len() - sig_index {
            return Ok(false);
        }
        if machine
            .checker
            .check_sig(&sigs[sig_index], &pubkeys[key_index], &script_code)?
        {
            sig_index += 1;
        }
        key_index += 1;
    }
    Ok(true)
}

fn is_disabled(opcode: u8) -> bool {
    matches!(
        opcode,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

// Removes every canonical push of `sig` from `script`.
fn find_and_delete(script: &[u8], sig: &[u8]) -> Vec<u8> {
    if sig.is_empty() {
        return script.to_vec();
    }
    let mut needle = Vec::with_capacity(sig.len() + 5);
    push_data(&mut needle, sig);

    let mut out = Vec::with_capacity(script.len());
    let mut cursor = 0;
    while cursor < script.len() {
        let start = cursor;
        if read_op(script, &mut cursor).is_none() {
            out.extend_from_slice(&script[start..]);
            break;
        }
        if script[start..cursor] != needle[..] {
            out.extend_from_slice(&script[start..cursor]);
        }
    }
    out
}

fn top_is_true(stack: &[Vec<u8>]) -> bool {
    stack.last().is_some_and(|top| cast_to_bool(top))
}

fn cast_to_bool(data: &[u8]) -> bool {
    match data.iter().rposition(|byte| *byte != 0) {
        None => false,
        // Negative zero.
        Some(index) => !(index == data.len() - 1 && data[index] == 0x80),
    }
}

fn decode_script_num(data: &[u8], require_minimal: bool) -> Result<i64, ScriptError> {
    if data.len() > MAX_SCRIPT_NUM_SIZE {
        return Err(ScriptError::NumOverflow);
    }
    let Some(&last) = data.last() else {
        return Ok(0);
    };
    if require_minimal
        && (last & 0x7f) == 0
        && (data.len() == 1 || (data[data.len() - 2] & 0x80) == 0)
    {
        return Err(ScriptError::MinimalData);
    }
    let mut result: i64 = 0;
    for (index, byte) in data.iter().enumerate() {
        result |= i64::from(*byte) << (8 * index);
    }
    if (last & 0x80) != 0 {
        result &= !(0x80i64 << (8 * (data.len() - 1)));
        result = -result;
    }
    Ok(result)
}

fn encode_script_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    match out.last_mut() {
        Some(last) if (*last & 0x80) != 0 => out.push(if negative { 0x80 } else { 0 }),
        Some(last) if negative => *last |= 0x80,
        _ => {}
    }
    out
}

fn is_compressed_or_uncompressed_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

// `encoded` is the full push (opcode plus length prefix plus data).
fn is_minimal_push(encoded: &[u8], data: &[u8]) -> bool {
    let opcode = encoded[0];
    match data {
        [] => opcode == OP_0,
        [value @ 1..=16] => opcode == OP_1 + value - 1,
        [0x81] => opcode == OP_1NEGATE,
        _ => {
            let mut canonical = Vec::with_capacity(encoded.len());
            push_data(&mut canonical, data);
            canonical == encoded
        }
    }
}
