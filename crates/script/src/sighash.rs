//! Legacy signature hashing for transparent inputs.

use stakd_consensus::Hash256;
use stakd_primitives::encoding::{Encodable, Encoder};
use stakd_primitives::hash::sha256d;
use stakd_primitives::transaction::{Transaction, TxIn, TxOut};

use crate::opcodes::{read_op, OP_CODESEPARATOR};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Returned for `SIGHASH_SINGLE` without a matching output. Signatures over it are
/// valid and commit to nothing.
pub const SIGHASH_ONE: Hash256 = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }

    pub fn is_defined(self) -> bool {
        matches!(
            self.0 & !SIGHASH_ANYONECANPAY,
            SIGHASH_ALL | SIGHASH_NONE | SIGHASH_SINGLE
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SighashError {
    InputIndexOutOfRange { index: usize, inputs: usize },
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange { index, inputs } => {
                write!(f, "input index {index} out of range ({inputs} inputs)")
            }
        }
    }
}

impl std::error::Error for SighashError {}

/// Hash signed by input `input_index` spending an output locked by `script_code`.
///
/// The transaction is copied with every scriptSig blanked except the signing
/// input's, which carries `script_code` minus its `OP_CODESEPARATOR`s; the hash
/// type then prunes inputs and outputs before the copy and the 4-byte type are
/// double-SHA256'd.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange {
            index: input_index,
            inputs: tx.vin.len(),
        });
    }
    let base = sighash_type.base_type();
    if base == SIGHASH_SINGLE && input_index >= tx.vout.len() {
        return Ok(SIGHASH_ONE);
    }

    let script_code = strip_code_separators(script_code);
    let blank_other_sequences = base == SIGHASH_NONE || base == SIGHASH_SINGLE;

    let signing_input = |input: &TxIn| TxIn {
        prevout: input.prevout.clone(),
        script_sig: script_code.clone(),
        sequence: input.sequence,
    };

    let vin: Vec<TxIn> = if sighash_type.has_anyone_can_pay() {
        vec![signing_input(&tx.vin[input_index])]
    } else {
        tx.vin
            .iter()
            .enumerate()
            .map(|(index, input)| {
                if index == input_index {
                    signing_input(input)
                } else {
                    TxIn {
                        prevout: input.prevout.clone(),
                        script_sig: Vec::new(),
                        sequence: if blank_other_sequences {
                            0
                        } else {
                            input.sequence
                        },
                    }
                }
            })
            .collect()
    };

    let vout: Vec<TxOut> = match base {
        SIGHASH_NONE => Vec::new(),
        SIGHASH_SINGLE => tx.vout[..=input_index]
            .iter()
            .enumerate()
            .map(|(index, output)| {
                if index == input_index {
                    output.clone()
                } else {
                    TxOut::new(-1, Vec::new())
                }
            })
            .collect(),
        _ => tx.vout.clone(),
    };

    let copy = Transaction {
        version: tx.version,
        time: tx.time,
        vin,
        vout,
        lock_time: tx.lock_time,
    };
    let mut encoder = Encoder::with_capacity(copy.serialized_size() + 4);
    Encodable::consensus_encode(&copy, &mut encoder);
    encoder.write_u32_le(sighash_type.0);
    Ok(sha256d(&encoder.into_inner()))
}

/// Removes every `OP_CODESEPARATOR` opcode, leaving pushed bytes that happen to
/// equal it untouched. A truncated trailing push is kept verbatim.
pub fn strip_code_separators(script: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(script.len());
    let mut cursor = 0;
    while cursor < script.len() {
        let start = cursor;
        match read_op(script, &mut cursor) {
            Some((OP_CODESEPARATOR, _)) => {}
            Some(_) => out.extend_from_slice(&script[start..cursor]),
            None => {
                out.extend_from_slice(&script[start..]);
                break;
            }
        }
    }
    out
}
