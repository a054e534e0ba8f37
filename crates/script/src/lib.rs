//! Script verification, legacy sighash and key helpers.

pub mod interpreter;
pub mod message;
pub mod opcodes;
mod secp;
pub mod sighash;
pub mod signer;
pub mod standard;

pub use secp256k1::SecretKey;
