//! Compact targets, chain trust, retargeting and the proof-of-stake kernel.

pub mod difficulty;
pub mod kernel;
pub mod validation;

pub use primitive_types::U256;
