//! Monetary units and money range rules.

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;

/// No amount larger than this (in satoshi) is valid.
pub const MAX_MONEY: Amount = 10_000_000 * COIN;

/// Fee charged per started kilobyte by the minimum fee rule.
pub const MIN_TX_FEE: Amount = 10_000;
/// Fee rate below which a transaction counts as free for relay limiting.
pub const MIN_RELAY_TX_FEE: Amount = 10_000;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}
