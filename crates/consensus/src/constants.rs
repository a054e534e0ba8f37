//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// Soft cap used by the fee schedule when estimating how full the next block is.
pub const MAX_BLOCK_SIZE_GEN: u32 = MAX_BLOCK_SIZE / 2;
/// Portion of a block reserved for high-priority free transactions.
pub const DEFAULT_BLOCK_PRIORITY_SIZE: u32 = 27_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = MAX_BLOCK_SIZE / 50;
/// Largest standard transaction accepted by relay policy.
pub const MAX_STANDARD_TX_SIZE: u32 = MAX_BLOCK_SIZE_GEN / 5;
/// Coinbase scriptSig length bounds.
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;
/// Lock times below this are block heights, above are unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Number of previous blocks used for the median time past rule.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Current network protocol version for P2P messages.
pub const PROTOCOL_VERSION: i32 = 31_000;

/// Message magic used for masternode registration, ping and vote signatures.
pub const SIGNED_MESSAGE_MAGIC: &str = "Stakd Signed Message:\n";

/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Seconds in a day, used by coin-age arithmetic.
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
