//! Chain state: block index, output set, block validation and best-chain selection.

pub mod error;
pub mod index;
pub mod inputs;
pub mod state;
pub mod utxo;
pub mod validation;

pub use error::{ConsensusError, ErrorKind};
pub use index::{BlockArena, BlockIndexNode};
pub use inputs::{CandidateSet, ConnectContext, PrevOut, UtxoView};
pub use state::{genesis_block, AcceptedBlock, ChainState, Reorganization};
pub use utxo::{SpentMarker, TxLocation, UtxoEntry};
