//! Full-node core: mempool, orphan pools, peer scoring and the [`Node`] façade.

pub mod config;
pub mod mempool;
pub mod node;
pub mod orphans;
pub mod peer_book;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use stakd_consensus::chain_params;
use stakd_consensus::money::COIN;
use stakd_consensus::params::hash256_to_hex;
use stakd_log::{log_info, log_warn};
use stakd_primitives::encoding::{Decodable, Decoder};
use stakd_primitives::Block;
use stakd_storage::memory::MemoryStore;
use stakd_storage::KeyValueStore;

pub use config::{parse_args, parse_args_from, CliAction, NodeConfig};
pub use mempool::{Mempool, MempoolError, MempoolErrorKind, MempoolPolicy};
pub use node::{BlockVerdict, NoEvents, Node, NodeEvents, RejectKind, RejectReason};
pub use orphans::OrphanPool;
pub use peer_book::PeerBook;

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

pub fn run_entry() -> Result<(), String> {
    let config = match parse_args()? {
        CliAction::Run(config) => config,
        CliAction::PrintHelp => {
            println!("{}", config::usage());
            return Ok(());
        }
        CliAction::PrintVersion => {
            println!("stakd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };
    stakd_log::init(config.log_config());
    run(&config)
}

fn run(config: &NodeConfig) -> Result<(), String> {
    let params = chain_params(config.network);
    log_info!(
        "starting stakd on {} with data dir {}",
        config.network.as_str(),
        config.data_dir.display()
    );

    let mut policy = MempoolPolicy::standard(params.require_standard);
    policy.min_relay_fee_per_kb = config.min_relay_fee_per_kb;
    policy.limit_free_relay_kb_per_minute = config.limit_free_relay_kb_per_minute;
    policy.max_orphans = config.max_orphans;

    let peers = PeerBook::new(config.ban_score, config.ban_secs);
    let now = unix_now();
    let banlist = config.banlist_path();
    match peers.load_banlist(&banlist, now) {
        Ok(0) => {}
        Ok(count) => log_info!("loaded {count} bans from {}", banlist.display()),
        Err(err) => log_warn!("ignoring ban list {}: {err}", banlist.display()),
    }

    let store = Arc::new(MemoryStore::new());
    let node = Node::open(store, params, policy, Arc::new(NoEvents)).map_err(|err| err.to_string())?;

    if let Some(path) = &config.import {
        let imported = import_blocks(&node, path)?;
        log_info!("imported {imported} blocks from {}", path.display());
    }

    let height = node.best_height().map_err(|err| err.to_string())?;
    let tip = node.best_hash().map_err(|err| err.to_string())?;
    let supply = node.money_supply().map_err(|err| err.to_string())?;
    log_info!(
        "tip {} at height {height}, money supply {}.{:08}",
        hash256_to_hex(&tip),
        supply / COIN,
        supply % COIN
    );
    node.run_maintenance(unix_now())
        .map_err(|err| err.to_string())?;

    if let Err(err) = peers.save_banlist(&banlist, unix_now()) {
        log_warn!("failed to save ban list {}: {err}", banlist.display());
    }
    Ok(())
}

/// Submits every block in a file of concatenated serialized blocks. Returns how many
/// were accepted; a rejected block is logged and skipped.
pub fn import_blocks<S: KeyValueStore>(node: &Node<S>, path: &Path) -> Result<usize, String> {
    let bytes = fs::read(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let mut decoder = Decoder::new(&bytes);
    let mut accepted = 0usize;
    while !decoder.is_empty() {
        let offset = decoder.position();
        let block = <Block as Decodable>::consensus_decode(&mut decoder)
            .map_err(|err| format!("{} at byte {offset}: {err}", path.display()))?;
        let hash = block.hash();
        match node.submit_block(block, unix_now()) {
            Ok(_) => accepted += 1,
            Err(err) => log_warn!("import skipped block {}: {err}", hash256_to_hex(&hash)),
        }
    }
    Ok(accepted)
}
