//! Node configuration from `stakd.conf` and command-line flags. Flags win over the
//! file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use stakd_consensus::money::{Amount, COIN, MIN_RELAY_TX_FEE};
use stakd_consensus::Network;
use stakd_log::{Filter, Format, LogConfig};

use crate::mempool::{DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE, DEFAULT_MAX_ORPHAN_TRANSACTIONS};
use crate::peer_book::{DEFAULT_BAN_SECS, DEFAULT_BAN_THRESHOLD};

pub const CONF_FILE_NAME: &str = "stakd.conf";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub log_filter: Filter,
    pub log_format: Format,
    pub log_timestamps: bool,
    pub min_relay_fee_per_kb: Amount,
    pub limit_free_relay_kb_per_minute: u64,
    pub max_orphans: usize,
    pub ban_score: u32,
    pub ban_secs: i64,
    /// File of concatenated serialized blocks to submit at startup.
    pub import: Option<PathBuf>,
}

impl NodeConfig {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            filter: self.log_filter.clone(),
            format: self.log_format,
            timestamps: self.log_timestamps,
        }
    }

    pub fn banlist_path(&self) -> PathBuf {
        self.data_dir.join("banlist.json")
    }
}

#[derive(Debug)]
pub enum CliAction {
    Run(Box<NodeConfig>),
    PrintHelp,
    PrintVersion,
}

pub fn usage() -> String {
    [
        "Usage:",
        "  stakd [options]",
        "  stakd <command>",
        "",
        "Commands:",
        "  help                      Print this help and exit",
        "  version                   Print version and exit",
        "",
        "Options:",
        "  --network <name>          main, test or regtest (default: main)",
        "  --data-dir <path>         Data directory (default: ./data)",
        "  --conf <path>             Config file (default: <data-dir>/stakd.conf)",
        "  --log-level <filter>      Level or filter, e.g. info,stakd_masternode=debug",
        "  --log-format <fmt>        text or json",
        "  --no-log-timestamps       Omit timestamps from log lines",
        "  --min-relay-fee <amount>  Relay fee per kB, in coins or base units",
        "  --limit-free-relay <kb>   Free transaction budget per minute, in kB",
        "  --max-orphans <n>         Orphan transaction pool size",
        "  --ban-score <n>           Misbehavior score that bans a peer",
        "  --import <path>           Submit concatenated serialized blocks from a file",
    ]
    .join("\n")
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

/// Values given on the command line. `None` falls back to the config file.
#[derive(Default)]
struct Overrides {
    network: Option<Network>,
    log_filter: Option<Filter>,
    log_format: Option<Format>,
    log_timestamps: Option<bool>,
    min_relay_fee_per_kb: Option<Amount>,
    limit_free_relay_kb_per_minute: Option<u64>,
    max_orphans: Option<usize>,
    ban_score: Option<u32>,
    import: Option<PathBuf>,
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut cli = Overrides::default();
    let mut args = raw_args.into_iter().peekable();

    match args.peek().map(String::as_str) {
        Some("help") => return Ok(CliAction::PrintHelp),
        Some("version") => return Ok(CliAction::PrintVersion),
        _ => {}
    }
    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
        };
        match arg.as_str() {
            "--network" => {
                let value = value_for("--network")?;
                cli.network = Some(
                    Network::parse(&value)
                        .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?,
                );
            }
            "--data-dir" => data_dir = Some(PathBuf::from(value_for("--data-dir")?)),
            "--conf" => conf_path = Some(PathBuf::from(value_for("--conf")?)),
            "--log-level" => {
                let value = value_for("--log-level")?;
                cli.log_filter = Some(Filter::parse(&value)?);
            }
            "--log-format" => {
                let value = value_for("--log-format")?;
                cli.log_format = Some(
                    Format::parse(&value)
                        .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?,
                );
            }
            "--no-log-timestamps" => cli.log_timestamps = Some(false),
            "--min-relay-fee" => {
                let value = value_for("--min-relay-fee")?;
                cli.min_relay_fee_per_kb = Some(parse_fee_rate_per_kb(&value)?);
            }
            "--limit-free-relay" => {
                let value = value_for("--limit-free-relay")?;
                cli.limit_free_relay_kb_per_minute = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --limit-free-relay '{value}'"))?,
                );
            }
            "--max-orphans" => {
                let value = value_for("--max-orphans")?;
                cli.max_orphans = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --max-orphans '{value}'"))?,
                );
            }
            "--ban-score" => {
                let value = value_for("--ban-score")?;
                cli.ban_score = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --ban-score '{value}'"))?,
                );
            }
            "--import" => cli.import = Some(PathBuf::from(value_for("--import")?)),
            "-h" | "--help" => return Ok(CliAction::PrintHelp),
            "-V" | "--version" => return Ok(CliAction::PrintVersion),
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    let conf = load_conf(&conf_path)?.unwrap_or_default();
    let file = ConfFile {
        values: &conf,
        path: &conf_path,
    };

    let network = match cli.network {
        Some(network) => network,
        None => file.network()?,
    };
    let log_filter = match cli.log_filter {
        Some(filter) => filter,
        None => file
            .parsed("loglevel", Filter::parse)?
            .unwrap_or_else(|| Filter::new(stakd_log::Level::Info)),
    };
    let log_format = match cli.log_format {
        Some(format) => format,
        None => file
            .parsed("logformat", |raw| {
                Format::parse(raw).ok_or_else(|| "expected text or json".to_string())
            })?
            .unwrap_or(Format::Text),
    };
    let log_timestamps = match cli.log_timestamps {
        Some(value) => value,
        None => file.parsed("logtimestamps", parse_conf_bool)?.unwrap_or(true),
    };
    let min_relay_fee_per_kb = match cli.min_relay_fee_per_kb {
        Some(fee) => fee,
        None => file
            .parsed("minrelaytxfee", parse_fee_rate_per_kb)?
            .unwrap_or(MIN_RELAY_TX_FEE),
    };
    let limit_free_relay_kb_per_minute = match cli.limit_free_relay_kb_per_minute {
        Some(limit) => limit,
        None => file
            .parsed("limitfreerelay", parse_number)?
            .unwrap_or(DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE),
    };
    let max_orphans = match cli.max_orphans {
        Some(max) => max,
        None => file
            .parsed("maxorphantx", parse_number)?
            .unwrap_or(DEFAULT_MAX_ORPHAN_TRANSACTIONS),
    };
    let ban_score = match cli.ban_score {
        Some(score) => score,
        None => file
            .parsed("banscore", parse_number)?
            .unwrap_or(DEFAULT_BAN_THRESHOLD),
    };
    let ban_secs = file
        .parsed("bantime", parse_number)?
        .unwrap_or(DEFAULT_BAN_SECS);
    let import = match cli.import {
        Some(path) => Some(path),
        None => file.last("loadblock").map(PathBuf::from),
    };

    Ok(CliAction::Run(Box::new(NodeConfig {
        network,
        data_dir,
        conf_path,
        log_filter,
        log_format,
        log_timestamps,
        min_relay_fee_per_kb,
        limit_free_relay_kb_per_minute,
        max_orphans,
        ban_score,
        ban_secs,
        import,
    })))
}

struct ConfFile<'a> {
    values: &'a HashMap<String, Vec<String>>,
    path: &'a Path,
}

impl ConfFile<'_> {
    /// Repeated keys keep every value; single-valued settings use the last one.
    fn last(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    fn parsed<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<Option<T>, String> {
        let Some(raw) = self.last(key) else {
            return Ok(None);
        };
        parse(raw)
            .map(Some)
            .map_err(|err| format!("invalid {key} '{raw}' in {}: {err}", self.path.display()))
    }

    fn flag(&self, key: &str) -> Result<bool, String> {
        Ok(self.parsed(key, parse_conf_bool)?.unwrap_or(false))
    }

    fn network(&self) -> Result<Network, String> {
        if self.flag("regtest")? {
            return Ok(Network::Regtest);
        }
        if self.flag("testnet")? {
            return Ok(Network::Testnet);
        }
        Ok(Network::Mainnet)
    }
}

/// Reads `key=value` lines. `#` and `;` start comments and a bare key means `1`.
/// Returns `None` when the file does not exist.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("{}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line;
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| "expected a number".to_string())
}

/// A rate with a decimal point is in coins, otherwise in base units.
pub fn parse_fee_rate_per_kb(value: &str) -> Result<Amount, String> {
    let value = value.trim();
    if value.starts_with('-') {
        return Err("fee rate must be >= 0".to_string());
    }
    if !value.contains('.') {
        return value
            .parse::<Amount>()
            .map_err(|_| format!("invalid fee rate '{value}'"));
    }
    let (whole, frac) = value
        .split_once('.')
        .ok_or_else(|| format!("invalid fee rate '{value}'"))?;
    if frac.len() > 8 || !frac.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("invalid fee rate '{value}'"));
    }
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| format!("invalid fee rate '{value}'"))?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<8}")
            .parse()
            .map_err(|_| format!("invalid fee rate '{value}'"))?
    };
    whole
        .checked_mul(COIN)
        .and_then(|units| units.checked_add(frac_units))
        .ok_or_else(|| format!("fee rate '{value}' out of range"))
}
