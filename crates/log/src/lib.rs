use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Default level plus per-target overrides, e.g. `info,stakd_masternode=debug`.
///
/// A target override applies to every module path starting with it; the longest
/// matching prefix wins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter {
    default: Level,
    targets: Vec<(String, Level)>,
}

impl Filter {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: &str, level: Level) -> Self {
        self.targets.retain(|(existing, _)| existing != target);
        self.targets.push((target.to_string(), level));
        self.targets
            .sort_by(|(left, _), (right, _)| right.len().cmp(&left.len()));
        self
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut filter = Filter::new(Level::Info);
        for directive in raw.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            match directive.split_once('=') {
                Some((target, level)) => {
                    let level = Level::parse(level)
                        .ok_or_else(|| format!("invalid log level in '{directive}'"))?;
                    filter = filter.with_target(target.trim(), level);
                }
                None => {
                    filter.default = Level::parse(directive)
                        .ok_or_else(|| format!("invalid log level '{directive}'"))?;
                }
            }
        }
        Ok(filter)
    }

    pub fn level_for(&self, target: &str) -> Level {
        self.targets
            .iter()
            .find(|(prefix, _)| target.starts_with(prefix.as_str()))
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }

    fn max_level(&self) -> Level {
        self.targets
            .iter()
            .map(|(_, level)| *level)
            .fold(self.default, Level::max)
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub filter: Filter,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: Filter::new(Level::Info),
            format: Format::Text,
            timestamps: true,
        }
    }
}

/// One emitted line, kept when capture is enabled.
#[derive(Clone, Debug)]
pub struct Record {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

// Cheap pre-check so disabled macros never format their arguments.
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static STDERR: AtomicBool = AtomicBool::new(true);
static FILTER: OnceLock<RwLock<Filter>> = OnceLock::new();
static CAPTURE: OnceLock<Mutex<Capture>> = OnceLock::new();

struct Capture {
    capacity: usize,
    records: VecDeque<Record>,
}

fn filter_cell() -> &'static RwLock<Filter> {
    FILTER.get_or_init(|| RwLock::new(Filter::new(Level::Info)))
}

pub fn init(config: LogConfig) {
    MAX_LEVEL.store(config.filter.max_level() as u8, Ordering::Relaxed);
    FORMAT.store(config.format as u8, Ordering::Relaxed);
    TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
    if let Ok(mut guard) = filter_cell().write() {
        *guard = config.filter;
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    STDERR.store(enabled, Ordering::Relaxed);
}

/// Starts keeping the last `capacity` records in memory.
pub fn start_capture(capacity: usize) {
    let cell = CAPTURE.get_or_init(|| {
        Mutex::new(Capture {
            capacity: 0,
            records: VecDeque::new(),
        })
    });
    if let Ok(mut capture) = cell.lock() {
        capture.capacity = capacity;
        while capture.records.len() > capacity {
            capture.records.pop_front();
        }
    }
}

/// Drains every captured record.
pub fn take_captured() -> Vec<Record> {
    let Some(cell) = CAPTURE.get() else {
        return Vec::new();
    };
    match cell.lock() {
        Ok(mut capture) => capture.records.drain(..).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn enabled(level: Level, target: &str) -> bool {
    if level as u8 > MAX_LEVEL.load(Ordering::Relaxed) {
        return false;
    }
    match filter_cell().read() {
        Ok(filter) => level <= filter.level_for(target),
        Err(_) => true,
    }
}

pub fn log(level: Level, target: &'static str, args: fmt::Arguments<'_>) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
    let msg = args.to_string();

    if STDERR.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if FORMAT.load(Ordering::Relaxed) == Format::Json as u8 {
            let line = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "target": target,
                "msg": msg,
            });
            let _ = writeln!(out, "{line}");
        } else if TIMESTAMPS.load(Ordering::Relaxed) {
            let ts = Rfc3339(now.as_secs(), now.subsec_millis());
            let _ = writeln!(out, "{ts} {:<5} {target}: {msg}", level.as_str());
        } else {
            let _ = writeln!(out, "{:<5} {target}: {msg}", level.as_str());
        }
    }

    if let Some(cell) = CAPTURE.get() {
        if let Ok(mut capture) = cell.lock() {
            if capture.capacity == 0 {
                return;
            }
            capture.records.push_back(Record {
                ts_ms,
                level,
                target,
                msg,
            });
            while capture.records.len() > capture.capacity {
                capture.records.pop_front();
            }
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level, module_path!()) {
            $crate::log($level, module_path!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Rfc3339(u64, u32);

impl fmt::Display for Rfc3339 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = (self.0 / 86_400) as i64;
        let secs = self.0 % 86_400;
        let (year, month, day) = date_from_epoch_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            self.1
        )
    }
}

// Proleptic Gregorian date for a day count since 1970-01-01 (Hinnant's algorithm).
fn date_from_epoch_days(days: i64) -> (i64, u32, u32) {
    let shifted = days + 719_468;
    let era = shifted.div_euclid(146_097);
    let day_of_era = shifted.rem_euclid(146_097);
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * month_index + 2) / 5 + 1) as u32;
    let month = (if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    }) as u32;
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
