//! Misbehavior scores and bans for remote peers.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use stakd_log::log_info;

pub const DEFAULT_BAN_THRESHOLD: u32 = 100;
pub const DEFAULT_BAN_SECS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BannedPeerInfo {
    pub addr: SocketAddr,
    /// Unix seconds.
    pub banned_until: i64,
}

#[derive(Debug, Deserialize, Serialize)]
struct BanListFile {
    version: u32,
    banned: Vec<BanListEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
struct BanListEntry {
    addr: SocketAddr,
    banned_until: i64,
}

const BANLIST_VERSION: u32 = 1;

pub struct PeerBook {
    ban_threshold: u32,
    ban_secs: i64,
    scores: Mutex<HashMap<SocketAddr, u32>>,
    banned: Mutex<HashMap<SocketAddr, i64>>,
}

impl Default for PeerBook {
    fn default() -> Self {
        Self::new(DEFAULT_BAN_THRESHOLD, DEFAULT_BAN_SECS)
    }
}

impl PeerBook {
    pub fn new(ban_threshold: u32, ban_secs: i64) -> Self {
        Self {
            ban_threshold,
            ban_secs,
            scores: Mutex::new(HashMap::new()),
            banned: Mutex::new(HashMap::new()),
        }
    }

    pub fn score(&self, addr: SocketAddr) -> u32 {
        self.scores
            .lock()
            .ok()
            .and_then(|scores| scores.get(&addr).copied())
            .unwrap_or(0)
    }

    /// Adds `delta` to the peer's score. Returns true when this pushed the peer over
    /// the threshold and it is now banned.
    pub fn record_misbehavior(&self, addr: SocketAddr, delta: u32, now: i64) -> bool {
        if delta == 0 {
            return false;
        }
        let score = {
            let Ok(mut scores) = self.scores.lock() else {
                return false;
            };
            let entry = scores.entry(addr).or_insert(0);
            *entry = entry.saturating_add(delta);
            *entry
        };
        if score < self.ban_threshold {
            return false;
        }
        log_info!("banning {addr}: misbehavior score {score}");
        self.ban_for(addr, self.ban_secs, now);
        if let Ok(mut scores) = self.scores.lock() {
            scores.remove(&addr);
        }
        true
    }

    pub fn ban_for(&self, addr: SocketAddr, secs: i64, now: i64) {
        if let Ok(mut banned) = self.banned.lock() {
            banned.insert(addr, now.saturating_add(secs));
        }
    }

    pub fn is_banned(&self, addr: SocketAddr, now: i64) -> bool {
        let Ok(mut banned) = self.banned.lock() else {
            return false;
        };
        match banned.get(&addr).copied() {
            Some(until) if until > now => true,
            Some(_) => {
                banned.remove(&addr);
                false
            }
            None => false,
        }
    }

    pub fn unban(&self, addr: SocketAddr) -> bool {
        self.banned
            .lock()
            .map(|mut banned| banned.remove(&addr).is_some())
            .unwrap_or(false)
    }

    /// Active bans, expired ones dropped.
    pub fn banned_peers(&self, now: i64) -> Vec<BannedPeerInfo> {
        let Ok(mut banned) = self.banned.lock() else {
            return Vec::new();
        };
        banned.retain(|_, until| *until > now);
        let mut out: Vec<BannedPeerInfo> = banned
            .iter()
            .map(|(addr, until)| BannedPeerInfo {
                addr: *addr,
                banned_until: *until,
            })
            .collect();
        out.sort_by_key(|info| info.addr.to_string());
        out
    }

    /// Loads unexpired bans from `path`. A missing file is an empty list.
    pub fn load_banlist(&self, path: &Path, now: i64) -> Result<usize, String> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.to_string()),
        };
        let file: BanListFile =
            serde_json::from_slice(&bytes).map_err(|err| format!("invalid banlist: {err}"))?;
        if file.version != BANLIST_VERSION {
            return Err(format!(
                "unsupported banlist version {} (expected {})",
                file.version, BANLIST_VERSION
            ));
        }
        let mut inserted = 0usize;
        if let Ok(mut banned) = self.banned.lock() {
            for entry in file.banned.into_iter().filter(|entry| entry.banned_until > now) {
                banned.insert(entry.addr, entry.banned_until);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub fn save_banlist(&self, path: &Path, now: i64) -> Result<(), String> {
        let banned = self
            .banned_peers(now)
            .into_iter()
            .map(|info| BanListEntry {
                addr: info.addr,
                banned_until: info.banned_until,
            })
            .collect();
        let file = BanListFile {
            version: BANLIST_VERSION,
            banned,
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|err| err.to_string())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|err| err.to_string())?;
        if fs::rename(&tmp, path).is_err() {
            let _ = fs::remove_file(path);
            fs::rename(&tmp, path).map_err(|err| err.to_string())?;
        }
        Ok(())
    }
}
