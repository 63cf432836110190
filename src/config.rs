use std::path::PathBuf;

use crate::auth::DEFAULT_TOKEN_TTL_SECS;
use crate::engine::ConflictMode;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const WAL_FILE_NAME: &str = "slotbook.wal";

/// Runtime settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub conflict_mode: ConflictMode,
    pub jwt_private_key: Option<String>,
    pub jwt_public_key: Option<String>,
    pub token_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            conflict_mode: ConflictMode::default(),
            jwt_private_key: None,
            jwt_public_key: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Numbers that fail to parse fall back to
    /// their defaults; an unknown conflict mode is rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let conflict_mode = match lookup("SLOTBOOK_CONFLICT_MODE") {
            Some(mode) => mode.parse()?,
            None => defaults.conflict_mode,
        };
        Ok(Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("SLOTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            conflict_mode,
            jwt_private_key: lookup("SLOTBOOK_JWT_PRIVATE_KEY"),
            jwt_public_key: lookup("SLOTBOOK_JWT_PUBLIC_KEY"),
            token_ttl_secs: lookup("SLOTBOOK_TOKEN_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.token_ttl_secs),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
