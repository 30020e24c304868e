//! summit.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of reload-and-retry attempts after a capacity conflict.
pub const DEFAULT_CAPACITY_RETRIES: u32 = 1;

/// Default lifetime of a run lock before another run may take it over.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummitConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lottery: LotteryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/summit/summit.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Fixed run seed. When absent the run timestamp is used.
    pub seed: Option<u64>,
    #[serde(default = "default_capacity_retries")]
    pub capacity_retries: u32,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            seed: None,
            capacity_retries: DEFAULT_CAPACITY_RETRIES,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_capacity_retries() -> u32 {
    DEFAULT_CAPACITY_RETRIES
}

fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl SummitConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SummitConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config: SummitConfig = toml::from_str("").unwrap();
        assert_eq!(config.lottery.capacity_retries, 1);
        assert_eq!(config.lottery.lock_ttl_secs, 3600);
        assert!(config.lottery.seed.is_none());
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[store]
path = "/tmp/summit.redb"

[lottery]
seed = 42
capacity_retries = 2
lock_ttl_secs = 60

[log]
filter = "summit=debug"
"#;
        let config: SummitConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/summit.redb"));
        assert_eq!(config.lottery.seed, Some(42));
        assert_eq!(config.lottery.capacity_retries, 2);
        assert_eq!(config.lottery.lock_ttl_secs, 60);
        assert_eq!(config.log.filter, "summit=debug");
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summit.toml");

        let mut config = SummitConfig::default();
        config.lottery.seed = Some(7);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = SummitConfig::from_file(&path).unwrap();
        assert_eq!(loaded.lottery.seed, Some(7));
        assert_eq!(loaded.store.path, config.store.path);
    }
}
