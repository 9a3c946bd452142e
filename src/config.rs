//! Cache Configuration
//!
//! Connection and key-layout settings shared by every store built on one
//! sharded client. Loadable from YAML or TOML with `SHARDCACHE__*`
//! environment overrides.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_ADDRESS: &str = "127.0.0.1:6379";
const DEFAULT_KEY_PREFIX: &str = "cache";
const DEFAULT_HASHTAG_POSITION: usize = 3;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing service endpoints, comma separated
    #[serde(alias = "addr")]
    pub address: String,

    /// Root of every physical key
    #[serde(alias = "prefix", alias = "keyPrefix", alias = "keyprefix")]
    pub key_prefix: String,

    /// Length of the key suffix left outside the shard tag
    #[serde(
        alias = "hashtagPosition",
        alias = "hashtagposition",
        alias = "hashtagBoundary",
        alias = "hashtagboundary"
    )]
    pub hashtag_position: usize,

    /// Gzip every stored value
    #[serde(alias = "gzip", alias = "compressionEnabled", alias = "compressionenabled")]
    pub compression: bool,

    /// When false every read misses and writes are dropped
    pub enabled: bool,

    /// Upper bound for one remote round-trip in milliseconds
    #[serde(alias = "commandTimeoutMs", alias = "commandtimeoutms")]
    pub command_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            hashtag_position: DEFAULT_HASHTAG_POSITION,
            compression: false,
            enabled: true,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileLayout {
    #[serde(default, alias = "redis")]
    cache: CacheConfig,
}

impl CacheConfig {
    /// Load the `cache` (or `redis`) section of a YAML/TOML file.
    ///
    /// Environment variables such as `SHARDCACHE__CACHE__ADDRESS` override
    /// values from the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let layout: FileLayout = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(
                Environment::with_prefix("SHARDCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(layout.cache)
    }

    /// Endpoints parsed from the comma separated address list
    pub fn addresses(&self) -> Vec<String> {
        self.address
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_hashtag_position(mut self, position: usize) -> Self {
        self.hashtag_position = position;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
