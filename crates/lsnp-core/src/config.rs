//! Configuration system for the LSNP peer.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LSNP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lsnp/config.toml
//!   3. ~/.config/lsnp/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LsnpConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Short handle used in the full `user@ip` id.
    pub user: String,
    /// Human-readable name advertised over mDNS and PROFILE.
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP listen port.
    pub port: u16,
    /// Directed broadcast address override. Empty = derive /24 from own IP.
    pub broadcast_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for received files: `<data_dir>/<sender>/downloads/<filename>`.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// First retry delay; attempt n waits `base × 2^n`.
    pub retry_base_secs: u64,
    /// Retransmissions after the initial send.
    pub retry_max_attempts: u32,
    /// PROFILE broadcast / PING sweep period.
    pub broadcast_period_secs: u64,
    /// Lifetime of minted tokens.
    pub token_ttl_secs: u64,
    /// Default TTL stamped into POSTs. Adjustable at runtime via `ttl`.
    pub post_ttl_secs: u32,
    /// How long a FILE_OFFER waits for accept/reject.
    pub offer_timeout_secs: u64,
    /// Abort a receiving transfer after this long without a chunk.
    pub transfer_stall_secs: u64,
    /// Pause between outgoing FILE_CHUNKs.
    pub chunk_delay_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: whoami(),
            display_name: "Anonymous".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 50999,
            broadcast_addr: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lsnp_data"),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            retry_base_secs: 2,
            retry_max_attempts: 3,
            broadcast_period_secs: 300,
            token_ttl_secs: 600,
            post_ttl_secs: 60,
            offer_timeout_secs: 60,
            transfer_stall_secs: 60,
            chunk_delay_ms: 100,
        }
    }
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anon".to_string())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LsnpConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            LsnpConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LSNP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply LSNP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LSNP_IDENTITY__USER") {
            self.identity.user = v;
        }
        if let Ok(v) = std::env::var("LSNP_IDENTITY__DISPLAY_NAME") {
            self.identity.display_name = v;
        }
        if let Ok(v) = std::env::var("LSNP_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("LSNP_NETWORK__BROADCAST_ADDR") {
            self.network.broadcast_addr = v;
        }
        if let Ok(v) = std::env::var("LSNP_STORAGE__DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LSNP_TIMING__BROADCAST_PERIOD_SECS") {
            if let Ok(p) = v.parse() {
                self.timing.broadcast_period_secs = p;
            }
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("lsnp")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_constants() {
        let config = LsnpConfig::default();
        assert_eq!(config.network.port, 50999);
        assert_eq!(config.timing.retry_base_secs, 2);
        assert_eq!(config.timing.retry_max_attempts, 3);
        assert_eq!(config.timing.broadcast_period_secs, 300);
        assert_eq!(config.timing.token_ttl_secs, 600);
    }

    #[test]
    fn config_parses_partial_toml() {
        let config: LsnpConfig = toml::from_str(
            r#"
            [identity]
            user = "alice"
            display_name = "Alice"

            [network]
            port = 51000
            "#,
        )
        .unwrap();
        assert_eq!(config.identity.user, "alice");
        assert_eq!(config.network.port, 51000);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.timing.post_ttl_secs, 60);
        assert_eq!(config.storage.data_dir, PathBuf::from("lsnp_data"));
    }
}
