//! Wallet CLI configuration

use crate::{leaf::LeafSettings, wallet::WalletSettings};
use anyhow::{anyhow, Context, Result};
use bth_crypto_encryption::KdfSettings;
use bth_crypto_hd::{AddressType, NetworkType};
use bth_util_kvstore::LmdbStoreSettings;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Main configuration for the wallet tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `mainnet`, `testnet` or `regtest`
    #[serde(default = "default_network")]
    pub network: String,

    /// Directory holding wallet files
    #[serde(default = "default_wallet_dir")]
    pub wallet_dir: PathBuf,

    /// Address type handed out when none is requested
    #[serde(default = "default_address_type")]
    pub default_address_type: String,

    #[serde(default)]
    pub kdf: KdfConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Time one passphrase stretch should take on this machine
    #[serde(default = "default_target_compute_ms")]
    pub target_compute_ms: u64,

    /// Upper bound for the ROMix lookup table
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            target_compute_ms: default_target_compute_ms(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

/// Lookahead sizes of the address pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub external: u32,

    #[serde(default = "default_pool_size")]
    pub internal: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            external: default_pool_size(),
            internal: default_pool_size(),
        }
    }
}

fn default_network() -> String {
    NetworkType::TestNet.to_string()
}

fn default_wallet_dir() -> PathBuf {
    default_data_dir().join("wallets")
}

fn default_address_type() -> String {
    AddressType::P2wpkh.to_string()
}

fn default_target_compute_ms() -> u64 {
    250
}

fn default_max_memory_bytes() -> u32 {
    32 * 1024 * 1024
}

fn default_pool_size() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: default_network(),
            wallet_dir: default_wallet_dir(),
            default_address_type: default_address_type(),
            kdf: KdfConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load config from a file, or defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms)
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }

    pub fn network(&self) -> Result<NetworkType> {
        self.network
            .parse()
            .map_err(|e| anyhow!("Invalid network in config: {e}"))
    }

    pub fn address_type(&self) -> Result<AddressType> {
        self.default_address_type
            .parse()
            .map_err(|e| anyhow!("Invalid default_address_type in config: {e}"))
    }

    /// Library settings for wallets opened or created with this config
    pub fn wallet_settings(&self) -> Result<WalletSettings> {
        Ok(WalletSettings {
            kdf: KdfSettings {
                target_compute: Duration::from_millis(self.kdf.target_compute_ms),
                max_memory_bytes: self.kdf.max_memory_bytes,
            },
            leaf: LeafSettings {
                external_pool_size: self.pool.external,
                internal_pool_size: self.pool.internal,
                default_address_type: self.address_type()?,
                ..LeafSettings::default()
            },
            store: LmdbStoreSettings::default(),
        })
    }
}

/// Get the default data directory path
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bth-hd-wallet")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.network = "regtest".to_string();
        config.pool.external = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network().unwrap(), NetworkType::RegTest);
        assert_eq!(loaded.pool.external, 7);
        assert_eq!(loaded.pool.internal, 100);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str("network = \"mainnet\"\n[pool]\ninternal = 3\n").unwrap();
        let settings = config.wallet_settings().unwrap();
        assert_eq!(config.network().unwrap(), NetworkType::MainNet);
        assert_eq!(settings.leaf.external_pool_size, 100);
        assert_eq!(settings.leaf.internal_pool_size, 3);
        assert_eq!(settings.leaf.default_address_type, AddressType::P2wpkh);
        assert_eq!(settings.kdf.target_compute, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let config: Config = toml::from_str("default_address_type = \"p2tr\"\n").unwrap();
        assert!(config.wallet_settings().is_err());
        let config: Config = toml::from_str("network = \"signet\"\n").unwrap();
        assert!(config.network().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_with_private_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::default().save(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
