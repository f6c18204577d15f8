//! Configuration system for TEELINE CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use teeline_core::{ConnectionConfig, ConnectionPolicy, DEFAULT_INPUT_CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE};
use teeline_crypto::{
    AES128_KEY_SIZE, AES256_KEY_SIZE, Algorithm, AsymmetricPadding, DEFAULT_RSA_KEY_BITS,
};

/// TEELINE configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Cryptographic parameters
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host address of the streaming peer
    #[serde(default = "default_address")]
    pub address: String,
    /// Port of the streaming peer
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Cryptographic parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// RSA key size generated by receivers
    #[serde(default = "default_key_size_bits")]
    pub key_size_bits: u32,
    /// Asymmetric block padding
    #[serde(default)]
    pub padding: AsymmetricPadding,
    /// AES chaining mode used by `bench`
    #[serde(default = "default_symmetric_algorithm")]
    pub symmetric_algorithm: Algorithm,
    /// AES key size in bytes used by `bench`
    #[serde(default = "default_symmetric_key_size")]
    pub symmetric_key_size: usize,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Plaintext bytes per streamed frame
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// Largest accepted frame payload
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u64,
    /// Plaintext bytes per asymmetric block
    #[serde(default = "default_input_chunk_size")]
    pub input_chunk_size: usize,
    /// Reaction to a frame that fails to decrypt
    #[serde(default)]
    pub policy: ConnectionPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_key_size_bits() -> u32 {
    DEFAULT_RSA_KEY_BITS
}

fn default_symmetric_algorithm() -> Algorithm {
    Algorithm::Ctr
}

fn default_symmetric_key_size() -> usize {
    AES128_KEY_SIZE
}

fn default_frame_size() -> usize {
    4096
}

fn default_max_frame_size() -> u64 {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_input_chunk_size() -> usize {
    DEFAULT_INPUT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_size_bits: default_key_size_bits(),
            padding: AsymmetricPadding::default(),
            symmetric_algorithm: default_symmetric_algorithm(),
            symmetric_key_size: default_symmetric_key_size(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            max_frame_size: default_max_frame_size(),
            input_chunk_size: default_input_chunk_size(),
            policy: ConnectionPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("teeline/config.toml")
    }

    /// Load config from the default path, falling back to defaults if absent
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Peer address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let host = &self.network.address;
        let addr = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.network.port)
        } else {
            format!("{host}:{}", self.network.port)
        };
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid network address '{addr}': {e}"))
    }

    /// Connection parameters for the core layer
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_frame_size: self.transfer.max_frame_size,
            key_size_bits: self.crypto.key_size_bits,
            padding: self.crypto.padding,
            input_chunk_size: self.transfer.input_chunk_size,
            policy: self.transfer.policy,
            ..ConnectionConfig::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.socket_addr()?;

        self.connection_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        if ![AES128_KEY_SIZE, AES256_KEY_SIZE].contains(&self.crypto.symmetric_key_size) {
            anyhow::bail!(
                "Invalid symmetric key size: {}. Must be {} or {}",
                self.crypto.symmetric_key_size,
                AES128_KEY_SIZE,
                AES256_KEY_SIZE
            );
        }

        if self.transfer.frame_size == 0 {
            anyhow::bail!("Frame size must be positive");
        }

        // Ciphertext of a full frame must fit under the receiver's limit
        let block_size = teeline_crypto::rsa_block_size(self.crypto.key_size_bits) as u64;
        let blocks = self.transfer.frame_size.div_ceil(self.transfer.input_chunk_size) as u64;
        if blocks.saturating_mul(block_size) > self.transfer.max_frame_size {
            anyhow::bail!(
                "Frame size {} encrypts to {} bytes, above max_frame_size {}",
                self.transfer.frame_size,
                blocks.saturating_mul(block_size),
                self.transfer.max_frame_size
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
