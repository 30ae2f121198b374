//! Client configuration, loaded from TOML.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use mph_crypto_keys::DEFAULT_PREFIX;
use mph_transaction_core::{ChainId, ChainParams, MAX_EXPIRATION_SECS};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::ConfigError, storage::KdfParams};

/// Everything a session needs to talk to the chain and open a wallet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 64 hex characters
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Public key prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_core_symbol")]
    pub core_symbol: String,

    #[serde(default = "default_vests_symbol")]
    pub vests_symbol: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            prefix: default_prefix(),
            core_symbol: default_core_symbol(),
            vests_symbol: default_vests_symbol(),
        }
    }
}

fn default_chain_id() -> String {
    ChainId::default().to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_core_symbol() -> String {
    "MORPH".to_string()
}

fn default_vests_symbol() -> String {
    "VESTS".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesConfig {
    /// ws, wss, http or https endpoints, in order of preference
    #[serde(default)]
    pub urls: Vec<String>,

    /// Consecutive failures after which a node is only used as a probe
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds after its last failure before a demoted node is probed again
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u32,

    /// Wait for block inclusion when broadcasting
    #[serde(default)]
    pub blocking: bool,

    /// Sign but never submit
    #[serde(default)]
    pub no_broadcast: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration_secs(),
            blocking: false,
            no_broadcast: false,
        }
    }
}

fn default_expiration_secs() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_wallet_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            path: default_wallet_path(),
            kdf: KdfParams::default(),
        }
    }
}

fn default_wallet_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("morphene")
        .join("wallet.json")
}

impl ClientConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.chain.chain_id.parse::<ChainId>() {
            errors.push(format!("chain.chain_id: {e}"));
        }
        if self.chain.prefix.is_empty() {
            errors.push("chain.prefix must not be empty".to_string());
        }

        if self.nodes.urls.is_empty() {
            errors.push("nodes.urls must list at least one node".to_string());
        }
        for node in &self.nodes.urls {
            match Url::parse(node) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss" | "http" | "https") => {}
                Ok(url) => errors.push(format!("nodes.urls: unsupported scheme {:?} in {node}", url.scheme())),
                Err(e) => errors.push(format!("nodes.urls: {node}: {e}")),
            }
        }
        if self.nodes.failure_threshold == 0 {
            errors.push("nodes.failure_threshold must be at least 1".to_string());
        }

        if self.rpc.timeout_secs == 0 {
            errors.push("rpc.timeout_secs must be at least 1".to_string());
        }
        if self.rpc.backoff_max_ms < self.rpc.backoff_base_ms {
            errors.push("rpc.backoff_max_ms must not be below rpc.backoff_base_ms".to_string());
        }

        if self.transaction.expiration_secs == 0 || self.transaction.expiration_secs > MAX_EXPIRATION_SECS {
            errors.push(format!(
                "transaction.expiration_secs must be between 1 and {MAX_EXPIRATION_SECS}"
            ));
        }

        if let Err(e) = self.wallet.kdf.to_argon2() {
            errors.push(format!("wallet.kdf: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The network parameters used for signing.
    pub fn chain_params(&self) -> Result<ChainParams, ConfigError> {
        let chain_id = self
            .chain
            .chain_id
            .parse()
            .map_err(|e| ConfigError::Validation(vec![format!("chain.chain_id: {e}")]))?;
        Ok(ChainParams {
            chain_id,
            address_prefix: self.chain.prefix.clone(),
            core_symbol: self.chain.core_symbol.clone(),
            vests_symbol: self.chain.vests_symbol.clone(),
        })
    }
}
