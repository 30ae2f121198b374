//! Error types for the wallet store, the RPC client and the broadcaster.

use std::{fmt, path::PathBuf, time::Duration};

use mph_crypto_keys::{KeyError, Role};
use mph_transaction_core::{SignerError, WireError};
use serde_json::Value;

/// Errors raised by [`crate::WalletStore`].
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wrong password")]
    WrongPassword,

    #[error("No key stored for role {0}")]
    KeyNotFound(Role),

    #[error("No stored private key for public key {0}")]
    PublicKeyNotFound(String),

    #[error("Wallet is locked")]
    Locked,

    #[error("Wallet file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Unsupported wallet version: {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Wallet file is corrupted: {0}")]
    Corrupted(String),

    #[error("Key derivation failed: {0}")]
    Kdf(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WalletError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by [`crate::RpcClient`] and the transports under it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RpcError {
    #[error("No healthy nodes available")]
    NoHealthyNodes,

    #[error("Transport error on {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Chain id mismatch: expected {expected}, node reports {actual}")]
    ChainMismatch { expected: String, actual: String },

    #[error("Unexpected result from {method}: {message}")]
    Decode { method: String, message: String },
}

impl RpcError {
    /// Whether another node might succeed where this attempt failed.
    ///
    /// Only connection-level failures qualify. A server-reported error is
    /// the chain's answer and would come back the same from any node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport { .. } | RpcError::Timeout { .. })
    }

    pub(crate) fn transport(url: &str, message: impl fmt::Display) -> Self {
        RpcError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn decode(method: &str, message: impl fmt::Display) -> Self {
        RpcError::Decode {
            method: method.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        RpcError::decode("chain json", err)
    }
}

/// Why the chain refused a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    Expired,
    DuplicateTransaction,
    InsufficientAuthority,
    InsufficientFunds,
    Unknown(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Expired => f.write_str("transaction expired"),
            RejectReason::DuplicateTransaction => f.write_str("duplicate transaction"),
            RejectReason::InsufficientAuthority => f.write_str("missing required authority"),
            RejectReason::InsufficientFunds => f.write_str("insufficient funds"),
            RejectReason::Unknown(message) => write!(f, "{message}"),
        }
    }
}

/// Errors raised by [`crate::Broadcaster`].
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Transaction rejected: {0}")]
    Rejected(RejectReason),

    #[error("Transaction has no signatures")]
    NotSigned,

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Errors raised while creating or checking a signed message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed signed message: {0}")]
    Malformed(String),

    #[error("Signed message is missing meta field {0:?}")]
    MissingField(&'static str),

    #[error("Signature does not match memo key {0}")]
    InvalidMessageSignature(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// Errors raised while loading a [`crate::ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
}
