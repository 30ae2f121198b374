// Copyright (c) 2024 The Morphene Developers

//! Errors raised while parsing, deriving or using keys.

use crate::Role;

/// Errors that can occur during key operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid WIF: {0}")]
    InvalidWif(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Public key prefix mismatch: expected {expected}, found {found}")]
    PrefixMismatch { expected: String, found: String },

    #[error("Checksum mismatch")]
    BadChecksum,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("No private key available for role {0}")]
    NoPrivateKey(Role),

    #[error("Private key does not belong to public key {0}")]
    KeyMismatch(String),

    #[error("Unknown key role: {0}")]
    UnknownRole(String),

    #[error("Signing failed: {0}")]
    SigningError(String),
}
