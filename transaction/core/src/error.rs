// Copyright (c) 2024 The Morphene Developers

//! Errors raised by the wire codec and the transaction signer.

use displaydoc::Display;
use mph_crypto_keys::{KeyError, Role};

/// An input could not be decoded, or a value could not be represented.
///
/// Every variant is a form of malformed encoding; offsets are byte offsets
/// into the buffer handed to the decoder.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum WireError {
    /// Truncated input: needed {needed} more bytes at offset {offset}
    Truncated {
        /// Where the read started
        offset: usize,
        /// How many bytes were missing
        needed: usize,
    },
    /// Variable-length integer at offset {offset} does not fit in {bits} bits
    VarintOverflow {
        /// Where the integer started
        offset: usize,
        /// Width of the target integer
        bits: u32,
    },
    /// String at offset {0} is not valid UTF-8
    InvalidUtf8(usize),
    /// Byte {value} at offset {offset} is not a valid flag
    InvalidBool {
        /// Where the flag was read
        offset: usize,
        /// The offending byte
        value: u8,
    },
    /// Unknown operation tag {0}
    UnknownOperation(u64),
    /// Unknown operation name {0}
    UnknownOperationName(String),
    /// Invalid public key: {0}
    InvalidPublicKey(String),
    /// Invalid signature: {0}
    InvalidSignature(String),
    /// Invalid asset: {0}
    InvalidAsset(String),
    /// Invalid time: {0}
    InvalidTime(String),
    /// {0} extensions present, none are supported
    UnsupportedExtension(u64),
    /// {0} trailing bytes after value
    TrailingBytes(usize),
    /// Invalid JSON for {field}: {reason}
    InvalidJson {
        /// Field or type being read
        field: String,
        /// What was wrong with it
        reason: String,
    },
}

impl std::error::Error for WireError {}

impl WireError {
    pub(crate) fn json(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJson {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// An error that occurs while building, signing or verifying a transaction
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum SignerError {
    /// No private key available for role {0}
    NoPrivateKey(Role),
    /// A transaction needs at least one operation
    NoOperations,
    /// Expiration {requested}s after now exceeds the maximum of {max}s
    ExpirationTooFar {
        /// Requested distance in seconds
        requested: u32,
        /// Largest distance the chain accepts
        max: u32,
    },
    /// Invalid reference block id: {0}
    InvalidRefBlock(String),
    /// Signature {index} does not recover to an expected key
    UnexpectedSigner {
        /// Position of the signature in the transaction
        index: usize,
    },
    /// Transaction carries no signatures
    Unsigned,
    /// Key: {0}
    Key(KeyError),
    /// Encoding: {0}
    Wire(WireError),
}

impl std::error::Error for SignerError {}

impl From<KeyError> for SignerError {
    fn from(src: KeyError) -> Self {
        match src {
            KeyError::NoPrivateKey(role) => Self::NoPrivateKey(role),
            other => Self::Key(other),
        }
    }
}

impl From<WireError> for SignerError {
    fn from(src: WireError) -> Self {
        Self::Wire(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_private_key_is_lifted() {
        let err: SignerError = KeyError::NoPrivateKey(Role::Active).into();
        assert_eq!(err, SignerError::NoPrivateKey(Role::Active));
        assert_eq!(err.to_string(), "No private key available for role active");

        let err: SignerError = KeyError::BadChecksum.into();
        assert!(matches!(err, SignerError::Key(KeyError::BadChecksum)));
    }

    #[test]
    fn test_wire_error_messages() {
        let err = WireError::Truncated { offset: 3, needed: 2 };
        assert_eq!(err.to_string(), "Truncated input: needed 2 more bytes at offset 3");
        assert_eq!(WireError::UnknownOperation(99).to_string(), "Unknown operation tag 99");
    }
}
