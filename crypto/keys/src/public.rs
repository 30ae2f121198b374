// Copyright (c) 2024 The Morphene Developers

//! Compressed secp256k1 public keys and their prefixed base58 text form.

use core::{fmt, str::FromStr};
use k256::ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey};
use ripemd::{Digest, Ripemd160};

use crate::{CompactSignature, KeyError};

/// Address prefix used by the Morphene main network.
pub const DEFAULT_PREFIX: &str = "MPH";

/// Length of a compressed SEC1 point.
pub const PUBLIC_KEY_LENGTH: usize = 33;

const CHECKSUM_LENGTH: usize = 4;

/// A compressed secp256k1 public key.
///
/// Ordering is by the raw 33 bytes, which is the order the chain uses for
/// key maps inside authorities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Parse a compressed point, rejecting anything not on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            KeyError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| KeyError::InvalidPublicKey("not a curve point".to_string()))?;
        Ok(Self(bytes))
    }

    pub(crate) fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(point.as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        VerifyingKey::from_sec1_bytes(&self.0)
            .map_err(|_| KeyError::InvalidPublicKey("not a curve point".to_string()))
    }

    /// Text form `<prefix><base58(key || ripemd160(key)[..4])>`.
    pub fn to_string_with_prefix(&self, prefix: &str) -> String {
        let mut payload = Vec::with_capacity(PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&ripemd_checksum(&self.0));
        format!("{}{}", prefix, bs58::encode(payload).into_string())
    }

    /// Parse the text form, requiring the given prefix.
    pub fn from_str_with_prefix(s: &str, prefix: &str) -> Result<Self, KeyError> {
        let encoded = s.strip_prefix(prefix).ok_or_else(|| KeyError::PrefixMismatch {
            expected: prefix.to_string(),
            found: s.chars().take(prefix.len()).collect(),
        })?;
        let payload = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        if payload.len() != PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH {
            return Err(KeyError::InvalidPublicKey(format!(
                "decoded length {} is not {}",
                payload.len(),
                PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH
            )));
        }
        let (key, checksum) = payload.split_at(PUBLIC_KEY_LENGTH);
        if ripemd_checksum(key) != checksum {
            return Err(KeyError::BadChecksum);
        }
        Self::from_bytes(key)
    }

    /// Reconstruct the signer's key from a digest and compact signature.
    pub fn recover(digest: &[u8; 32], signature: &CompactSignature) -> Result<Self, KeyError> {
        let recovery_id = signature.recovery_id()?;
        let sig = signature.to_k256()?;
        let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Standard ECDSA verification of `signature` over `digest`.
    pub fn verify(&self, digest: &[u8; 32], signature: &CompactSignature) -> bool {
        let (Ok(key), Ok(sig)) = (self.verifying_key(), signature.to_k256()) else {
            return false;
        };
        key.verify_prehash(digest, &sig).is_ok()
    }
}

fn ripemd_checksum(data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let hash = Ripemd160::digest(data);
    let mut checksum = [0u8; CHECKSUM_LENGTH];
    checksum.copy_from_slice(&hash[..CHECKSUM_LENGTH]);
    checksum
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with_prefix(DEFAULT_PREFIX))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_with_prefix(s, DEFAULT_PREFIX)
    }
}
