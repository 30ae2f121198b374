// Copyright (c) 2024 The Morphene Developers

//! Compact recoverable signatures in the chain's 65 byte layout.

use core::fmt;
use k256::ecdsa::{RecoveryId, Signature as K256Signature};

use crate::KeyError;

/// Length of a compact signature: header byte, r, s.
pub const SIGNATURE_LENGTH: usize = 65;

/// Header offset for a recovery id over a compressed public key.
const COMPRESSED_HEADER: u8 = 27 + 4;

/// A 65 byte signature `header || r || s` where `header = recid + 31`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompactSignature([u8; SIGNATURE_LENGTH]);

impl CompactSignature {
    pub(crate) fn from_parts(signature: &K256Signature, recovery_id: RecoveryId) -> Self {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[0] = recovery_id.to_byte() + COMPRESSED_HEADER;
        bytes[1..].copy_from_slice(&signature.to_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|_| {
            KeyError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LENGTH,
                bytes.len()
            ))
        })?;
        let signature = Self(bytes);
        signature.recovery_id()?;
        Ok(signature)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The recovery id carried in the header byte.
    ///
    /// Headers 27..=30 (uncompressed) and 31..=34 (compressed) are both
    /// accepted; the public key is always returned compressed.
    pub fn recovery_id(&self) -> Result<RecoveryId, KeyError> {
        let header = self.0[0];
        if !(27..=34).contains(&header) {
            return Err(KeyError::InvalidSignature(format!(
                "bad header byte {header}"
            )));
        }
        RecoveryId::from_byte((header - 27) & 3)
            .ok_or_else(|| KeyError::InvalidSignature("bad recovery id".to_string()))
    }

    pub(crate) fn to_k256(&self) -> Result<K256Signature, KeyError> {
        K256Signature::from_slice(&self.0[1..])
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))
    }

    /// Whether the signature passes the node's canonicality check.
    ///
    /// Neither r nor s may have the high bit set, and neither may start with
    /// a zero byte unless the next byte has the high bit set.
    pub fn is_canonical(&self) -> bool {
        let r = &self.0[1..33];
        let s = &self.0[33..65];
        canonical_half(r) && canonical_half(s)
    }
}

fn canonical_half(half: &[u8]) -> bool {
    half[0] & 0x80 == 0 && !(half[0] == 0 && half[1] & 0x80 == 0)
}

impl fmt::Debug for CompactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactSignature({})", self.to_hex())
    }
}

impl fmt::Display for CompactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
