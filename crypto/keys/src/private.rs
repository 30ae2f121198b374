// Copyright (c) 2024 The Morphene Developers

//! secp256k1 private keys: import, export and canonical signing.

use core::fmt;
use k256::{
    ecdsa::{signature::hazmat::RandomizedPrehashSigner, RecoveryId, Signature as K256Signature, SigningKey},
    SecretKey,
};
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRngCore, SeedableRng};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{CompactSignature, KeyError, PublicKey, Role};

/// Version byte prepended to private keys in wallet import format.
const WIF_VERSION: u8 = 0x80;

/// How many extra-entropy rounds to try before giving up on a canonical
/// signature. Each round succeeds with probability close to one half.
const MAX_CANONICAL_ATTEMPTS: u32 = 256;

/// A secp256k1 signing key.
///
/// The scalar is wiped when the key is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    /// Create a key from raw 32-byte scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_bytes(bytes.into()).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Generate a fresh random key.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::random(rng),
        }
    }

    /// Derive the "password key" for an account role.
    ///
    /// The scalar is `sha256(account || role || password)`, matching keys
    /// generated by the chain's web wallets from a master password.
    pub fn from_account_password(account: &str, role: Role, password: &str) -> Result<Self, KeyError> {
        let mut hasher = Sha256::new();
        hasher.update(account.as_bytes());
        hasher.update(role.as_str().as_bytes());
        hasher.update(password.as_bytes());
        let seed = Zeroizing::new(<[u8; 32]>::from(hasher.finalize()));
        Self::from_bytes(&seed)
    }

    /// Parse a wallet import format string.
    pub fn from_wif(wif: &str) -> Result<Self, KeyError> {
        let decoded = Zeroizing::new(
            bs58::decode(wif)
                .into_vec()
                .map_err(|e| KeyError::InvalidWif(e.to_string()))?,
        );
        if decoded.len() != 37 {
            return Err(KeyError::InvalidWif(format!(
                "decoded length {} is not 37",
                decoded.len()
            )));
        }
        let (payload, checksum) = decoded.split_at(33);
        if payload[0] != WIF_VERSION {
            return Err(KeyError::InvalidWif(format!(
                "version byte {:#04x}",
                payload[0]
            )));
        }
        if double_sha256(payload)[..4] != *checksum {
            return Err(KeyError::BadChecksum);
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&payload[1..]);
        Self::from_bytes(&key)
    }

    /// Export as wallet import format: `base58(0x80 || key || sha256d[..4])`.
    pub fn to_wif(&self) -> Zeroizing<String> {
        let mut payload = Zeroizing::new(Vec::with_capacity(37));
        payload.push(WIF_VERSION);
        payload.extend_from_slice(self.to_bytes().as_slice());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        Zeroizing::new(bs58::encode(payload.as_slice()).into_string())
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes().into())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte digest, returning a canonical compact signature.
    ///
    /// The nonce is RFC 6979 deterministic. If the plain RFC 6979 signature
    /// is not canonical, the nonce is re-derived with additional data taken
    /// from `sha256(digest || counter)` until it is, so the result is still a
    /// pure function of key and digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<CompactSignature, KeyError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| KeyError::SigningError(e.to_string()))?;
        let compact = CompactSignature::from_parts(&signature, recovery_id);
        if compact.is_canonical() {
            return Ok(compact);
        }

        for counter in 1..=MAX_CANONICAL_ATTEMPTS {
            let compact = self.sign_with_counter(digest, counter)?;
            if compact.is_canonical() {
                return Ok(compact);
            }
        }

        Err(KeyError::SigningError(
            "no canonical signature found".to_string(),
        ))
    }

    fn sign_with_counter(&self, digest: &[u8; 32], counter: u32) -> Result<CompactSignature, KeyError> {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(counter.to_le_bytes());
        let mut rng = ChaCha20Rng::from_seed(hasher.finalize().into());

        let signature: K256Signature = self
            .signing_key
            .sign_prehash_with_rng(&mut rng, digest)
            .map_err(|e| KeyError::SigningError(e.to_string()))?;
        let recovery_id =
            RecoveryId::trial_recovery_from_prehash(self.signing_key.verifying_key(), digest, &signature)
                .map_err(|e| KeyError::SigningError(e.to_string()))?;
        Ok(CompactSignature::from_parts(&signature, recovery_id))
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey {{ public: {} }}", self.public_key())
    }
}
