//! Encrypted Wallet File
//!
//! The on-disk form of the key store:
//! - Argon2id turns the password into a 32 byte key
//! - a 4 byte check value (the first bytes of `sha256(key)`) detects a wrong
//!   password before anything is decrypted
//! - ChaCha20-Poly1305 encrypts the serialized key list under a fresh nonce
//!   on every write

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use mph_crypto_keys::{KeyMaterial, PrivateKey, PublicKey, Role};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::WalletError;

/// Current wallet file format version
pub const WALLET_VERSION: u32 = 1;

pub const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const CHECK_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    #[default]
    Argon2id,
}

/// Cost parameters of the password hash, stored with the file so they can
/// change without breaking existing wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default)]
    pub algorithm: KdfAlgorithm,

    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

// 64 MB
fn default_memory_kib() -> u32 {
    65536
}

fn default_iterations() -> u32 {
    3
}

fn default_parallelism() -> u32 {
    4
}

impl KdfParams {
    pub fn to_argon2(&self) -> Result<Argon2<'static>, WalletError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| WalletError::Kdf(e.to_string()))?;
        let algorithm = match self.algorithm {
            KdfAlgorithm::Argon2id => Algorithm::Argon2id,
        };
        Ok(Argon2::new(algorithm, Version::V0x13, params))
    }

    /// Derive the 32 byte file key from `password`.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, WalletError> {
        let mut key = Zeroizing::new([0u8; 32]);
        self.to_argon2()?
            .hash_password_into(password.as_bytes(), salt, &mut key[..])
            .map_err(|e| WalletError::Kdf(e.to_string()))?;
        Ok(key)
    }
}

/// The value stored next to the ciphertext to recognise the right key.
pub fn key_check(key: &[u8; 32]) -> [u8; CHECK_LENGTH] {
    let hash = Sha256::digest(key);
    let mut check = [0u8; CHECK_LENGTH];
    check.copy_from_slice(&hash[..CHECK_LENGTH]);
    check
}

/// One entry of the decrypted key list.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    #[zeroize(skip)]
    role: Role,
    /// Hex of the compressed point
    public: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wif: Option<String>,
}

/// Serialize a key list into the plaintext that gets encrypted.
pub(crate) fn serialize_keys<'a>(
    keys: impl IntoIterator<Item = &'a KeyMaterial>,
) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let stored: Vec<StoredKey> = keys
        .into_iter()
        .map(|key| StoredKey {
            role: key.role(),
            public: hex::encode(key.public_key().as_bytes()),
            wif: key.private_key().map(|private| private.to_wif().to_string()),
        })
        .collect();
    serde_json::to_vec(&stored)
        .map(Zeroizing::new)
        .map_err(|e| WalletError::Corrupted(format!("serializing key list: {e}")))
}

pub(crate) fn deserialize_keys(plaintext: &[u8]) -> Result<Vec<KeyMaterial>, WalletError> {
    let stored: Vec<StoredKey> = serde_json::from_slice(plaintext)
        .map_err(|e| WalletError::Corrupted(format!("key list: {e}")))?;
    stored
        .iter()
        .map(|entry| -> Result<KeyMaterial, WalletError> {
            let public_bytes = hex::decode(&entry.public)
                .map_err(|e| WalletError::Corrupted(format!("public key for {}: {e}", entry.role)))?;
            let public = PublicKey::from_bytes(&public_bytes)?;
            let private = entry.wif.as_deref().map(PrivateKey::from_wif).transpose()?;
            Ok(KeyMaterial::from_parts(entry.role, private, public)?)
        })
        .collect()
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Encrypted wallet file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletFile {
    pub version: u32,

    pub kdf: KdfParams,

    /// Argon2 salt (hex)
    salt: String,

    /// First bytes of sha256 of the derived key (hex)
    check: String,

    /// ChaCha20-Poly1305 nonce (hex)
    nonce: String,

    /// Encrypted key list (hex)
    ciphertext: String,
}

impl WalletFile {
    /// A random salt for a new wallet or a password change.
    pub fn generate_salt() -> [u8; SALT_LENGTH] {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// Encrypt `plaintext` under `key` with a fresh nonce.
    pub fn seal(plaintext: &[u8], key: &[u8; 32], salt: &[u8], kdf: KdfParams) -> Result<Self, WalletError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| WalletError::Encryption)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| WalletError::Encryption)?;

        Ok(Self {
            version: WALLET_VERSION,
            kdf,
            salt: hex::encode(salt),
            check: hex::encode(key_check(key)),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
        })
    }

    pub fn salt(&self) -> Result<Vec<u8>, WalletError> {
        hex::decode(&self.salt).map_err(|_| WalletError::Corrupted("invalid salt".into()))
    }

    /// Derive the key for `password` and confirm it against the check value.
    pub fn derive_key(&self, password: &str) -> Result<Zeroizing<[u8; 32]>, WalletError> {
        let key = self.kdf.derive_key(password, &self.salt()?)?;
        self.verify_key(&key)?;
        Ok(key)
    }

    pub fn verify_key(&self, key: &[u8; 32]) -> Result<(), WalletError> {
        let stored = hex::decode(&self.check).map_err(|_| WalletError::Corrupted("invalid check value".into()))?;
        if stored.len() != CHECK_LENGTH {
            return Err(WalletError::Corrupted("invalid check value length".into()));
        }
        if bool::from(stored.as_slice().ct_eq(&key_check(key))) {
            Ok(())
        } else {
            Err(WalletError::WrongPassword)
        }
    }

    /// Decrypt with a key that already passed [`Self::verify_key`].
    pub fn open(&self, key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        let nonce_bytes = hex::decode(&self.nonce).map_err(|_| WalletError::Corrupted("invalid nonce".into()))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(WalletError::Corrupted("invalid nonce length".into()));
        }
        let ciphertext =
            hex::decode(&self.ciphertext).map_err(|_| WalletError::Corrupted("invalid ciphertext".into()))?;

        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| WalletError::Encryption)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map(Zeroizing::new)
            // The check value matched, so the key is right and the blob is not.
            .map_err(|_| WalletError::Corrupted("authentication failed".into()))
    }

    /// Write to `path` through a temporary file, so a crash never leaves a
    /// half written wallet behind.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| WalletError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WalletError::Corrupted(format!("serializing wallet: {e}")))?;

        let tmp = temp_path(path);
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp).map_err(|e| WalletError::io(&tmp, e))?;
            file.write_all(json.as_bytes()).map_err(|e| WalletError::io(&tmp, e))?;
            file.sync_all().map_err(|e| WalletError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| WalletError::io(path, e))
    }

    /// Load a wallet file, refusing versions this build does not know.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path).map_err(|e| WalletError::io(path, e))?;

        let probe: VersionProbe =
            serde_json::from_str(&json).map_err(|e| WalletError::Corrupted(format!("wallet file: {e}")))?;
        if probe.version != WALLET_VERSION {
            return Err(WalletError::UnsupportedVersion {
                found: probe.version,
                expected: WALLET_VERSION,
            });
        }

        serde_json::from_str(&json).map_err(|e| WalletError::Corrupted(format!("wallet file: {e}")))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wallet".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
