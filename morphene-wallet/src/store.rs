//! The password protected key store.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use mph_crypto_keys::{KeyMaterial, PublicKey, Role};
use tracing::{debug, info};

use crate::{
    secmem::LockedKey,
    storage::{deserialize_keys, serialize_keys, KdfParams, WalletFile},
    WalletError,
};

/// Decrypted state, present only while unlocked.
struct Session {
    key: LockedKey,
    keys: BTreeMap<Role, KeyMaterial>,
}

/// Role keys for one account, encrypted at rest under a password.
///
/// Every mutation re-encrypts the whole key list under a fresh nonce and
/// writes it out before returning, so the file on disk always matches what
/// [`WalletStore::roles`] reports. Mutations take `&mut self`; share a store
/// between tasks behind a mutex.
pub struct WalletStore {
    path: Option<PathBuf>,
    file: WalletFile,
    session: Option<Session>,
}

impl WalletStore {
    /// Create an empty wallet at `path`, left unlocked.
    pub fn create(path: impl Into<PathBuf>, password: &str, kdf: KdfParams) -> Result<Self, WalletError> {
        let path = path.into();
        if path.exists() {
            return Err(WalletError::AlreadyExists(path));
        }
        let store = Self::new_unlocked(Some(path), password, kdf)?;
        store.save()?;
        info!("Created wallet at {}", store.path_display());
        Ok(store)
    }

    /// A wallet that is never written anywhere.
    pub fn in_memory(password: &str, kdf: KdfParams) -> Result<Self, WalletError> {
        Self::new_unlocked(None, password, kdf)
    }

    /// Open an existing wallet file. The store starts locked.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalletError> {
        let path = path.into();
        let file = WalletFile::load(&path)?;
        debug!("Opened wallet at {}", path.display());
        Ok(Self {
            path: Some(path),
            file,
            session: None,
        })
    }

    fn new_unlocked(path: Option<PathBuf>, password: &str, kdf: KdfParams) -> Result<Self, WalletError> {
        let salt = WalletFile::generate_salt();
        let key = kdf.derive_key(password, &salt)?;
        let empty: [&KeyMaterial; 0] = [];
        let file = WalletFile::seal(&serialize_keys(empty)?, &key, &salt, kdf)?;
        Ok(Self {
            path,
            file,
            session: Some(Session {
                key: LockedKey::new(key),
                keys: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn path_display(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    /// Decrypt the key list, returning the roles it holds.
    ///
    /// A wrong password is recognised from the stored check value and
    /// reported as [`WalletError::WrongPassword`]; nothing is decrypted.
    pub fn unlock(&mut self, password: &str) -> Result<BTreeSet<Role>, WalletError> {
        let key = self.file.derive_key(password)?;
        let plaintext = self.file.open(&key)?;
        let keys = deserialize_keys(&plaintext)?
            .into_iter()
            .map(|material| (material.role(), material))
            .collect::<BTreeMap<_, _>>();

        let roles: BTreeSet<Role> = keys.keys().copied().collect();
        self.session = Some(Session {
            key: LockedKey::new(key),
            keys,
        });
        info!("Unlocked wallet {} ({} keys)", self.path_display(), roles.len());
        Ok(roles)
    }

    /// Drop every decrypted key and the file key from memory.
    pub fn lock(&mut self) {
        if self.session.take().is_some() {
            info!("Locked wallet {}", self.path_display());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_none()
    }

    fn session(&self) -> Result<&Session, WalletError> {
        self.session.as_ref().ok_or(WalletError::Locked)
    }

    pub fn roles(&self) -> Result<BTreeSet<Role>, WalletError> {
        Ok(self.session()?.keys.keys().copied().collect())
    }

    pub fn get_key(&self, role: Role) -> Result<&KeyMaterial, WalletError> {
        self.session()?.keys.get(&role).ok_or(WalletError::KeyNotFound(role))
    }

    /// The signing key whose public half is `public`, whatever its role.
    pub fn key_for_public(&self, public: &PublicKey) -> Result<&KeyMaterial, WalletError> {
        self.session()?
            .keys
            .values()
            .find(|key| key.public_key() == public && key.has_private_key())
            .ok_or_else(|| WalletError::PublicKeyNotFound(public.to_string()))
    }

    /// Store `material` under its role, replacing any key held for it.
    pub fn add_key(&mut self, material: KeyMaterial) -> Result<(), WalletError> {
        let role = material.role();
        let mut keys = self.session()?.keys.clone();
        keys.insert(role, material);
        self.commit(keys)?;
        info!("Added {} key to wallet {}", role, self.path_display());
        Ok(())
    }

    pub fn remove_key(&mut self, role: Role) -> Result<KeyMaterial, WalletError> {
        let mut keys = self.session()?.keys.clone();
        let removed = keys.remove(&role).ok_or(WalletError::KeyNotFound(role))?;
        self.commit(keys)?;
        info!("Removed {} key from wallet {}", role, self.path_display());
        Ok(removed)
    }

    /// Re-encrypt under `new_password` with a fresh salt.
    pub fn change_password(&mut self, old_password: &str, new_password: &str) -> Result<(), WalletError> {
        self.unlock(old_password)?;
        let keys = self.session()?.keys.clone();

        let kdf = self.file.kdf;
        let salt = WalletFile::generate_salt();
        let key = kdf.derive_key(new_password, &salt)?;
        let file = WalletFile::seal(&serialize_keys(keys.values())?, &key, &salt, kdf)?;
        self.replace_file(file)?;
        self.session = Some(Session {
            key: LockedKey::new(key),
            keys,
        });
        info!("Changed password of wallet {}", self.path_display());
        Ok(())
    }

    /// Encrypt and persist `keys`, then make them current.
    fn commit(&mut self, keys: BTreeMap<Role, KeyMaterial>) -> Result<(), WalletError> {
        let session = self.session()?;
        let salt = self.file.salt()?;
        let file = WalletFile::seal(&serialize_keys(keys.values())?, session.key.as_bytes(), &salt, self.file.kdf)?;
        self.replace_file(file)?;
        if let Some(session) = self.session.as_mut() {
            session.keys = keys;
        }
        Ok(())
    }

    fn replace_file(&mut self, file: WalletFile) -> Result<(), WalletError> {
        if let Some(path) = &self.path {
            file.save(path)?;
        }
        self.file = file;
        Ok(())
    }

    fn save(&self) -> Result<(), WalletError> {
        match &self.path {
            Some(path) => self.file.save(path),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WalletStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletStore")
            .field("path", &self.path)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::TEST_KDF;
    use assert_matches::assert_matches;
    use mph_crypto_keys::PrivateKey;
    use tempfile::TempDir;

    fn key(role: Role) -> KeyMaterial {
        KeyMaterial::from_private(
            role,
            PrivateKey::from_account_password("alice", role, "correct-horse").unwrap(),
        )
    }

    #[test]
    fn test_locked_store_refuses_access() {
        let mut store = WalletStore::in_memory("pw", TEST_KDF).unwrap();
        store.add_key(key(Role::Active)).unwrap();
        store.lock();
        assert!(store.is_locked());
        assert_matches!(store.get_key(Role::Active), Err(WalletError::Locked));
        assert_matches!(store.roles(), Err(WalletError::Locked));
        assert_matches!(store.add_key(key(Role::Posting)), Err(WalletError::Locked));
    }

    #[test]
    fn test_in_memory_unlock_after_lock() {
        let mut store = WalletStore::in_memory("pw", TEST_KDF).unwrap();
        store.add_key(key(Role::Posting)).unwrap();
        store.lock();
        assert_matches!(store.unlock("nope"), Err(WalletError::WrongPassword));
        let roles = store.unlock("pw").unwrap();
        assert_eq!(roles, BTreeSet::from([Role::Posting]));
        assert_eq!(store.get_key(Role::Posting).unwrap(), &key(Role::Posting));
    }

    #[test]
    fn test_replace_and_remove() {
        let mut store = WalletStore::in_memory("pw", TEST_KDF).unwrap();
        store.add_key(key(Role::Active)).unwrap();
        let other = KeyMaterial::from_private(
            Role::Active,
            PrivateKey::from_account_password("bob", Role::Active, "x").unwrap(),
        );
        store.add_key(other.clone()).unwrap();
        assert_eq!(store.roles().unwrap().len(), 1);
        assert_eq!(store.get_key(Role::Active).unwrap(), &other);

        assert_eq!(store.remove_key(Role::Active).unwrap(), other);
        assert_matches!(store.remove_key(Role::Active), Err(WalletError::KeyNotFound(Role::Active)));
        assert_matches!(store.get_key(Role::Active), Err(WalletError::KeyNotFound(Role::Active)));
    }

    #[test]
    fn test_key_for_public_needs_private_half() {
        let mut store = WalletStore::in_memory("pw", TEST_KDF).unwrap();
        let active = key(Role::Active);
        let memo = key(Role::Memo);
        store.add_key(active.clone()).unwrap();
        store
            .add_key(KeyMaterial::public_only(Role::Memo, *memo.public_key()))
            .unwrap();

        assert_eq!(store.key_for_public(active.public_key()).unwrap(), &active);
        assert_matches!(
            store.key_for_public(memo.public_key()),
            Err(WalletError::PublicKeyNotFound(_))
        );
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        WalletStore::create(&path, "pw", TEST_KDF).unwrap();
        assert_matches!(
            WalletStore::create(&path, "pw", TEST_KDF),
            Err(WalletError::AlreadyExists(_))
        );
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        let mut store = WalletStore::create(&path, "pw", TEST_KDF).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        store.add_key(key(Role::Owner)).unwrap();
        let after_add = std::fs::read_to_string(&path).unwrap();
        assert_ne!(before, after_add);

        let mut reopened = WalletStore::open(&path).unwrap();
        assert!(reopened.is_locked());
        assert_eq!(reopened.unlock("pw").unwrap(), BTreeSet::from([Role::Owner]));

        store.remove_key(Role::Owner).unwrap();
        let mut reopened = WalletStore::open(&path).unwrap();
        assert!(reopened.unlock("pw").unwrap().is_empty());
    }

    #[test]
    fn test_change_password() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        let mut store = WalletStore::create(&path, "old", TEST_KDF).unwrap();
        store.add_key(key(Role::Active)).unwrap();

        assert_matches!(store.change_password("wrong", "new"), Err(WalletError::WrongPassword));
        store.change_password("old", "new").unwrap();

        let mut reopened = WalletStore::open(&path).unwrap();
        assert_matches!(reopened.unlock("old"), Err(WalletError::WrongPassword));
        assert_eq!(reopened.unlock("new").unwrap(), BTreeSet::from([Role::Active]));
    }
}
