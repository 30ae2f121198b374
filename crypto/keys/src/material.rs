// Copyright (c) 2024 The Morphene Developers

//! A role-tagged key pair as held by the wallet.

use core::fmt;
use rand_core::CryptoRngCore;

use crate::{CompactSignature, KeyError, PrivateKey, PublicKey, Role};

/// A public key for one role, optionally with its private scalar.
///
/// There is no way to build a `KeyMaterial` without a public key, and when a
/// private key is present the public key is always the one derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    role: Role,
    private: Option<PrivateKey>,
    public: PublicKey,
}

impl KeyMaterial {
    pub fn from_private(role: Role, private: PrivateKey) -> Self {
        let public = private.public_key();
        Self {
            role,
            private: Some(private),
            public,
        }
    }

    /// A watch-only entry: it can be looked up but not used for signing.
    pub fn public_only(role: Role, public: PublicKey) -> Self {
        Self {
            role,
            private: None,
            public,
        }
    }

    /// Combine both halves, checking that they belong together.
    pub fn from_parts(role: Role, private: Option<PrivateKey>, public: PublicKey) -> Result<Self, KeyError> {
        if let Some(private) = &private {
            if private.public_key() != public {
                return Err(KeyError::KeyMismatch(public.to_string()));
            }
        }
        Ok(Self {
            role,
            private,
            public,
        })
    }

    pub fn from_wif(role: Role, wif: &str) -> Result<Self, KeyError> {
        Ok(Self::from_private(role, PrivateKey::from_wif(wif)?))
    }

    pub fn generate<R: CryptoRngCore>(role: Role, rng: &mut R) -> Self {
        Self::from_private(role, PrivateKey::generate(rng))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private.as_ref()
    }

    pub fn has_private_key(&self) -> bool {
        self.private.is_some()
    }

    /// The private key, or `NoPrivateKey` for a watch-only entry.
    pub fn require_private_key(&self) -> Result<&PrivateKey, KeyError> {
        self.private.as_ref().ok_or(KeyError::NoPrivateKey(self.role))
    }

    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<CompactSignature, KeyError> {
        self.require_private_key()?.sign_digest(digest)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("role", &self.role)
            .field("public", &self.public.to_string())
            .field("has_private", &self.has_private_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_from_private_derives_public() {
        let private = PrivateKey::from_account_password("bob", Role::Owner, "pw").unwrap();
        let material = KeyMaterial::from_private(Role::Owner, private.clone());
        assert_eq!(material.public_key(), &private.public_key());
        assert!(material.has_private_key());
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = PrivateKey::generate(&mut rng);
        let b = PrivateKey::generate(&mut rng);
        assert_matches!(
            KeyMaterial::from_parts(Role::Active, Some(a.clone()), b.public_key()),
            Err(KeyError::KeyMismatch(_))
        );
        assert!(KeyMaterial::from_parts(Role::Active, Some(a.clone()), a.public_key()).is_ok());
        assert!(KeyMaterial::from_parts(Role::Active, None, b.public_key()).is_ok());
    }

    #[test]
    fn test_public_only_cannot_sign() {
        let mut rng = StdRng::seed_from_u64(2);
        let public = PrivateKey::generate(&mut rng).public_key();
        let material = KeyMaterial::public_only(Role::Posting, public);
        assert_matches!(
            material.sign_digest(&[7u8; 32]),
            Err(KeyError::NoPrivateKey(Role::Posting))
        );
    }

    #[test]
    fn test_debug_has_no_secret() {
        let material = KeyMaterial::from_wif(Role::Active, "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ").unwrap();
        let printed = format!("{material:?}");
        assert!(!printed.contains("5HueCGU8"));
        assert!(printed.contains("has_private: true"));
    }
}
