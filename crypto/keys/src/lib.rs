// Copyright (c) 2024 The Morphene Developers

#![deny(unsafe_code)]

//! Morphene key support.
//!
//! Keys are secp256k1. Private keys travel as WIF strings, public keys as
//! `MPH`-prefixed base58 strings with a RIPEMD-160 checksum, and signatures
//! as 65 byte compact recoverable signatures that the node accepts only in
//! canonical form.
//!
//! # Examples
//!
//! ```
//! use mph_crypto_keys::{KeyMaterial, PrivateKey, PublicKey, Role};
//!
//! let key = PrivateKey::from_account_password("alice", Role::Active, "correct-horse").unwrap();
//! let material = KeyMaterial::from_private(Role::Active, key);
//!
//! let digest = [42u8; 32];
//! let signature = material.sign_digest(&digest).unwrap();
//! assert!(signature.is_canonical());
//! assert_eq!(&PublicKey::recover(&digest, &signature).unwrap(), material.public_key());
//! ```

mod error;
mod material;
mod private;
mod public;
mod role;
mod signature;

pub use error::KeyError;
pub use material::KeyMaterial;
pub use private::PrivateKey;
pub use public::{PublicKey, DEFAULT_PREFIX, PUBLIC_KEY_LENGTH};
pub use role::Role;
pub use signature::{CompactSignature, SIGNATURE_LENGTH};
