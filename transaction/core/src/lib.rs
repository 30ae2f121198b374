// Copyright (c) 2024 The Morphene Developers

//! Morphene transaction data types, the canonical wire codec and local
//! transaction signing.
//!
//! A transaction is built from [`Operation`]s, hashed together with the
//! chain id over its [`wire`] encoding, and signed with canonical
//! recoverable signatures:
//!
//! ```
//! use mph_crypto_keys::{KeyMaterial, PrivateKey, Role};
//! use mph_transaction_core::{
//!     operations::Transfer, ChainParams, RefBlock, TimePointSec, TransactionSigner,
//! };
//!
//! let signer = TransactionSigner::new(ChainParams::default());
//! let transfer = Transfer {
//!     from: "alice".into(),
//!     to: "bob".into(),
//!     amount: signer.chain().core_asset(1_000).unwrap(),
//!     memo: String::new(),
//! };
//! let expiration = TransactionSigner::expiration_after(TimePointSec::now(), 30).unwrap();
//! let tx = signer
//!     .build(vec![transfer.into()], expiration, RefBlock { num: 1, prefix: 2 })
//!     .unwrap();
//!
//! let key = PrivateKey::from_account_password("alice", Role::Active, "correct-horse").unwrap();
//! let tx = signer.sign(tx, &KeyMaterial::from_private(Role::Active, key)).unwrap();
//! assert_eq!(tx.signatures.len(), 1);
//! ```

#[macro_use]
mod macros;

mod chain;
mod error;
mod signer;
mod transaction;

pub mod json;
pub mod operations;
pub mod types;
pub mod wire;

pub use chain::{ChainId, ChainParams, CORE_PRECISION, VESTS_PRECISION};
pub use error::{SignerError, WireError};
pub use json::ChainJson;
pub use operations::Operation;
pub use signer::{TransactionSigner, MAX_EXPIRATION_SECS};
pub use transaction::{RefBlock, Transaction, TransactionId, TRANSACTION_ID_LENGTH};
pub use types::{AccountName, Asset, Authority, ChainProperties, Extensions, Price, TimePointSec};
