// Copyright (c) 2024 The Morphene Developers

//! Local transaction construction and signing.
//!
//! Private keys never leave this process: the signer only needs the
//! transaction and the key material, never a node.

use std::collections::BTreeSet;

use mph_crypto_keys::{KeyMaterial, PublicKey};
use tracing::debug;

use crate::{
    chain::ChainParams,
    operations::Operation,
    transaction::{RefBlock, Transaction},
    types::TimePointSec,
    SignerError,
};

/// The furthest in the future the chain accepts an expiration.
pub const MAX_EXPIRATION_SECS: u32 = 3600;

/// Builds and signs transactions for one network.
#[derive(Clone, Debug, Default)]
pub struct TransactionSigner {
    chain: ChainParams,
}

impl TransactionSigner {
    pub fn new(chain: ChainParams) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &ChainParams {
        &self.chain
    }

    /// An unsigned transaction over `operations`.
    pub fn build(
        &self,
        operations: Vec<Operation>,
        expiration: TimePointSec,
        ref_block: RefBlock,
    ) -> Result<Transaction, SignerError> {
        if operations.is_empty() {
            return Err(SignerError::NoOperations);
        }
        Ok(Transaction::new(ref_block, expiration, operations))
    }

    /// `now + seconds`, refusing windows the chain would reject.
    pub fn expiration_after(now: TimePointSec, seconds: u32) -> Result<TimePointSec, SignerError> {
        if seconds > MAX_EXPIRATION_SECS {
            return Err(SignerError::ExpirationTooFar {
                requested: seconds,
                max: MAX_EXPIRATION_SECS,
            });
        }
        Ok(now.saturating_add(seconds))
    }

    pub fn digest(&self, tx: &Transaction) -> [u8; 32] {
        tx.digest(&self.chain.chain_id)
    }

    /// Append a signature by `key`.
    ///
    /// Signing is deterministic, so signing twice with the same key leaves
    /// the transaction unchanged the second time.
    pub fn sign(&self, mut tx: Transaction, key: &KeyMaterial) -> Result<Transaction, SignerError> {
        let digest = self.digest(&tx);
        let signature = key.sign_digest(&digest)?;
        if !tx.signatures.contains(&signature) {
            debug!(
                "Signed transaction {} with {} key {}",
                tx.id(),
                key.role(),
                key.public_key().to_string_with_prefix(&self.chain.address_prefix)
            );
            tx.signatures.push(signature);
        }
        Ok(tx)
    }

    /// Sign with each key in turn; signature order follows `keys`.
    pub fn sign_with<'a>(
        &self,
        tx: Transaction,
        keys: impl IntoIterator<Item = &'a KeyMaterial>,
    ) -> Result<Transaction, SignerError> {
        keys.into_iter().try_fold(tx, |tx, key| self.sign(tx, key))
    }

    /// Check that every signature verifies and comes from one of `expected`.
    pub fn verify(&self, tx: &Transaction, expected: &BTreeSet<PublicKey>) -> Result<(), SignerError> {
        if !tx.is_signed() {
            return Err(SignerError::Unsigned);
        }
        let digest = self.digest(tx);
        for (index, signature) in tx.signatures.iter().enumerate() {
            let signer = PublicKey::recover(&digest, signature)?;
            if !expected.contains(&signer) || !signer.verify(&digest, signature) {
                return Err(SignerError::UnexpectedSigner { index });
            }
        }
        Ok(())
    }
}
