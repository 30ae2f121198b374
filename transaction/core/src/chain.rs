// Copyright (c) 2024 The Morphene Developers

//! Network identity: chain id, key prefix and native symbols.

use core::{fmt, str::FromStr};

use mph_crypto_keys::DEFAULT_PREFIX;

use crate::{types::Asset, WireError};

/// Decimal places of the core token.
pub const CORE_PRECISION: u8 = 3;

/// Decimal places of vesting shares.
pub const VESTS_PRECISION: u8 = 6;

/// The 32 byte chain id mixed into every signing digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ChainId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| WireError::json("chain_id", e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WireError::json("chain_id", "expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({self})")
    }
}

/// Everything that differs between networks sharing this codebase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub chain_id: ChainId,
    pub address_prefix: String,
    pub core_symbol: String,
    pub vests_symbol: String,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: ChainId::default(),
            address_prefix: DEFAULT_PREFIX.to_string(),
            core_symbol: "MORPH".to_string(),
            vests_symbol: "VESTS".to_string(),
        }
    }
}

impl ChainParams {
    /// `amount` in thousandths of the core token.
    pub fn core_asset(&self, amount: i64) -> Result<Asset, WireError> {
        Asset::new(amount, CORE_PRECISION, &self.core_symbol)
    }

    /// `amount` in millionths of a vesting share.
    pub fn vests_asset(&self, amount: i64) -> Result<Asset, WireError> {
        Asset::new(amount, VESTS_PRECISION, &self.vests_symbol)
    }
}
