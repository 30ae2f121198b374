// Copyright (c) 2024 The Morphene Developers

//! The transaction envelope, its digest and its id.

use core::fmt;

use mph_crypto_keys::{CompactSignature, PublicKey};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{
    chain::ChainId,
    json::{expect_object, read_field, ChainJson},
    operations::Operation,
    types::{Extensions, TimePointSec},
    wire::{decode_exact, encode, WireDecode, WireEncode, WireReader},
    SignerError, WireError,
};

/// Length of a transaction id.
pub const TRANSACTION_ID_LENGTH: usize = 20;

/// Replay protection: a pointer at a recent block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefBlock {
    /// Low 16 bits of the block number.
    pub num: u16,
    /// Bytes 4..8 of the block id, little-endian.
    pub prefix: u32,
}

impl RefBlock {
    /// Reference the given head block.
    ///
    /// Block ids start with the big-endian block number, so the prefix taken
    /// from the following four bytes is what actually pins the fork.
    pub fn from_head(head_block_number: u32, head_block_id: &str) -> Result<Self, SignerError> {
        let id = hex::decode(head_block_id)
            .map_err(|e| SignerError::InvalidRefBlock(format!("{head_block_id}: {e}")))?;
        if id.len() < 8 {
            return Err(SignerError::InvalidRefBlock(format!(
                "{head_block_id}: block id shorter than 8 bytes"
            )));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&id[4..8]);
        Ok(Self {
            num: (head_block_number & 0xffff) as u16,
            prefix: u32::from_le_bytes(prefix),
        })
    }
}

/// First 20 bytes of `sha256` over the unsigned encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; TRANSACTION_ID_LENGTH]);

impl TransactionId {
    pub fn as_bytes(&self) -> &[u8; TRANSACTION_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

/// A transaction, signed or not.
///
/// The wire impls cover the unsigned form, which is what gets hashed; use
/// [`Transaction::signed_bytes`] for the form that also carries signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: TimePointSec,
    pub operations: Vec<Operation>,
    pub extensions: Extensions,
    pub signatures: Vec<CompactSignature>,
}

impl Transaction {
    pub fn new(ref_block: RefBlock, expiration: TimePointSec, operations: Vec<Operation>) -> Self {
        Self {
            ref_block_num: ref_block.num,
            ref_block_prefix: ref_block.prefix,
            expiration,
            operations,
            extensions: Extensions,
            signatures: Vec::new(),
        }
    }

    /// The bytes that are hashed for the digest and the id.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    /// The unsigned bytes followed by the signature list.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut out = self.unsigned_bytes();
        self.signatures.wire_encode(&mut out);
        out
    }

    pub fn from_signed_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        let mut tx = Self::wire_decode(&mut reader)?;
        tx.signatures = Vec::wire_decode(&mut reader)?;
        match reader.remaining().len() {
            0 => Ok(tx),
            extra => Err(WireError::TrailingBytes(extra)),
        }
    }

    pub fn from_unsigned_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode_exact(bytes)
    }

    /// `sha256(chain_id || unsigned bytes)`, the value every signature signs.
    pub fn digest(&self, chain_id: &ChainId) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id.as_bytes());
        hasher.update(self.unsigned_bytes());
        hasher.finalize().into()
    }

    pub fn id(&self) -> TransactionId {
        let hash = Sha256::digest(self.unsigned_bytes());
        let mut id = [0u8; TRANSACTION_ID_LENGTH];
        id.copy_from_slice(&hash[..TRANSACTION_ID_LENGTH]);
        TransactionId(id)
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// Whether the chain would already refuse this transaction at `now`.
    pub fn is_expired_at(&self, now: TimePointSec) -> bool {
        self.expiration <= now
    }

    /// Recover the key behind each signature, in signature order.
    pub fn signer_keys(&self, chain_id: &ChainId) -> Result<Vec<PublicKey>, SignerError> {
        let digest = self.digest(chain_id);
        self.signatures
            .iter()
            .map(|signature| PublicKey::recover(&digest, signature).map_err(SignerError::from))
            .collect()
    }
}

impl WireEncode for Transaction {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        self.ref_block_num.wire_encode(out);
        self.ref_block_prefix.wire_encode(out);
        self.expiration.wire_encode(out);
        self.operations.wire_encode(out);
        self.extensions.wire_encode(out);
    }
}

impl WireDecode for Transaction {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            ref_block_num: u16::wire_decode(reader)?,
            ref_block_prefix: u32::wire_decode(reader)?,
            expiration: TimePointSec::wire_decode(reader)?,
            operations: Vec::wire_decode(reader)?,
            extensions: Extensions::wire_decode(reader)?,
            signatures: Vec::new(),
        })
    }
}

impl ChainJson for Transaction {
    fn to_chain_json(&self, prefix: &str) -> Value {
        let mut object = Map::new();
        object.insert("ref_block_num".into(), self.ref_block_num.to_chain_json(prefix));
        object.insert("ref_block_prefix".into(), self.ref_block_prefix.to_chain_json(prefix));
        object.insert("expiration".into(), self.expiration.to_chain_json(prefix));
        object.insert("operations".into(), self.operations.to_chain_json(prefix));
        object.insert("extensions".into(), self.extensions.to_chain_json(prefix));
        object.insert("signatures".into(), self.signatures.to_chain_json(prefix));
        Value::Object(object)
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        let object = expect_object(value, "transaction")?;
        let signatures: Option<Vec<CompactSignature>> = read_field(object, "signatures", prefix)?;
        Ok(Self {
            ref_block_num: read_field(object, "ref_block_num", prefix)?,
            ref_block_prefix: read_field(object, "ref_block_prefix", prefix)?,
            expiration: read_field(object, "expiration", prefix)?,
            operations: read_field(object, "operations", prefix)?,
            extensions: read_field(object, "extensions", prefix)?,
            signatures: signatures.unwrap_or_default(),
        })
    }
}
