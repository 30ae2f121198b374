//! Messages signed with an account's memo key.
//!
//! The armored form is what other Morphene clients produce and accept:
//!
//! ```text
//! -----BEGIN MORPHENE SIGNED MESSAGE-----
//! hello
//! -----BEGIN META-----
//! account=alice
//! memokey=MPH...
//! block=1234
//! timestamp=2024-01-01T00:00:00
//! -----BEGIN SIGNATURE-----
//! 1f...
//! -----END MORPHENE SIGNED MESSAGE-----
//! ```
//!
//! The signature covers the message followed by the four meta lines, so
//! none of them can be altered without invalidating it.

use mph_crypto_keys::{CompactSignature, KeyMaterial, PublicKey};
use sha2::{Digest, Sha256};

use crate::MessageError;

const BEGIN_MESSAGE: &str = "-----BEGIN MORPHENE SIGNED MESSAGE-----";
const BEGIN_META: &str = "-----BEGIN META-----";
const BEGIN_SIGNATURE: &str = "-----BEGIN SIGNATURE-----";
const END_MESSAGE: &str = "-----END MORPHENE SIGNED MESSAGE-----";

/// Who signed, with which key, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub account: String,
    pub memokey: PublicKey,
    /// Head block number at signing time
    pub block: u32,
    /// Head block time as the signer wrote it, normally
    /// `TimePointSec::to_string()`
    pub timestamp: String,
}

/// A parsed and verified signed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: String,
    pub meta: MessageMeta,
    pub signature: CompactSignature,
}

/// The meta lines exactly as they appear in the text.
struct RawMeta<'a> {
    account: &'a str,
    memokey: &'a str,
    block: &'a str,
    timestamp: &'a str,
}

fn signing_digest(message: &str, meta: &RawMeta<'_>) -> [u8; 32] {
    let payload = format!(
        "{}\naccount={}\nmemokey={}\nblock={}\ntimestamp={}",
        message, meta.account, meta.memokey, meta.block, meta.timestamp
    );
    Sha256::digest(payload.as_bytes()).into()
}

/// The text between `start` and `end`, searching from `from`.
fn section<'a>(text: &'a str, start: &str, end: &str, from: usize) -> Result<(&'a str, usize), MessageError> {
    let missing = |marker: &str| MessageError::Malformed(format!("missing {marker}"));
    let begin = text[from..].find(start).ok_or_else(|| missing(start))? + from + start.len();
    let finish = text[begin..].find(end).ok_or_else(|| missing(end))? + begin;
    Ok((&text[begin..finish], finish))
}

impl SignedMessage {
    /// Sign `message` with `key` and return the armored text.
    ///
    /// `key` must be the private half of `meta.memokey`. Surrounding
    /// whitespace is stripped from the message before signing.
    pub fn sign(message: &str, meta: MessageMeta, key: &KeyMaterial, prefix: &str) -> Result<String, MessageError> {
        if key.public_key() != &meta.memokey {
            return Err(MessageError::InvalidMessageSignature(
                meta.memokey.to_string_with_prefix(prefix),
            ));
        }
        let message = message.trim().to_string();
        let memokey = meta.memokey.to_string_with_prefix(prefix);
        let block = meta.block.to_string();
        let raw = RawMeta {
            account: &meta.account,
            memokey: &memokey,
            block: &block,
            timestamp: &meta.timestamp,
        };
        let signature = key.sign_digest(&signing_digest(&message, &raw))?;
        Ok(SignedMessage {
            message,
            meta,
            signature,
        }
        .to_armored(prefix))
    }

    /// Parse armored text and check its signature against the memo key it
    /// names.
    ///
    /// This does not look the account up on chain; callers that care
    /// whether `memokey` really belongs to `account` must check that
    /// separately. The signature is checked over the meta values as
    /// written, so other clients' formatting is accepted as long as the
    /// fields parse.
    pub fn verify(text: &str, prefix: &str) -> Result<Self, MessageError> {
        let (message, at) = section(text, BEGIN_MESSAGE, BEGIN_META, 0)?;
        let (meta_text, at) = section(text, BEGIN_META, BEGIN_SIGNATURE, at)?;
        let (signature, _) = section(text, BEGIN_SIGNATURE, END_MESSAGE, at)?;

        let field = |name: &'static str| {
            meta_text
                .lines()
                .filter_map(|line| line.trim().split_once('='))
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.trim())
                .ok_or(MessageError::MissingField(name))
        };
        let raw = RawMeta {
            account: field("account")?,
            memokey: field("memokey")?,
            block: field("block")?,
            timestamp: field("timestamp")?,
        };
        let memokey = PublicKey::from_str_with_prefix(raw.memokey, prefix)?;
        let block = raw
            .block
            .parse::<u32>()
            .map_err(|e| MessageError::Malformed(format!("block: {e}")))?;
        let signature = CompactSignature::from_hex(signature.trim())?;

        let parsed = SignedMessage {
            message: message.trim().to_string(),
            meta: MessageMeta {
                account: raw.account.to_string(),
                memokey,
                block,
                timestamp: raw.timestamp.to_string(),
            },
            signature,
        };

        let digest = signing_digest(&parsed.message, &raw);
        let signer = PublicKey::recover(&digest, &parsed.signature)?;
        if signer != parsed.meta.memokey {
            return Err(MessageError::InvalidMessageSignature(
                parsed.meta.memokey.to_string_with_prefix(prefix),
            ));
        }
        Ok(parsed)
    }

    pub fn to_armored(&self, prefix: &str) -> String {
        format!(
            "{BEGIN_MESSAGE}\n{}\n{BEGIN_META}\naccount={}\nmemokey={}\nblock={}\ntimestamp={}\n{BEGIN_SIGNATURE}\n{}\n{END_MESSAGE}\n",
            self.message,
            self.meta.account,
            self.meta.memokey.to_string_with_prefix(prefix),
            self.meta.block,
            self.meta.timestamp,
            self.signature.to_hex(),
        )
    }
}
