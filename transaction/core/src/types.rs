// Copyright (c) 2024 The Morphene Developers

//! Chain value types shared by operations and transactions.

use core::{fmt, str::FromStr};
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use mph_crypto_keys::PublicKey;
use serde_json::Value;

use crate::{
    json::ChainJson,
    wire::{write_varint, WireDecode, WireEncode, WireReader},
    WireError,
};

/// Account names travel as plain strings.
pub type AccountName = String;

/// Width of the symbol field in an encoded asset.
const SYMBOL_WIDTH: usize = 7;

/// Longest symbol name the chain accepts.
const MAX_SYMBOL_LEN: usize = 6;

/// Largest precision whose scale still fits an `i64`.
const MAX_PRECISION: u8 = 18;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Seconds since the Unix epoch, as a `u32`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimePointSec(u32);

impl TimePointSec {
    pub const fn from_unix(seconds: u32) -> Self {
        Self(seconds)
    }

    pub fn as_unix(&self) -> u32 {
        self.0
    }

    /// The current wall clock time, saturating at the type's range.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self(time.timestamp().clamp(0, i64::from(u32::MAX)) as u32)
    }

    pub fn saturating_add(&self, seconds: u32) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    /// Seconds from `self` until `later`, zero if `later` is not after it.
    pub fn seconds_until(&self, later: TimePointSec) -> u32 {
        later.0.saturating_sub(self.0)
    }
}

impl fmt::Display for TimePointSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp(i64::from(self.0), 0) {
            Some(time) => write!(f, "{}", time.format(TIME_FORMAT)),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for TimePointSec {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let time = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
            .map_err(|e| WireError::InvalidTime(format!("{s:?}: {e}")))?;
        let seconds = time.and_utc().timestamp();
        u32::try_from(seconds)
            .map(Self)
            .map_err(|_| WireError::InvalidTime(format!("{s:?} is outside the u32 range")))
    }
}

impl WireEncode for TimePointSec {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        self.0.wire_encode(out);
    }
}

impl WireDecode for TimePointSec {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self(u32::wire_decode(reader)?))
    }
}

impl ChainJson for TimePointSec {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::String(self.to_string())
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        value
            .as_str()
            .ok_or_else(|| WireError::json("time_point_sec", format!("expected a string, got {value}")))?
            .parse()
    }
}

/// An amount of a token, stored as an integer count of its smallest unit.
///
/// `Asset::new(1500, 3, "MORPH")` is `1.500 MORPH`. Precision and symbol
/// are only set through the checked constructors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Asset {
    amount: i64,
    precision: u8,
    symbol: String,
}

impl Asset {
    pub fn new(amount: i64, precision: u8, symbol: &str) -> Result<Self, WireError> {
        validate_symbol(symbol)?;
        if precision > MAX_PRECISION {
            return Err(WireError::InvalidAsset(format!("precision {precision} is too large")));
        }
        Ok(Self {
            amount,
            precision,
            symbol: symbol.to_string(),
        })
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

fn validate_symbol(symbol: &str) -> Result<(), WireError> {
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN || !symbol.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(WireError::InvalidAsset(format!("bad symbol {symbol:?}")));
    }
    Ok(())
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let magnitude = self.amount.unsigned_abs();
        if self.precision == 0 {
            return write!(f, "{sign}{magnitude} {}", self.symbol);
        }
        let scale = 10u64.pow(u32::from(self.precision));
        write!(
            f,
            "{sign}{}.{:0width$} {}",
            magnitude / scale,
            magnitude % scale,
            self.symbol,
            width = usize::from(self.precision)
        )
    }
}

impl FromStr for Asset {
    type Err = WireError;

    /// Parse `"1.000 MORPH"`; the number of decimals sets the precision.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WireError::InvalidAsset(format!("{s:?}"));
        let mut parts = s.split_whitespace();
        let (Some(number), Some(symbol), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(bad());
        };
        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
            || (digits.contains('.') && fraction.is_empty())
        {
            return Err(bad());
        }
        let precision = u8::try_from(fraction.len()).map_err(|_| bad())?;
        if precision > MAX_PRECISION {
            return Err(bad());
        }
        let magnitude: i64 = format!("{whole}{fraction}").parse().map_err(|_| bad())?;
        let amount = if negative { -magnitude } else { magnitude };
        Asset::new(amount, precision, symbol)
    }
}

impl WireEncode for Asset {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        self.amount.wire_encode(out);
        self.precision.wire_encode(out);
        let mut symbol = [0u8; SYMBOL_WIDTH];
        let len = self.symbol.len().min(SYMBOL_WIDTH);
        symbol[..len].copy_from_slice(&self.symbol.as_bytes()[..len]);
        out.extend_from_slice(&symbol);
    }
}

impl WireDecode for Asset {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let amount = i64::wire_decode(reader)?;
        let precision = u8::wire_decode(reader)?;
        let raw: [u8; SYMBOL_WIDTH] = reader.take_array()?;
        let len = raw.iter().position(|b| *b == 0).unwrap_or(SYMBOL_WIDTH);
        if raw[len..].iter().any(|b| *b != 0) {
            return Err(WireError::InvalidAsset("symbol is not zero padded".to_string()));
        }
        let symbol = core::str::from_utf8(&raw[..len])
            .map_err(|_| WireError::InvalidAsset("symbol is not ASCII".to_string()))?;
        Asset::new(amount, precision, symbol)
    }
}

impl ChainJson for Asset {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::String(self.to_string())
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        value
            .as_str()
            .ok_or_else(|| WireError::json("asset", format!("expected a string, got {value}")))?
            .parse()
    }
}

wire_struct! {
    /// An exchange rate between two assets.
    Price {
        base: Asset,
        quote: Asset,
    }
}

wire_struct! {
    /// Weighted keys and accounts able to act for a role.
    ///
    /// The maps are sorted by key, which is the order the chain expects;
    /// public keys compare by their compressed bytes.
    Authority {
        weight_threshold: u32,
        account_auths: BTreeMap<AccountName, u16>,
        key_auths: BTreeMap<PublicKey, u16>,
    }
}

impl Authority {
    /// A threshold-1 authority satisfied by a single key.
    pub fn single_key(key: PublicKey) -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::new(),
            key_auths: [(key, 1)].into_iter().collect(),
        }
    }
}

wire_struct! {
    /// Parameters a witness votes on.
    ChainProperties {
        account_creation_fee: Asset,
        maximum_block_size: u32,
        sbd_interest_rate: u16,
    }
}

/// The reserved future-extension list. Always empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extensions;

impl WireEncode for Extensions {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, 0);
    }
}

impl WireDecode for Extensions {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        match reader.read_varint(32)? {
            0 => Ok(Extensions),
            count => Err(WireError::UnsupportedExtension(count)),
        }
    }
}

impl ChainJson for Extensions {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::Array(Vec::new())
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        match value {
            Value::Null => Ok(Extensions),
            Value::Array(items) if items.is_empty() => Ok(Extensions),
            Value::Array(items) => Err(WireError::UnsupportedExtension(items.len() as u64)),
            other => Err(WireError::json("extensions", format!("expected an array, got {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode_exact, encode};
    use serde_json::json;

    #[test]
    fn test_asset_text() {
        let asset: Asset = "1.000 MORPH".parse().unwrap();
        assert_eq!(asset, Asset::new(1000, 3, "MORPH").unwrap());
        assert_eq!(asset.to_string(), "1.000 MORPH");

        let vests: Asset = "123456.000001 VESTS".parse().unwrap();
        assert_eq!(vests.amount(), 123_456_000_001);
        assert_eq!(vests.precision(), 6);
        assert_eq!(vests.to_string(), "123456.000001 VESTS");

        assert_eq!(Asset::new(-1, 3, "MORPH").unwrap().to_string(), "-0.001 MORPH");
        assert_eq!(Asset::new(5, 0, "PTS").unwrap().to_string(), "5 PTS");
    }

    #[test]
    fn test_asset_text_rejects() {
        for bad in ["1.000", "1.000 morph", "1. MORPH", ".5 MORPH", "1.000 MORPH extra", "x MORPH", "1.000 TOOLONG"] {
            assert!(bad.parse::<Asset>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_asset_wire_vector() {
        let asset: Asset = "1.000 MORPH".parse().unwrap();
        assert_eq!(hex::encode(encode(&asset)), "e803000000000000034d4f5250480000");
        assert_eq!(decode_exact::<Asset>(&encode(&asset)).unwrap(), asset);

        let bad_padding = hex::decode("e803000000000000034d4f525048004d").unwrap();
        assert!(matches!(decode_exact::<Asset>(&bad_padding), Err(WireError::InvalidAsset(_))));
    }

    #[test]
    fn test_asset_precision_is_bounded() {
        assert!(Asset::new(1, MAX_PRECISION, "MORPH").is_ok());
        assert!(matches!(Asset::new(1, 25, "MORPH"), Err(WireError::InvalidAsset(_))));

        // Same bytes as 1.000 MORPH with precision 25.
        let wide = hex::decode("e803000000000000194d4f5250480000").unwrap();
        assert!(matches!(decode_exact::<Asset>(&wide), Err(WireError::InvalidAsset(_))));

        let widest = Asset::new(i64::MIN, MAX_PRECISION, "MORPH").unwrap();
        assert_eq!(widest.to_string(), "-9.223372036854775808 MORPH");
    }

    #[test]
    fn test_time_point_sec() {
        let time: TimePointSec = "2018-03-01T12:00:00".parse().unwrap();
        assert_eq!(time.as_unix(), 1_519_905_600);
        assert_eq!(time.to_string(), "2018-03-01T12:00:00");
        assert_eq!(hex::encode(encode(&time)), "40eb975a");
        assert_eq!(time.to_chain_json(""), json!("2018-03-01T12:00:00"));
        assert!("1969-12-31T23:59:59".parse::<TimePointSec>().is_err());
        assert!("2018-03-01 12:00:00".parse::<TimePointSec>().is_err());
        assert_eq!(time.seconds_until(time.saturating_add(30)), 30);
        assert_eq!(time.saturating_add(30).seconds_until(time), 0);
    }

    #[test]
    fn test_authority_orders_keys() {
        let mut keys = Vec::new();
        for seed in [3u8, 1, 2] {
            let mut bytes = [0u8; 32];
            bytes[31] = seed;
            keys.push(mph_crypto_keys::PrivateKey::from_bytes(&bytes).unwrap().public_key());
        }
        let authority = Authority {
            weight_threshold: 2,
            account_auths: [("zed".to_string(), 1u16), ("amy".to_string(), 1)].into_iter().collect(),
            key_auths: keys.iter().map(|k| (*k, 1u16)).collect(),
        };
        let bytes = encode(&authority);
        // threshold, two accounts (amy first), three keys
        assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..9], &[2, 3, b'a', b'm', b'y']);
        let mut sorted = keys.clone();
        sorted.sort();
        let first_key_at = 4 + 1 + (1 + 3 + 2) * 2 + 1;
        assert_eq!(&bytes[first_key_at..first_key_at + 33], sorted[0].as_bytes());
        assert_eq!(decode_exact::<Authority>(&bytes).unwrap(), authority);
    }

    #[test]
    fn test_authority_json() {
        let mut one = [0u8; 32];
        one[31] = 1;
        let key = mph_crypto_keys::PrivateKey::from_bytes(&one).unwrap().public_key();
        let authority = Authority::single_key(key);
        let value = authority.to_chain_json("MPH");
        assert_eq!(
            value,
            json!({
                "weight_threshold": 1,
                "account_auths": [],
                "key_auths": [["MPH5p78kHbL33Rn3JWkTWRE2B9uz6gy4r1KbfAKLNQGE3ovMBS5bu", 1]],
            })
        );
        assert_eq!(Authority::from_chain_json(&value, "MPH").unwrap(), authority);
        assert!(Authority::from_chain_json(&value, "STM").is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(encode(&Extensions), vec![0]);
        assert_eq!(
            decode_exact::<Extensions>(&[1, 0]).unwrap_err(),
            WireError::UnsupportedExtension(1)
        );
    }
}
