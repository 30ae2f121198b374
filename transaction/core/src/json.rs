// Copyright (c) 2024 The Morphene Developers

//! The JSON shape nodes accept and return for wire types.
//!
//! This mirrors the binary schema: structs become objects with the same
//! field names, sequences and sets become arrays, maps become arrays of
//! `[key, value]` pairs, and public keys carry the network's address
//! prefix, which is why every conversion takes it as context.

use std::collections::{BTreeMap, BTreeSet};

use mph_crypto_keys::{CompactSignature, PublicKey};
use serde_json::{Map, Value};

use crate::{
    wire::{VarUint32, VarUint64},
    WireError,
};

/// Largest magnitude the node prints as a bare JSON number for 64-bit
/// integers; anything wider is quoted.
const JSON_INT_LIMIT: u64 = 0xffff_ffff;

/// Conversion to and from the node's JSON representation.
pub trait ChainJson: Sized {
    /// Render `self`, writing public keys with `prefix`.
    fn to_chain_json(&self, prefix: &str) -> Value;

    /// Parse a value, requiring public keys to carry `prefix`.
    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError>;
}

/// Borrow `value` as an object or fail naming `what`.
pub fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, WireError> {
    value
        .as_object()
        .ok_or_else(|| WireError::json(what, format!("expected an object, got {value}")))
}

/// Read `name` from `object`; a missing field is read as `null`.
pub fn read_field<T: ChainJson>(object: &Map<String, Value>, name: &str, prefix: &str) -> Result<T, WireError> {
    let value = object.get(name).unwrap_or(&Value::Null);
    T::from_chain_json(value, prefix).map_err(|err| match err {
        WireError::InvalidJson { field, reason } => WireError::InvalidJson {
            field: format!("{name}.{field}"),
            reason,
        },
        other => other,
    })
}

fn as_integer<T: TryFrom<i128>>(value: &Value, what: &str) -> Result<T, WireError> {
    let wide: i128 = match value {
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from))
            .ok_or_else(|| WireError::json(what, format!("{number} is not an integer")))?,
        Value::String(text) => text
            .parse()
            .map_err(|_| WireError::json(what, format!("{text:?} is not an integer")))?,
        other => return Err(WireError::json(what, format!("expected an integer, got {other}"))),
    };
    T::try_from(wide).map_err(|_| WireError::json(what, format!("{wide} is out of range")))
}

macro_rules! impl_small_int_json {
    ($($ty:ty),*) => {$(
        impl ChainJson for $ty {
            fn to_chain_json(&self, _prefix: &str) -> Value {
                Value::from(*self)
            }

            fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
                as_integer(value, stringify!($ty))
            }
        }
    )*};
}

impl_small_int_json!(u8, u16, u32, i8, i16, i32);

impl ChainJson for u64 {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        if *self > JSON_INT_LIMIT {
            Value::String(self.to_string())
        } else {
            Value::from(*self)
        }
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        as_integer(value, "u64")
    }
}

impl ChainJson for i64 {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        if self.unsigned_abs() > JSON_INT_LIMIT {
            Value::String(self.to_string())
        } else {
            Value::from(*self)
        }
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        as_integer(value, "i64")
    }
}

impl ChainJson for VarUint32 {
    fn to_chain_json(&self, prefix: &str) -> Value {
        self.0.to_chain_json(prefix)
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        Ok(Self(u32::from_chain_json(value, prefix)?))
    }
}

impl ChainJson for VarUint64 {
    fn to_chain_json(&self, prefix: &str) -> Value {
        self.0.to_chain_json(prefix)
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        Ok(Self(u64::from_chain_json(value, prefix)?))
    }
}

impl ChainJson for bool {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::Bool(*self)
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            // Older nodes print flags as 0/1.
            Value::Number(number) if number.as_u64() == Some(0) => Ok(false),
            Value::Number(number) if number.as_u64() == Some(1) => Ok(true),
            other => Err(WireError::json("bool", format!("expected a bool, got {other}"))),
        }
    }
}

impl ChainJson for String {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::String(self.clone())
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WireError::json("string", format!("expected a string, got {value}")))
    }
}

impl<T: ChainJson> ChainJson for Option<T> {
    fn to_chain_json(&self, prefix: &str) -> Value {
        match self {
            Some(inner) => inner.to_chain_json(prefix),
            None => Value::Null,
        }
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        match value {
            Value::Null => Ok(None),
            other => Ok(Some(T::from_chain_json(other, prefix)?)),
        }
    }
}

fn expect_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, WireError> {
    value
        .as_array()
        .ok_or_else(|| WireError::json(what, format!("expected an array, got {value}")))
}

impl<T: ChainJson> ChainJson for Vec<T> {
    fn to_chain_json(&self, prefix: &str) -> Value {
        Value::Array(self.iter().map(|item| item.to_chain_json(prefix)).collect())
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        expect_array(value, "array")?
            .iter()
            .map(|item| T::from_chain_json(item, prefix))
            .collect()
    }
}

impl<T: ChainJson + Ord> ChainJson for BTreeSet<T> {
    fn to_chain_json(&self, prefix: &str) -> Value {
        Value::Array(self.iter().map(|item| item.to_chain_json(prefix)).collect())
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        expect_array(value, "set")?
            .iter()
            .map(|item| T::from_chain_json(item, prefix))
            .collect()
    }
}

impl<K: ChainJson + Ord, V: ChainJson> ChainJson for BTreeMap<K, V> {
    fn to_chain_json(&self, prefix: &str) -> Value {
        Value::Array(
            self.iter()
                .map(|(key, value)| Value::Array(vec![key.to_chain_json(prefix), value.to_chain_json(prefix)]))
                .collect(),
        )
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        expect_array(value, "map")?
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([key, value]) => Ok((K::from_chain_json(key, prefix)?, V::from_chain_json(value, prefix)?)),
                _ => Err(WireError::json("map", format!("expected a [key, value] pair, got {pair}"))),
            })
            .collect()
    }
}

impl ChainJson for PublicKey {
    fn to_chain_json(&self, prefix: &str) -> Value {
        Value::String(self.to_string_with_prefix(prefix))
    }

    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        let text = value
            .as_str()
            .ok_or_else(|| WireError::json("public_key", format!("expected a string, got {value}")))?;
        PublicKey::from_str_with_prefix(text, prefix).map_err(|e| WireError::InvalidPublicKey(e.to_string()))
    }
}

impl ChainJson for CompactSignature {
    fn to_chain_json(&self, _prefix: &str) -> Value {
        Value::String(self.to_hex())
    }

    fn from_chain_json(value: &Value, _prefix: &str) -> Result<Self, WireError> {
        let text = value
            .as_str()
            .ok_or_else(|| WireError::json("signature", format!("expected a string, got {value}")))?;
        CompactSignature::from_hex(text).map_err(|e| WireError::InvalidSignature(e.to_string()))
    }
}
