// Copyright (c) 2024 The Morphene Developers

//! The chain's canonical binary encoding.
//!
//! Fixed-width integers are little-endian. Lengths, counts and operation
//! tags are unsigned LEB128 varints. Strings and byte vectors are length
//! prefixed, sequences are count prefixed, and optional values carry a one
//! byte presence flag. Sets and maps are written in ascending key order.
//!
//! Signatures are checked byte-for-byte against this encoding, so every
//! implementation here must match the node exactly.

use std::collections::{BTreeMap, BTreeSet};

use mph_crypto_keys::{CompactSignature, PublicKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

use crate::WireError;

/// A value with a canonical binary form.
pub trait WireEncode {
    /// Append the encoding of `self` to `out`.
    fn wire_encode(&self, out: &mut Vec<u8>);
}

/// A value that can be read back from its canonical binary form.
pub trait WireDecode: Sized {
    /// Read one value, advancing the reader past it.
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError>;
}

/// Encode a value into a fresh buffer.
pub fn encode<T: WireEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.wire_encode(&mut out);
    out
}

/// Decode one value from the front of `bytes`, returning the rest.
pub fn decode<T: WireDecode>(bytes: &[u8]) -> Result<(T, &[u8]), WireError> {
    let mut reader = WireReader::new(bytes);
    let value = T::wire_decode(&mut reader)?;
    Ok((value, reader.remaining()))
}

/// Decode a value that must consume the whole buffer.
pub fn decode_exact<T: WireDecode>(bytes: &[u8]) -> Result<T, WireError> {
    let (value, rest) = decode(bytes)?;
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }
    Ok(value)
}

/// Cursor over an input buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the front of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The unread tail of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }

    /// Take exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let available = self.bytes.len() - self.offset;
        if len > available {
            return Err(WireError::Truncated {
                offset: self.offset,
                needed: len - available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Take a fixed-size array.
    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    /// Read an unsigned LEB128 integer no wider than `bits`.
    pub fn read_varint(&mut self, bits: u32) -> Result<u64, WireError> {
        let start = self.offset;
        let overflow = WireError::VarintOverflow { offset: start, bits };
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.take(1)?[0];
            let chunk = u64::from(byte & 0x7f);
            if shift >= bits || (chunk << shift) >> shift != chunk {
                return Err(overflow);
            }
            value |= chunk << shift;
            if bits < 64 && value >> bits != 0 {
                return Err(overflow);
            }
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read a varint length and check it against what is left.
    pub fn read_length(&mut self) -> Result<usize, WireError> {
        let start = self.offset;
        let len = self.read_varint(32)? as usize;
        let available = self.bytes.len() - self.offset;
        if len > available {
            return Err(WireError::Truncated {
                offset: start,
                needed: len - available,
            });
        }
        Ok(len)
    }

    fn read_flag(&mut self) -> Result<bool, WireError> {
        let offset = self.offset;
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidBool { offset, value }),
        }
    }
}

/// Append an unsigned LEB128 integer.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// A `u32` that travels as a varint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarUint32(pub u32);

/// A `u64` that travels as a varint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarUint64(pub u64);

impl WireEncode for VarUint32 {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, u64::from(self.0));
    }
}

impl WireDecode for VarUint32 {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self(reader.read_varint(32)? as u32))
    }
}

impl WireEncode for VarUint64 {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.0);
    }
}

impl WireDecode for VarUint64 {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self(reader.read_varint(64)?))
    }
}

macro_rules! impl_fixed_int {
    ($($ty:ty),*) => {$(
        impl WireEncode for $ty {
            fn wire_encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl WireDecode for $ty {
            fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
                Ok(<$ty>::from_le_bytes(reader.take_array()?))
            }
        }
    )*};
}

impl_fixed_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl WireEncode for bool {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        reader.read_flag()
    }
}

impl WireEncode for str {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        out.extend_from_slice(self.as_bytes());
    }
}

impl WireEncode for String {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        self.as_str().wire_encode(out);
    }
}

impl WireDecode for String {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let len = reader.read_length()?;
        let start = reader.offset();
        let bytes = reader.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8(start))
    }
}

impl<const N: usize> WireEncode for [u8; N] {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> WireDecode for [u8; N] {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        reader.take_array()
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        for item in self {
            item.wire_encode(out);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        // Every element takes at least one byte, so the count is bounded by
        // what is left in the buffer.
        let count = reader.read_length()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::wire_decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        match self {
            Some(value) => {
                out.push(1);
                value.wire_encode(out);
            }
            None => out.push(0),
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        if reader.read_flag()? {
            Ok(Some(T::wire_decode(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: WireEncode> WireEncode for BTreeSet<T> {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        for item in self {
            item.wire_encode(out);
        }
    }
}

impl<T: WireDecode + Ord> WireDecode for BTreeSet<T> {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let count = reader.read_length()?;
        let mut items = BTreeSet::new();
        for _ in 0..count {
            items.insert(T::wire_decode(reader)?);
        }
        Ok(items)
    }
}

impl<K: WireEncode, V: WireEncode> WireEncode for BTreeMap<K, V> {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        for (key, value) in self {
            key.wire_encode(out);
            value.wire_encode(out);
        }
    }
}

impl<K: WireDecode + Ord, V: WireDecode> WireDecode for BTreeMap<K, V> {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let count = reader.read_length()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = K::wire_decode(reader)?;
            let value = V::wire_decode(reader)?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

impl WireEncode for PublicKey {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for PublicKey {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let bytes = reader.take(PUBLIC_KEY_LENGTH)?;
        PublicKey::from_bytes(bytes).map_err(|e| WireError::InvalidPublicKey(e.to_string()))
    }
}

impl WireEncode for CompactSignature {
    fn wire_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for CompactSignature {
    fn wire_decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let bytes = reader.take(SIGNATURE_LENGTH)?;
        CompactSignature::from_bytes(bytes).map_err(|e| WireError::InvalidSignature(e.to_string()))
    }
}
