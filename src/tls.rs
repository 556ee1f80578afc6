// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic binary codec mirroring the TLS 1.3 presentation language.
//!
//! Integers serialize big-endian. Variable-length fields carry a length prefix of one to four
//! octets. Optional values carry a one-octet presence marker. Types whose decoding depends on
//! the group's cipher suite implement [`DecodeWith`] and receive the suite as decoding
//! context, mirroring the way the wire format leaves suite-sized fields implicit.
//!
//! The codec is deterministic in both directions: `decode(encode(x)) == x` and
//! `encode(decode(b)) == b` for well-formed `b`.
use crate::error::{Error, Result};

/// Serialization into the wire format.
///
/// Encoding fails only when a field exceeds the range of its length prefix.
pub trait Encode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;
}

/// Deserialization from the wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self>;
}

/// Deserialization for types which cannot initialize themselves from bytes alone and need a
/// decoding context threaded through, typically the cipher suite.
pub trait DecodeWith<Ctx: Copy>: Sized {
    fn decode_with(r: &mut Reader<'_>, ctx: Ctx) -> Result<Self>;
}

/// Cursor over an input buffer. Reads never run past the end of the current frame.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes `len` raw octets from the input.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::TlsSyntax("truncated input"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Reads a big-endian unsigned integer of `len` octets (at most eight).
    pub fn take_uint(&mut self, len: usize) -> Result<u64> {
        let bytes = self.take(len)?;
        let mut value = 0u64;
        for byte in bytes {
            value = (value << 8) | u64::from(*byte);
        }
        Ok(value)
    }

    /// Splits off a sub-reader over a length-prefixed payload. The declared length must fit
    /// inside the current frame.
    pub fn take_framed(&mut self, header: usize) -> Result<Reader<'a>> {
        let len = self.take_uint(header)? as usize;
        let payload = self
            .take(len)
            .map_err(|_| Error::TlsSyntax("length prefix exceeds frame"))?;
        Ok(Reader::new(payload))
    }
}

/// Encodes a value into a fresh buffer.
pub fn to_bytes<T: Encode>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.encode(&mut buf)?;
    Ok(buf)
}

/// Decodes a value, requiring the input to be fully consumed.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> Result<T> {
    let mut r = Reader::new(bytes);
    let value = T::decode(&mut r)?;
    if !r.is_empty() {
        return Err(Error::TlsSyntax("trailing octets after value"));
    }
    Ok(value)
}

/// Context-threaded counterpart of [`from_bytes`].
pub fn from_bytes_with<T: DecodeWith<Ctx>, Ctx: Copy>(bytes: &[u8], ctx: Ctx) -> Result<T> {
    let mut r = Reader::new(bytes);
    let value = T::decode_with(&mut r, ctx)?;
    if !r.is_empty() {
        return Err(Error::TlsSyntax("trailing octets after value"));
    }
    Ok(value)
}

pub fn write_uint(buf: &mut Vec<u8>, header: usize, value: u64) -> Result<()> {
    debug_assert!((1..=8).contains(&header));
    if header < 8 && value >= 1 << (8 * header) {
        return Err(Error::TlsSyntax("value overflows length prefix"));
    }
    for shift in (0..header).rev() {
        buf.push((value >> (8 * shift)) as u8);
    }
    Ok(())
}

/// Writes a byte string behind a length prefix of `header` octets.
pub fn encode_opaque(buf: &mut Vec<u8>, header: usize, data: &[u8]) -> Result<()> {
    write_uint(buf, header, data.len() as u64)?;
    buf.extend_from_slice(data);
    Ok(())
}

/// Reads a byte string behind a length prefix of `header` octets.
pub fn decode_opaque(r: &mut Reader<'_>, header: usize) -> Result<Vec<u8>> {
    let len = r.take_uint(header)? as usize;
    if len > r.remaining() {
        return Err(Error::TlsSyntax("length prefix exceeds frame"));
    }
    Ok(r.take(len)?.to_vec())
}

/// Writes a sequence of elements behind a length prefix covering their total byte length.
pub fn encode_vector<T: Encode>(buf: &mut Vec<u8>, header: usize, items: &[T]) -> Result<()> {
    let mut payload = Vec::new();
    for item in items {
        item.encode(&mut payload)?;
    }
    encode_opaque(buf, header, &payload)
}

pub fn decode_vector<T: Decode>(r: &mut Reader<'_>, header: usize) -> Result<Vec<T>> {
    let mut frame = r.take_framed(header)?;
    let mut items = Vec::new();
    while !frame.is_empty() {
        items.push(T::decode(&mut frame)?);
    }
    Ok(items)
}

pub fn decode_vector_with<T: DecodeWith<Ctx>, Ctx: Copy>(
    r: &mut Reader<'_>,
    header: usize,
    ctx: Ctx,
) -> Result<Vec<T>> {
    let mut frame = r.take_framed(header)?;
    let mut items = Vec::new();
    while !frame.is_empty() {
        items.push(T::decode_with(&mut frame, ctx)?);
    }
    Ok(items)
}

/// Writes an optional value: one presence octet, then the inner encoding when present.
pub fn encode_optional<T: Encode>(buf: &mut Vec<u8>, value: Option<&T>) -> Result<()> {
    match value {
        None => buf.push(0),
        Some(inner) => {
            buf.push(1);
            inner.encode(buf)?;
        }
    }
    Ok(())
}

pub fn decode_optional<T: Decode>(r: &mut Reader<'_>) -> Result<Option<T>> {
    match r.take_uint(1)? {
        0 => Ok(None),
        1 => Ok(Some(T::decode(r)?)),
        _ => Err(Error::TlsSyntax("invalid optional marker")),
    }
}

pub fn decode_optional_with<T: DecodeWith<Ctx>, Ctx: Copy>(
    r: &mut Reader<'_>,
    ctx: Ctx,
) -> Result<Option<T>> {
    match r.take_uint(1)? {
        0 => Ok(None),
        1 => Ok(Some(T::decode_with(r, ctx)?)),
        _ => Err(Error::TlsSyntax("invalid optional marker")),
    }
}

macro_rules! impl_uint {
    ($ty:ty, $len:expr) => {
        impl Encode for $ty {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
                buf.extend_from_slice(&self.to_be_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode(r: &mut Reader<'_>) -> Result<Self> {
                Ok(r.take_uint($len)? as $ty)
            }
        }
    };
}

impl_uint!(u8, 1);
impl_uint!(u16, 2);
impl_uint!(u32, 4);
impl_uint!(u64, 8);
