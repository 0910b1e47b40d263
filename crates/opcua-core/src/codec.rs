//! Little-endian binary codec for the OPC UA built-in types.
//!
//! Everything on the wire is little-endian. Strings and byte strings carry an
//! Int32 length prefix where −1 means null, 0 means empty, and anything below
//! −1 is a malformed stream. Arrays follow the same rule.
//!
//! Decoders never trust a length prefix further than the bytes actually left
//! in the buffer, and nested containers (Variant, ExtensionObject,
//! DiagnosticInfo) are depth-limited so a hostile stream cannot recurse the
//! stack away.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Maximum nesting depth for self-containing types.
pub const MAX_DECODE_DEPTH: u8 = 64;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("length prefix {0} is below the null sentinel -1")]
    BadLength(i32),

    #[error("unknown {field} byte 0x{value:02x}")]
    UnknownByte { field: &'static str, value: u8 },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{field} out of range")]
    OutOfRange { field: &'static str },

    #[error("nesting deeper than {MAX_DECODE_DEPTH} levels")]
    DepthExceeded,
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Position-tracked view over a received buffer.
pub struct BinaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: u8,
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Enter a nested container. Must be paired with [`leave_nested`].
    ///
    /// [`leave_nested`]: BinaryReader::leave_nested
    pub fn enter_nested(&mut self) -> Result<(), CodecError> {
        if self.depth == MAX_DECODE_DEPTH {
            return Err(CodecError::DepthExceeded);
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave_nested(&mut self) {
        self.depth -= 1;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Read an Int32 length prefix. `None` is the null sentinel.
    ///
    /// A non-null length is validated against the bytes remaining: every
    /// element of every array type occupies at least one byte, so a count
    /// beyond `remaining()` can only come from a corrupt stream and is
    /// rejected before any allocation happens.
    pub fn read_length(&mut self) -> Result<Option<usize>, CodecError> {
        let len = self.read_i32()?;
        match len {
            -1 => Ok(None),
            n if n < -1 => Err(CodecError::BadLength(n)),
            n => {
                let n = n as usize;
                if n > self.remaining() {
                    return Err(CodecError::Truncated {
                        offset: self.pos,
                        needed: n - self.remaining(),
                    });
                }
                Ok(Some(n))
            }
        }
    }

    /// String: length-prefixed UTF-8, null allowed.
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        match self.read_length()? {
            None => Ok(None),
            Some(n) => {
                let bytes = self.take(n)?;
                String::from_utf8(bytes.to_vec())
                    .map(Some)
                    .map_err(|_| CodecError::InvalidUtf8)
            }
        }
    }

    /// ByteString payload: length-prefixed raw bytes, null allowed.
    pub fn read_byte_buf(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        match self.read_length()? {
            None => Ok(None),
            Some(n) => Ok(Some(self.take(n)?.to_vec())),
        }
    }
}

// ── Writer side ───────────────────────────────────────────────────────────────

pub fn write_string(out: &mut BytesMut, value: Option<&str>) {
    match value {
        None => out.put_i32_le(-1),
        Some(s) => {
            out.put_i32_le(s.len() as i32);
            out.put_slice(s.as_bytes());
        }
    }
}

pub fn write_byte_buf(out: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        None => out.put_i32_le(-1),
        Some(b) => {
            out.put_i32_le(b.len() as i32);
            out.put_slice(b);
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// A type with a binary wire representation.
pub trait BinaryEncode {
    fn encode(&self, out: &mut BytesMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.to_vec()
    }
}

pub trait BinaryDecode: Sized {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError>;
}

macro_rules! impl_primitive_codec {
    ($($ty:ty => $put:ident, $read:ident;)*) => {
        $(
            impl BinaryEncode for $ty {
                fn encode(&self, out: &mut BytesMut) {
                    out.$put(*self);
                }
            }

            impl BinaryDecode for $ty {
                fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
                    input.$read()
                }
            }
        )*
    };
}

impl_primitive_codec! {
    u8  => put_u8,     read_u8;
    i8  => put_i8,     read_i8;
    u16 => put_u16_le, read_u16;
    i16 => put_i16_le, read_i16;
    u32 => put_u32_le, read_u32;
    i32 => put_i32_le, read_i32;
    u64 => put_u64_le, read_u64;
    i64 => put_i64_le, read_i64;
    f32 => put_f32_le, read_f32;
    f64 => put_f64_le, read_f64;
}

impl BinaryEncode for bool {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(u8::from(*self));
    }
}

impl BinaryDecode for bool {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        input.read_bool()
    }
}

impl BinaryEncode for Option<String> {
    fn encode(&self, out: &mut BytesMut) {
        write_string(out, self.as_deref());
    }
}

impl BinaryDecode for Option<String> {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        input.read_string()
    }
}

impl BinaryEncode for uuid::Uuid {
    /// Mixed-endian GUID layout: the three leading fields are little-endian,
    /// the trailing eight bytes are verbatim.
    fn encode(&self, out: &mut BytesMut) {
        let (d1, d2, d3, d4) = self.as_fields();
        out.put_u32_le(d1);
        out.put_u16_le(d2);
        out.put_u16_le(d3);
        out.put_slice(d4);
    }
}

impl BinaryDecode for uuid::Uuid {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let d1 = input.read_u32()?;
        let d2 = input.read_u16()?;
        let d3 = input.read_u16()?;
        let d4: [u8; 8] = input.read_bytes(8)?.try_into().unwrap();
        Ok(uuid::Uuid::from_fields(d1, d2, d3, &d4))
    }
}

/// Non-null array: Int32 count then the elements. A wire-null decodes as
/// empty; use `Option<Vec<T>>` where the distinction matters.
impl<T: BinaryEncode> BinaryEncode for Vec<T> {
    fn encode(&self, out: &mut BytesMut) {
        encode_array(self, out);
    }
}

impl<T: BinaryDecode> BinaryDecode for Vec<T> {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(decode_array(input)?.unwrap_or_default())
    }
}

impl<T: BinaryEncode> BinaryEncode for Option<Vec<T>> {
    fn encode(&self, out: &mut BytesMut) {
        encode_array_opt(self.as_deref(), out);
    }
}

impl<T: BinaryDecode> BinaryDecode for Option<Vec<T>> {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        decode_array(input)
    }
}

// ── Array helpers ─────────────────────────────────────────────────────────────

/// Encode a non-null array: Int32 count then each element.
pub fn encode_array<T: BinaryEncode>(items: &[T], out: &mut BytesMut) {
    out.put_i32_le(items.len() as i32);
    for item in items {
        item.encode(out);
    }
}

/// Encode a nullable array; `None` is the −1 sentinel.
pub fn encode_array_opt<T: BinaryEncode>(items: Option<&[T]>, out: &mut BytesMut) {
    match items {
        None => out.put_i32_le(-1),
        Some(items) => encode_array(items, out),
    }
}

/// Decode a nullable array. `Ok(None)` is a wire-null, distinct from empty.
pub fn decode_array<T: BinaryDecode>(
    input: &mut BinaryReader<'_>,
) -> Result<Option<Vec<T>>, CodecError> {
    match input.read_length()? {
        None => Ok(None),
        Some(n) => {
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(T::decode(input)?);
            }
            Ok(Some(items))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
