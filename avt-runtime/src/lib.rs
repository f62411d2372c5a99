// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helper definitions used by the generated packet codecs.

pub mod bytestream;
pub mod ldpc;

pub use bytes::Bytes;
pub use bytestream::{Reader, Writer};
pub use ldpc::{HMatrix, LdpcEncoder};

/// Type of parsing errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid fixed value for {packet}::{field}, got {actual:#x}, expected {expected:#x}")]
    InvalidFixedValue { packet: &'static str, field: &'static str, expected: u64, actual: u64 },
}

/// Type of serialization errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("output buffer too small, {wanted} bytes needed but only {available} left")]
    BufferTooSmall { wanted: usize, available: usize },
    #[error(
        "the value of {packet}::{field} ({value}) is outside the range of valid values 0..{maximum_value}"
    )]
    InvalidScalarValue { packet: &'static str, field: &'static str, value: u64, maximum_value: u64 },
    #[error("{packet}::{field} has {count} elements, but the count field declares {expected}")]
    InvalidArrayCount { packet: &'static str, field: &'static str, count: usize, expected: usize },
    #[error("no LDPC encoder available for code ({code_bits}, {message_bits})")]
    UnsupportedLdpcCode { code_bits: usize, message_bits: usize },
}

/// Signed rational number, encoded as two consecutive 32-bit integers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Rational { num, den }
    }
}

/// Fixed capacity string field.
///
/// The encoded form always occupies `N` bytes: the content is truncated to
/// the capacity and the remainder is zero filled. Decoding keeps the bytes
/// up to the first NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    pub const CAPACITY: usize = N;

    /// Build from a string, truncating to the field capacity.
    pub fn new(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }

    /// Build from raw bytes, truncating to the field capacity.
    pub fn from_bytes(value: &[u8]) -> Self {
        let mut bytes = [0; N];
        let len = value.len().min(N);
        bytes[..len].copy_from_slice(&value[..len]);
        FixedStr { bytes }
    }

    /// Content length, up to the first NUL byte.
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|b| *b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content bytes, without the zero fill.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// All `N` bytes as they appear on the wire.
    pub fn as_raw(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Content as UTF-8, if valid.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        FixedStr { bytes: [0; N] }
    }
}

impl<const N: usize> std::fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(value: &str) -> Self {
        FixedStr::new(value)
    }
}

/// Result of decoding a toplevel packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    /// The decoded packet header.
    pub packet: T,
    /// Payload bytes, sharing the input buffer.
    pub payload: Option<Bytes>,
    /// Number of bytes consumed from the input buffer.
    pub len: usize,
}

/// Trait implemented by all generated structures.
pub trait Encode {
    /// Return the length of the encoded structure, parity and
    /// dynamic arrays included.
    fn encoded_len(&self) -> usize;

    /// Write the structure to the output stream.
    fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError>;

    /// Encode the structure to a byte vector.
    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0; self.encoded_len()];
        let mut w = Writer::new(&mut buf);
        self.encode(&mut w)?;
        let len = w.offset();
        buf.truncate(len);
        Ok(buf)
    }
}

/// Trait implemented for all toplevel packet declarations.
pub trait Decode: Sized {
    /// Decode a packet from the start of the input buffer.
    /// The payload, if any, is returned as a slice of the input buffer.
    fn decode(buf: &Bytes) -> Result<Decoded<Self>, DecodeError>;
}

/// Trait implemented for structures nested inside other structures.
pub trait DecodeFrom: Sized {
    /// Decode the structure at the current reader position.
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_str_truncates() {
        let s = FixedStr::<4>::new("avtransport");
        assert_eq!(s.as_bytes(), b"avtr");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn fixed_str_zero_fills() {
        let s = FixedStr::<6>::new("av");
        assert_eq!(s.as_raw(), b"av\0\0\0\0");
        assert_eq!(s.to_str(), Some("av"));
        assert!(FixedStr::<6>::default().is_empty());
    }

    #[test]
    fn encode_error_display() {
        let err = EncodeError::InvalidScalarValue {
            packet: "Foo",
            field: "bar",
            value: 9,
            maximum_value: 7,
        };
        assert_eq!(err.to_string(), "the value of Foo::bar (9) is outside the range of valid values 0..7");
    }
}
