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

//! Big endian cursors over packet buffers.
//!
//! The [`Reader`] never fails: reading past the end of the buffer yields
//! zero values and leaves the cursor in place. The [`Writer`] reports
//! [`EncodeError::BufferTooSmall`] instead of writing partial values.

use crate::{EncodeError, FixedStr, LdpcEncoder, Rational};
use bytes::Bytes;

/// Read cursor over a shared packet buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a Bytes,
    offset: usize,
}

macro_rules! get_int {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> $ty {
                self.take::<{ std::mem::size_of::<$ty>() }>().map_or(0, <$ty>::from_be_bytes)
            }
        )*
    };
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a Bytes) -> Self {
        Reader { buf, offset: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.offset.checked_add(N)?;
        let bytes: [u8; N] = self.buf.get(self.offset..end)?.try_into().ok()?;
        self.offset = end;
        Some(bytes)
    }

    get_int!(
        get_u8: u8,
        get_u16: u16,
        get_u32: u32,
        get_u64: u64,
        get_i8: i8,
        get_i16: i16,
        get_i32: i32,
        get_i64: i64,
    );

    pub fn get_rational(&mut self) -> Rational {
        match self.take::<8>() {
            Some(bytes) => Rational {
                num: i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                den: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            },
            None => Rational::default(),
        }
    }

    /// Read a fixed size byte array, zeroed if truncated.
    pub fn get_array<const N: usize>(&mut self) -> [u8; N] {
        self.take::<N>().unwrap_or([0; N])
    }

    /// Read a fixed capacity string, empty if truncated.
    pub fn get_fixed_str<const N: usize>(&mut self) -> FixedStr<N> {
        self.take::<N>().map(|bytes| FixedStr::from_bytes(&bytes)).unwrap_or_default()
    }

    /// Return a slice of at most `len` bytes sharing the input buffer.
    pub fn get_bytes(&mut self, len: usize) -> Bytes {
        let len = len.min(self.remaining());
        let bytes = self.buf.slice(self.offset..self.offset + len);
        self.offset += len;
        bytes
    }

    /// Advance the cursor by `len` bytes, stopping at the end of the buffer.
    pub fn skip(&mut self, len: usize) {
        self.offset += len.min(self.remaining());
    }
}

/// Write cursor over a caller provided output buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    offset: usize,
    ldpc: Option<&'a dyn LdpcEncoder>,
}

macro_rules! put_int {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, value: $ty) -> Result<(), EncodeError> {
                self.put_slice(&value.to_be_bytes())
            }
        )*
    };
}

impl<'a> Writer<'a> {
    /// Create a writer that fills LDPC parity fields with zeros.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, offset: 0, ldpc: None }
    }

    /// Create a writer that computes LDPC parity with `ldpc`.
    pub fn with_ldpc(buf: &'a mut [u8], ldpc: &'a dyn LdpcEncoder) -> Self {
        Writer { buf, offset: 0, ldpc: Some(ldpc) }
    }

    /// Number of bytes written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes left in the output buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.offset]
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], EncodeError> {
        let available = self.remaining();
        if len > available {
            return Err(EncodeError::BufferTooSmall { wanted: len, available });
        }
        let start = self.offset;
        self.offset += len;
        Ok(&mut self.buf[start..start + len])
    }

    pub fn put_slice(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.reserve(value.len())?.copy_from_slice(value);
        Ok(())
    }

    put_int!(
        put_u8: u8,
        put_u16: u16,
        put_u32: u32,
        put_u64: u64,
        put_i8: i8,
        put_i16: i16,
        put_i32: i32,
        put_i64: i64,
    );

    pub fn put_rational(&mut self, value: Rational) -> Result<(), EncodeError> {
        let bytes = self.reserve(8)?;
        bytes[..4].copy_from_slice(&value.num.to_be_bytes());
        bytes[4..].copy_from_slice(&value.den.to_be_bytes());
        Ok(())
    }

    /// Write the string content followed by zeros up to the capacity.
    pub fn put_fixed_str<const N: usize>(&mut self, value: &FixedStr<N>) -> Result<(), EncodeError> {
        self.put_slice(value.as_raw())
    }

    pub fn put_zeros(&mut self, len: usize) -> Result<(), EncodeError> {
        self.reserve(len)?.fill(0);
        Ok(())
    }

    /// Write the parity bits of an LDPC (code_bits, message_bits) code
    /// protecting the `message_bits` immediately preceding the cursor.
    pub fn put_ldpc(&mut self, code_bits: usize, message_bits: usize) -> Result<(), EncodeError> {
        let unsupported = EncodeError::UnsupportedLdpcCode { code_bits, message_bits };
        if message_bits % 8 != 0 || code_bits <= message_bits || (code_bits - message_bits) % 8 != 0 {
            return Err(unsupported);
        }
        let message_len = message_bits / 8;
        let parity_len = (code_bits - message_bits) / 8;
        let Some(message_start) = self.offset.checked_sub(message_len) else {
            return Err(unsupported);
        };

        let ldpc = self.ldpc;
        let start = self.offset;
        self.reserve(parity_len)?;
        let (head, tail) = self.buf.split_at_mut(start);
        let parity = &mut tail[..parity_len];
        match ldpc {
            Some(ldpc) => ldpc.encode(code_bits, message_bits, &head[message_start..], parity),
            None => {
                parity.fill(0);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HMatrix;

    #[test]
    fn reads_big_endian() {
        let buf = Bytes::from_static(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xff, 0xf0]);
        let mut r = Reader::new(&buf);
        assert_eq!(r.get_u16(), 0x1234);
        assert_eq!(r.get_u8(), 0x56);
        assert_eq!(r.get_u32(), 0x789a_bcde);
        assert_eq!(r.get_i16(), -16);
        assert_eq!(r.offset(), 9);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_yields_zero() {
        let buf = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let mut r = Reader::new(&buf);
        assert_eq!(r.get_u32(), 0);
        assert_eq!(r.offset(), 0);
        assert_eq!(r.get_u16(), 0x0102);
        assert_eq!(r.get_rational(), Rational::default());
        assert_eq!(r.get_array::<2>(), [0, 0]);
        assert!(r.get_fixed_str::<4>().is_empty());
        assert_eq!(r.offset(), 2);
    }

    #[test]
    fn skip_saturates() {
        let buf = Bytes::from_static(&[0; 4]);
        let mut r = Reader::new(&buf);
        r.skip(3);
        r.skip(10);
        assert_eq!(r.offset(), 4);
        assert_eq!(r.get_u8(), 0);
    }

    #[test]
    fn get_bytes_shares_buffer() {
        let buf = Bytes::from(vec![1, 2, 3, 4, 5]);
        let mut r = Reader::new(&buf);
        r.skip(1);
        let slice = r.get_bytes(10);
        assert_eq!(&slice[..], &[2, 3, 4, 5]);
        assert_eq!(slice.as_ptr(), buf[1..].as_ptr());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn writes_big_endian() {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.put_u16(0x4242).unwrap();
        w.put_i8(-1).unwrap();
        w.put_rational(Rational::new(1, -2)).unwrap();
        w.put_fixed_str(&FixedStr::<4>::new("ab")).unwrap();
        assert_eq!(w.offset(), 15);
        assert_eq!(
            w.written(),
            &[0x42, 0x42, 0xff, 0, 0, 0, 1, 0xff, 0xff, 0xff, 0xfe, b'a', b'b', 0, 0]
        );
    }

    #[test]
    fn overrun_is_reported() {
        let mut buf = [0u8; 3];
        let mut w = Writer::new(&mut buf);
        w.put_u16(1).unwrap();
        assert_eq!(w.put_u16(2), Err(EncodeError::BufferTooSmall { wanted: 2, available: 1 }));
        assert_eq!(w.offset(), 2);
        assert_eq!(w.put_zeros(2), Err(EncodeError::BufferTooSmall { wanted: 2, available: 1 }));
    }

    #[test]
    fn ldpc_parity_defaults_to_zero() {
        let mut buf = [0xaau8; 36];
        let mut w = Writer::new(&mut buf);
        w.put_slice(&[0x11; 28]).unwrap();
        w.put_ldpc(288, 224).unwrap();
        assert_eq!(w.offset(), 36);
        assert_eq!(&buf[28..], &[0; 8]);
    }

    #[test]
    fn ldpc_parity_uses_encoder() {
        let h = HMatrix::new(288, 224, vec![u64::MAX; 288]).unwrap();
        let mut buf = [0u8; 40];
        let mut w = Writer::with_ldpc(&mut buf, &h);
        w.put_u32(0xdead_beef).unwrap();
        w.put_slice(&[0; 27]).unwrap();
        w.put_u8(0x01).unwrap();
        w.put_ldpc(288, 224).unwrap();
        // Only the last 28 bytes are covered; they contain a single set bit.
        assert_eq!(&buf[32..40], &[0xff; 8]);
    }

    #[test]
    fn ldpc_requires_message_bytes() {
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        w.put_u8(0).unwrap();
        assert_eq!(
            w.put_ldpc(288, 224),
            Err(EncodeError::UnsupportedLdpcCode { code_bits: 288, message_bits: 224 })
        );
    }
}
