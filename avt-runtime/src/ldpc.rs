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

//! LDPC parity generation.

use crate::EncodeError;

/// Computes the parity bits of an LDPC (code_bits, message_bits) code.
pub trait LdpcEncoder {
    /// Fill `parity` with the `code_bits - message_bits` parity bits
    /// computed over the `message_bits / 8` bytes of `message`.
    fn encode(
        &self,
        code_bits: usize,
        message_bits: usize,
        message: &[u8],
        parity: &mut [u8],
    ) -> Result<(), EncodeError>;
}

/// Parity check matrix for a single LDPC code.
///
/// The matrix holds `parity_bits / 64` rows of `code_bits` words. The
/// first `message_bits` words of a row select the message bits that
/// contribute to the matching 64-bit parity word, the rest is padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HMatrix {
    code_bits: usize,
    message_bits: usize,
    words: Vec<u64>,
}

impl HMatrix {
    /// Build a matrix, returns `None` when the table cannot describe
    /// a (code_bits, message_bits) code.
    pub fn new(code_bits: usize, message_bits: usize, words: Vec<u64>) -> Option<Self> {
        let parity_bits = code_bits.checked_sub(message_bits)?;
        if parity_bits == 0 || parity_bits % 64 != 0 || message_bits % 8 != 0 {
            return None;
        }
        if words.len() != (parity_bits / 64) * code_bits {
            return None;
        }
        Some(HMatrix { code_bits, message_bits, words })
    }

    pub fn code_bits(&self) -> usize {
        self.code_bits
    }

    pub fn message_bits(&self) -> usize {
        self.message_bits
    }

    fn parity_words<'a>(&'a self, message: &'a [u8]) -> impl Iterator<Item = u64> + 'a {
        let message = &message[..self.message_bits / 8];
        self.words.chunks_exact(self.code_bits).map(move |row| {
            let mut word = 0u64;
            // Message bits are taken least significant bit first.
            for (byte, columns) in message.iter().zip(row.chunks_exact(8)) {
                for (k, h) in columns.iter().enumerate() {
                    if (byte >> k) & 1 != 0 {
                        word ^= *h;
                    }
                }
            }
            word
        })
    }
}

impl LdpcEncoder for HMatrix {
    fn encode(
        &self,
        code_bits: usize,
        message_bits: usize,
        message: &[u8],
        parity: &mut [u8],
    ) -> Result<(), EncodeError> {
        if code_bits != self.code_bits
            || message_bits != self.message_bits
            || message.len() < message_bits / 8
            || parity.len() != (code_bits - message_bits) / 8
        {
            return Err(EncodeError::UnsupportedLdpcCode { code_bits, message_bits });
        }

        // Parity words are stored little endian.
        for (chunk, word) in parity.chunks_exact_mut(8).zip(self.parity_words(message)) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}

impl LdpcEncoder for [HMatrix] {
    fn encode(
        &self,
        code_bits: usize,
        message_bits: usize,
        message: &[u8],
        parity: &mut [u8],
    ) -> Result<(), EncodeError> {
        self.iter()
            .find(|h| h.code_bits == code_bits && h.message_bits == message_bits)
            .ok_or(EncodeError::UnsupportedLdpcCode { code_bits, message_bits })?
            .encode(code_bits, message_bits, message, parity)
    }
}
