// Copyright 2025 Google LLC
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

use std::fmt::Debug;

pub trait Symbol: Clone + Debug {}
impl<T: Clone + Debug> Symbol for T {}

/// A sub-byte field placed in a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed<S: Symbol> {
    /// Language-specific symbol (variable, field, etc.) holding the value.
    pub symbol: S,
    /// Width of the value in bits.
    pub width: usize,
    /// Right shift of the value inside the chunk, the first field
    /// occupies the most significant bits.
    pub shift: usize,
}

/// A byte-aligned chunk of 8, 16, 32 or 64 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<S: Symbol> {
    pub width: usize,
    pub fields: Vec<Packed<S>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// The run of sub-byte fields exceeds the window without reaching
    /// a chunk boundary.
    Overflow { width: usize, capacity: usize },
    /// Sub-byte fields are pending when a byte aligned field or the end
    /// of the structure is reached.
    Misaligned { pending: usize },
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowError::Overflow { width, capacity } => write!(
                f,
                "bit fields span {} bits without closing a chunk, the window is {} bits",
                width, capacity
            ),
            WindowError::Misaligned { pending } => {
                write!(f, "{} bits of bit fields are not byte aligned", pending)
            }
        }
    }
}

/// Groups consecutive sub-byte fields into byte aligned chunks.
///
/// A chunk closes as soon as the accumulated width is a power of two of
/// at least 8 bits.
#[derive(Debug)]
pub struct BitWindow<S: Symbol> {
    capacity: usize,
    used: usize,
    fields: Vec<(S, usize)>,
}

impl<S: Symbol> BitWindow<S> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0, fields: vec![] }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Add a field to the window, returns the chunk completed by this
    /// field, if any.
    pub fn push(&mut self, symbol: S, width: usize) -> Result<Option<Chunk<S>>, WindowError> {
        self.used += width;
        self.fields.push((symbol, width));
        if self.used > self.capacity {
            return Err(WindowError::Overflow { width: self.used, capacity: self.capacity });
        }
        if self.used < 8 || !self.used.is_power_of_two() {
            return Ok(None);
        }

        let width = std::mem::take(&mut self.used);
        let mut offset = 0;
        let fields = std::mem::take(&mut self.fields)
            .into_iter()
            .map(|(symbol, field_width)| {
                offset += field_width;
                Packed { symbol, width: field_width, shift: width - offset }
            })
            .collect();
        Ok(Some(Chunk { width, fields }))
    }

    /// Check that no field is pending.
    pub fn flush(&self) -> Result<(), WindowError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WindowError::Misaligned { pending: self.used })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_packing() {
        let mut window = BitWindow::new(32);
        assert_eq!(window.push("a", 3), Ok(None));
        assert_eq!(window.push("b", 2), Ok(None));
        assert_eq!(
            window.push("c", 3),
            Ok(Some(Chunk {
                width: 8,
                fields: vec![
                    Packed { symbol: "a", width: 3, shift: 5 },
                    Packed { symbol: "b", width: 2, shift: 3 },
                    Packed { symbol: "c", width: 3, shift: 0 },
                ]
            }))
        );
        assert!(window.is_empty());
        assert_eq!(window.flush(), Ok(()));
    }

    #[test]
    fn closes_on_wider_chunk() {
        let mut window = BitWindow::new(32);
        assert_eq!(window.push("a", 4), Ok(None));
        assert_eq!(window.push("b", 6), Ok(None));
        assert_eq!(window.push("c", 6), Ok(Some(Chunk {
            width: 16,
            fields: vec![
                Packed { symbol: "a", width: 4, shift: 12 },
                Packed { symbol: "b", width: 6, shift: 6 },
                Packed { symbol: "c", width: 6, shift: 0 },
            ]
        })));
    }

    #[test]
    fn pending_bits_are_misaligned() {
        let mut window = BitWindow::new(32);
        window.push("a", 3).unwrap();
        assert_eq!(window.flush(), Err(WindowError::Misaligned { pending: 3 }));
    }

    #[test]
    fn overflow() {
        let mut window = BitWindow::new(8);
        window.push("a", 7).unwrap();
        assert_eq!(window.push("b", 7), Err(WindowError::Overflow { width: 14, capacity: 8 }));
    }
}
