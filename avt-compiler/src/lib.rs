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

//! AVTransport packet specification analyzer and code generator.

pub mod analyzer;
pub mod ast;
pub mod backends;
pub mod document;
pub mod parser;
#[cfg(test)]
pub mod test_utils;

/// Widths accepted for the sub-byte field window.
pub const BITFIELD_WINDOWS: [usize; 4] = [8, 16, 32, 64];

/// Options shared by the analyzer and the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Maximum number of bits a run of sub-byte fields may span before
    /// closing a chunk.
    pub bitfield_window: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig { bitfield_window: 32 }
    }
}

impl GeneratorConfig {
    pub fn with_bitfield_window(bitfield_window: usize) -> Result<Self, String> {
        if BITFIELD_WINDOWS.contains(&bitfield_window) {
            Ok(GeneratorConfig { bitfield_window })
        } else {
            Err(format!(
                "invalid bit field window {}, expected one of {:?}",
                bitfield_window, BITFIELD_WINDOWS
            ))
        }
    }
}
