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

//! Rust compiler backend.
//!
//! The generated code is split in four units, meant to be sibling
//! modules: `packet_enums`, `packet_data`, `packet_encode` and
//! `packet_decode`.

use crate::{ast, GeneratorConfig};
use quote::{format_ident, quote};
use std::path::Path;
use std::str::FromStr;

mod data;
mod decoder;
mod encoder;
mod enums;
mod preamble;
mod types;

pub trait ToIdent {
    /// Generate a sanitized rust identifier.
    /// Rust specific keywords are renamed for validity.
    fn to_ident(self) -> proc_macro2::Ident;
}

impl ToIdent for &'_ str {
    fn to_ident(self) -> proc_macro2::Ident {
        match self {
            "as" | "break" | "const" | "continue" | "else" | "enum" | "extern"
            | "false" | "fn" | "for" | "if" | "impl" | "in" | "let" | "loop" | "match" | "mod"
            | "move" | "mut" | "pub" | "ref" | "return" | "static" | "struct" | "trait"
            | "true" | "type" | "unsafe" | "use" | "where" | "while" | "async" | "await"
            | "dyn" | "abstract" | "become" | "box" | "do" | "final" | "macro" | "override"
            | "priv" | "typeof" | "unsized" | "virtual" | "yield" | "try" => {
                format_ident!("r#{}", self)
            }
            // Not allowed as raw identifiers.
            "self" | "Self" | "super" | "crate" => format_ident!("{}_", self),
            _ => format_ident!("{}", self),
        }
    }
}

impl ToIdent for &'_ String {
    fn to_ident(self) -> proc_macro2::Ident {
        self.as_str().to_ident()
    }
}

/// Generate a bit-mask which masks out `n` least significant bits.
///
/// Literal integers in Rust default to the `i32` type. For this
/// reason, if `n` is larger than 31, a suffix is added to the
/// `LitInt` returned. This should either be `u64` or `usize`
/// depending on where the result is used.
pub fn mask_bits(n: usize, suffix: &str) -> syn::LitInt {
    let suffix = if n > 31 { format!("_{suffix}") } else { String::new() };
    let mask = if n >= 64 { u64::MAX } else { (1u64 << n) - 1 };
    // Format the hex digits as 0x1111_2222_3333_usize.
    let hex_digits = format!("{:x}", mask)
        .as_bytes()
        .rchunks(4)
        .rev()
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("_");
    syn::LitInt::new(&format!("0x{hex_digits}{suffix}"), proc_macro2::Span::call_site())
}

/// Generated code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    /// Descriptor type and symbolic enumerations.
    Enums,
    /// Packet and structure declarations.
    Data,
    /// `Encode` implementations.
    Encoder,
    /// `Decode` and `DecodeFrom` implementations.
    Decoder,
}

impl Unit {
    pub const ALL: [Unit; 4] = [Unit::Enums, Unit::Data, Unit::Encoder, Unit::Decoder];

    /// Name of the module holding the unit.
    pub fn module_name(self) -> &'static str {
        match self {
            Unit::Enums => "packet_enums",
            Unit::Data => "packet_data",
            Unit::Encoder => "packet_encode",
            Unit::Decoder => "packet_decode",
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "enums" | "enum" | "packet_enums" => Ok(Unit::Enums),
            "data" | "data-structs" | "structs" | "packet_data" => Ok(Unit::Data),
            "encode" | "encoder" | "packet_encode" => Ok(Unit::Encoder),
            "decode" | "decoder" | "packet_decode" => Ok(Unit::Decoder),
            _ => Err(format!("could not parse {:?}, valid units are enums, data, encode and decode", input)),
        }
    }
}

/// Generate the tokens of a code unit.
pub fn generate_tokens(file: &ast::File, unit: Unit, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let preamble = preamble::generate(Path::new(&file.source), unit);
    let items = match unit {
        Unit::Enums => enums::generate(file),
        Unit::Data => data::generate(file),
        Unit::Encoder => encoder::generate(file, config),
        Unit::Decoder => decoder::generate(file, config),
    };
    quote! {
        #preamble
        #items
    }
}

/// Generate all the units, each in its own module, with the
/// declarations re-exported at the top level.
pub fn generate_modules(file: &ast::File, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let modules = Unit::ALL.iter().map(|unit| {
        let name = format_ident!("{}", unit.module_name());
        let tokens = generate_tokens(file, *unit, config);
        quote! {
            pub mod #name {
                #tokens
            }
        }
    });
    quote! {
        #(#modules)*
        pub use packet_data::*;
        pub use packet_enums::*;
    }
}

/// Generate formatted Rust code for a code unit.
pub fn generate(file: &ast::File, unit: Unit, config: &GeneratorConfig) -> Result<String, syn::Error> {
    let syntax_tree = syn::parse2(generate_tokens(file, unit, config))?;
    Ok(prettyplease::unparse(&syntax_tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{analyze_inline, assert_contains_all};

    #[test]
    fn test_to_ident() {
        assert_eq!("type".to_ident().to_string(), "r#type");
        assert_eq!("self".to_ident().to_string(), "self_");
        assert_eq!("stream_id".to_ident().to_string(), "stream_id");
    }

    #[test]
    fn test_mask_bits() {
        assert_eq!(mask_bits(3, "u64").to_string(), "0x7");
        assert_eq!(mask_bits(16, "u64").to_string(), "0xffff");
        assert_eq!(mask_bits(32, "u64").to_string(), "0xffff_ffff_u64");
        assert_eq!(mask_bits(64, "u64").to_string(), "0xffff_ffff_ffff_ffff_u64");
    }

    #[test]
    fn test_unit_names() {
        assert_eq!("enums".parse(), Ok(Unit::Enums));
        assert_eq!("packet_data".parse(), Ok(Unit::Data));
        assert_eq!("Encoder".parse(), Ok(Unit::Encoder));
        assert_eq!("decode".parse(), Ok(Unit::Decoder));
        assert!("bindings".parse::<Unit>().is_err());
    }

    #[test]
    fn test_generate_units() {
        let file = analyze_inline(
            r##"{
  "descriptors": [ { "codes": "'0x0001'", "anchor": "#packets" } ],
  "structs": {
    "0x0001": [
      { "type": "u(16)", "name": "ping_descriptor", "value": "0x0001" },
      { "type": "u(32)", "name": "seq" },
      { "type": "u(8)", "name": "type", "value": "enum{PingType}" }
    ]
  },
  "enums": {
    "PingType": [ { "name": "request", "value": "0" }, { "name": "reply", "value": "1" } ]
  }
}"##,
        );
        let config = GeneratorConfig::default();
        let enums = generate(&file, Unit::Enums, &config).unwrap();
        assert_contains_all(&enums, &["pub enum PingType", "pub const PING: PktDescriptor"]);
        let data = generate(&file, Unit::Data, &config).unwrap();
        assert_contains_all(&data, &["pub struct Ping", "pub r#type: PingType,"]);
        let encode = generate(&file, Unit::Encoder, &config).unwrap();
        assert_contains_all(&encode, &["impl Encode for Ping", "w.put_u8(u64::from(self.r#type) as u8)?;"]);
        let decode = generate(&file, Unit::Decoder, &config).unwrap();
        assert_contains_all(&decode, &["let r#type = PingType::from(__r.get_u8() as u64);"]);
    }
}
