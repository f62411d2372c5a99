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

//! Mapping of the packet model to Rust types and reader/writer calls.

use crate::ast;
use crate::backends::rust::ToIdent;
use quote::{format_ident, quote};

/// A Rust unsigned or signed integer type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Integer {
    pub width: usize,
    pub signed: bool,
}

impl Integer {
    /// Get the Rust integer type for the given bit width.
    ///
    /// This will round up the size to the nearest Rust integer size.
    /// Fields are at most 64 bits wide, so it is an error to call this
    /// with a larger width.
    pub fn new(width: usize) -> Integer {
        Integer::with_sign(width, false)
    }

    pub fn with_sign(width: usize, signed: bool) -> Integer {
        for integer_width in [8, 16, 32, 64] {
            if width <= integer_width {
                return Integer { width: integer_width, signed };
            }
        }
        panic!("Cannot construct Integer with width: {width}")
    }

    /// Suffix of the `get_*` and `put_*` methods of the reader and
    /// writer.
    fn suffix(&self) -> String {
        format!("{}{}", if self.signed { "i" } else { "u" }, self.width)
    }
}

impl quote::ToTokens for Integer {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        format_ident!("{}", self.suffix()).to_tokens(tokens);
    }
}

/// Rust type of a single element of a stored field.
pub fn element_type(field: &ast::Field) -> proc_macro2::TokenStream {
    if field.seq {
        return quote!(u64);
    }
    match &field.desc {
        ast::FieldDesc::Scalar { signed } => {
            let field_type = Integer::with_sign(field.width, *signed);
            quote!(#field_type)
        }
        ast::FieldDesc::Bitfield => quote!(u8),
        ast::FieldDesc::Rational => quote!(Rational),
        ast::FieldDesc::Bytes => {
            let len = proc_macro2::Literal::usize_unsuffixed(field.width / 8);
            quote!([u8; #len])
        }
        ast::FieldDesc::String { capacity } => {
            let capacity = proc_macro2::Literal::usize_unsuffixed(*capacity);
            quote!(FixedStr<#capacity>)
        }
        ast::FieldDesc::Struct { type_id } | ast::FieldDesc::Enum { type_id } => {
            let type_id = type_id.to_ident();
            quote!(#type_id)
        }
        ast::FieldDesc::Descriptor => quote!(PktDescriptor),
        ast::FieldDesc::Padding | ast::FieldDesc::Parity(_) | ast::FieldDesc::Payload => {
            unreachable!("field `{}` is not stored", field.id)
        }
    }
}

/// Whether a variable length field is held as a shared byte buffer.
pub fn is_byte_buffer(field: &ast::Field) -> bool {
    matches!(field.desc, ast::FieldDesc::Scalar { signed: false }) && field.width == 8 && !field.seq
}

/// Rust type of a stored field, repetition included.
pub fn rust_type(field: &ast::Field) -> proc_macro2::TokenStream {
    let element_type = element_type(field);
    match field.repeat {
        ast::Repeat::None => element_type,
        ast::Repeat::Constant(count) => {
            let count = proc_macro2::Literal::usize_unsuffixed(count);
            quote!([#element_type; #count])
        }
        ast::Repeat::FieldRef(_) if is_byte_buffer(field) => quote!(Bytes),
        ast::Repeat::FieldRef(_) => quote!(Vec<#element_type>),
    }
}

/// Default value of a stored field.
pub fn default_value(field: &ast::Field) -> proc_macro2::TokenStream {
    match (&field.desc, field.repeat) {
        (_, ast::Repeat::Constant(_)) | (ast::FieldDesc::Bytes, _) => {
            quote!(std::array::from_fn(|_| Default::default()))
        }
        _ => quote!(Default::default()),
    }
}

/// Read an integer of the given `width` with the reader `__r`.
pub fn get_int(width: usize, signed: bool) -> proc_macro2::TokenStream {
    let get = format_ident!("get_{}", Integer::with_sign(width, signed).suffix());
    quote!(__r.#get())
}

/// Write the integer `value` of the given `width` with the writer `w`.
pub fn put_int(width: usize, signed: bool, value: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let put = format_ident!("put_{}", Integer::with_sign(width, signed).suffix());
    quote!(w.#put(#value)?;)
}

/// Length in bytes of `count` elements of `element_bytes` bytes.
pub fn byte_len(count: proc_macro2::TokenStream, element_bytes: usize) -> proc_macro2::TokenStream {
    match element_bytes {
        1 => count,
        _ => {
            let element_bytes = proc_macro2::Literal::usize_unsuffixed(element_bytes);
            quote!(#count * #element_bytes)
        }
    }
}

/// Hexadecimal integer literal without suffix.
pub fn hex(value: u64) -> syn::LitInt {
    syn::LitInt::new(&format!("{:#x}", value), proc_macro2::Span::call_site())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(desc: ast::FieldDesc, width: usize, repeat: ast::Repeat) -> ast::Field {
        ast::Field { id: "f".to_owned(), desc, width, repeat, fixed: None, seq: false }
    }

    #[test]
    fn test_integer_new() {
        assert_eq!(Integer::new(0).width, 8);
        assert_eq!(Integer::new(8).width, 8);
        assert_eq!(Integer::new(9).width, 16);
        assert_eq!(Integer::new(64).width, 64);
    }

    #[test]
    #[should_panic]
    fn test_integer_new_panics_on_large_width() {
        Integer::new(65);
    }

    #[test]
    fn test_rust_type() {
        let scalar = ast::FieldDesc::Scalar { signed: false };
        assert_eq!(rust_type(&field(scalar.clone(), 16, ast::Repeat::None)).to_string(), "u16");
        assert_eq!(
            rust_type(&field(ast::FieldDesc::Scalar { signed: true }, 32, ast::Repeat::Constant(4)))
                .to_string(),
            "[i32 ; 4]"
        );
        assert_eq!(rust_type(&field(scalar.clone(), 8, ast::Repeat::FieldRef(0))).to_string(), "Bytes");
        assert_eq!(rust_type(&field(scalar, 16, ast::Repeat::FieldRef(0))).to_string(), "Vec < u16 >");
        assert_eq!(
            rust_type(&field(ast::FieldDesc::String { capacity: 16 }, 128, ast::Repeat::None)).to_string(),
            "FixedStr < 16 >"
        );
        assert_eq!(rust_type(&field(ast::FieldDesc::Bytes, 40, ast::Repeat::None)).to_string(), "[u8 ; 5]");
    }

    #[test]
    fn test_sequence_numbers_are_widened() {
        let mut f = field(ast::FieldDesc::Scalar { signed: false }, 32, ast::Repeat::None);
        f.seq = true;
        assert_eq!(rust_type(&f).to_string(), "u64");
    }

    #[test]
    fn test_reader_writer_calls() {
        assert_eq!(get_int(16, true).to_string(), "__r . get_i16 ()");
        assert_eq!(put_int(32, false, quote!(self.a)).to_string(), "w . put_u32 (self . a) ? ;");
        assert_eq!(hex(0x4242).to_string(), "0x4242");
    }
}
