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

use crate::ast;
use crate::backends::common::alignment::{BitWindow, Chunk};
use crate::backends::rust::{mask_bits, types, ToIdent};
use crate::GeneratorConfig;
use quote::{quote, ToTokens};

/// Generates the statements reading the fields of a structure, one
/// local variable per stored field.
pub struct FieldParser<'a> {
    decl: &'a ast::Struct,
    tokens: proc_macro2::TokenStream,
    window: BitWindow<&'a ast::Field>,
    payload: Option<proc_macro2::Ident>,
}

impl<'a> FieldParser<'a> {
    pub fn new(decl: &'a ast::Struct, config: &GeneratorConfig) -> Self {
        FieldParser {
            decl,
            tokens: quote! {},
            window: BitWindow::new(config.bitfield_window),
            payload: None,
        }
    }

    /// Expression of the element count held by the field at `index`.
    fn count(&self, index: usize) -> proc_macro2::TokenStream {
        let field = &self.decl.fields[index];
        match field.fixed {
            Some(value) => proc_macro2::Literal::u64_unsuffixed(value).into_token_stream(),
            None => {
                let id = field.id.to_ident();
                quote!(#id as usize)
            }
        }
    }

    /// Compare the value read for a constant field.
    fn check_fixed(&self, field: &ast::Field, value: proc_macro2::TokenStream, expected: u64) -> proc_macro2::TokenStream {
        let packet_name = self.decl.id.as_str();
        let field_name = field.id.as_str();
        let expected = types::hex(expected);
        quote! {
            {
                let __value = #value;
                if __value != #expected {
                    return Err(DecodeError::InvalidFixedValue {
                        packet: #packet_name,
                        field: #field_name,
                        expected: #expected,
                        actual: __value,
                    });
                }
            }
        }
    }

    pub fn add(&mut self, field: &'a ast::Field) {
        if field.is_packed() {
            match self.window.push(field, field.width) {
                Ok(Some(chunk)) => self.add_chunk(chunk),
                Ok(None) => (),
                Err(err) => unreachable!("invalid bit field layout in `{}`: {}", self.decl.id, err),
            }
        } else {
            self.add_field(field)
        }
    }

    /// Read a chunk and extract the packed fields, the first field from
    /// the most significant bits.
    fn add_chunk(&mut self, chunk: Chunk<&'a ast::Field>) {
        let get = types::get_int(chunk.width, false);
        self.tokens.extend(quote! {
            let __chunk = #get;
        });
        for packed in chunk.fields {
            let field = packed.symbol;
            let mask = mask_bits(packed.width, "u64");
            let value = match packed.shift {
                0 => quote!((__chunk & #mask)),
                shift => {
                    let shift = proc_macro2::Literal::usize_unsuffixed(shift);
                    quote!(((__chunk >> #shift) & #mask))
                }
            };
            let id = field.id.to_ident();
            self.tokens.extend(match (&field.desc, field.fixed) {
                (_, Some(expected)) => self.check_fixed(field, quote!(#value as u64), expected),
                (ast::FieldDesc::Enum { type_id }, None) => {
                    let type_id = type_id.to_ident();
                    quote!(let #id = #type_id::from(#value as u64);)
                }
                (_, None) if field.seq => quote!(let #id = #value as u64;),
                (_, None) => quote!(let #id = #value as u8;),
            });
        }
    }

    /// Read a single element of a byte aligned field.
    fn get_element(field: &ast::Field) -> proc_macro2::TokenStream {
        match &field.desc {
            ast::FieldDesc::Scalar { signed } => types::get_int(field.width, *signed),
            ast::FieldDesc::Rational => quote!(__r.get_rational()),
            ast::FieldDesc::Struct { type_id } => {
                let type_id = type_id.to_ident();
                quote!(#type_id::decode_from(__r)?)
            }
            ast::FieldDesc::Enum { type_id } => {
                let type_id = type_id.to_ident();
                let get = types::get_int(field.width, false);
                quote!(#type_id::from(#get as u64))
            }
            _ => unreachable!("field `{}` has no element decoding", field.id),
        }
    }

    fn add_field(&mut self, field: &'a ast::Field) {
        let id = field.id.to_ident();

        let tokens = match &field.desc {
            ast::FieldDesc::Scalar { .. } if field.fixed.is_some() => {
                let get = types::get_int(field.width, false);
                self.check_fixed(field, quote!(#get as u64), field.fixed.unwrap_or_default())
            }
            ast::FieldDesc::Scalar { .. } if field.seq => {
                let get = types::get_int(field.width, false);
                quote!(let #id = #get as u64;)
            }
            ast::FieldDesc::Struct { type_id } => {
                let type_id = type_id.to_ident();
                match field.repeat {
                    ast::Repeat::None => quote!(let #id = #type_id::decode_from(__r)?;),
                    ast::Repeat::Constant(count) => {
                        let count = proc_macro2::Literal::usize_unsuffixed(count);
                        quote! {
                            let mut #id: [#type_id; #count] = std::array::from_fn(|_| #type_id::default());
                            for __elem in #id.iter_mut() {
                                *__elem = #type_id::decode_from(__r)?;
                            }
                        }
                    }
                    ast::Repeat::FieldRef(index) => {
                        let count = self.count(index);
                        quote! {
                            let #id = {
                                let __count = #count;
                                let mut __elems = Vec::with_capacity(__count.min(__r.remaining()));
                                for _ in 0..__count {
                                    if __r.remaining() == 0 {
                                        break;
                                    }
                                    __elems.push(#type_id::decode_from(__r)?);
                                }
                                __elems
                            };
                        }
                    }
                }
            }
            ast::FieldDesc::Scalar { .. } | ast::FieldDesc::Rational | ast::FieldDesc::Enum { .. } => {
                let get = Self::get_element(field);
                match field.repeat {
                    ast::Repeat::None => quote!(let #id = #get;),
                    ast::Repeat::Constant(count) if types::is_byte_buffer(field) => {
                        let count = proc_macro2::Literal::usize_unsuffixed(count);
                        quote!(let #id = __r.get_array::<#count>();)
                    }
                    ast::Repeat::Constant(_) => quote!(let #id = std::array::from_fn(|_| #get);),
                    ast::Repeat::FieldRef(index) if types::is_byte_buffer(field) => {
                        let count = self.count(index);
                        quote!(let #id = __r.get_bytes(#count);)
                    }
                    ast::Repeat::FieldRef(index) => {
                        let count = self.count(index);
                        let element_bytes = proc_macro2::Literal::usize_unsuffixed(field.width / 8);
                        quote! {
                            let #id = {
                                let __count: usize = #count;
                                let __count = __count.min(__r.remaining() / #element_bytes);
                                (0..__count).map(|_| #get).collect::<Vec<_>>()
                            };
                        }
                    }
                }
            }
            ast::FieldDesc::Bytes => {
                let len = proc_macro2::Literal::usize_unsuffixed(field.width / 8);
                quote!(let #id = __r.get_array::<#len>();)
            }
            ast::FieldDesc::String { capacity } => {
                let capacity = proc_macro2::Literal::usize_unsuffixed(*capacity);
                quote!(let #id = __r.get_fixed_str::<#capacity>();)
            }
            ast::FieldDesc::Descriptor => match (field.fixed, field.width) {
                (Some(expected), 8) => self.check_fixed(field, quote!((__r.get_u8() as u64) << 8), expected),
                (Some(expected), width) => {
                    let get = types::get_int(width, false);
                    self.check_fixed(field, quote!(#get as u64), expected)
                }
                (None, 8) => quote! {
                    let #id = PktDescriptor(((__r.get_u8() as u32) << 8) | PktDescriptor::FLAG_LSB_BITMASK);
                },
                (None, 16) => quote!(let #id = PktDescriptor(__r.get_u16() as u32);),
                (None, _) => quote!(let #id = PktDescriptor(__r.get_u32());),
            },
            ast::FieldDesc::Padding => match field.repeat {
                ast::Repeat::FieldRef(index) => {
                    let len = types::byte_len(self.count(index), field.width / 8);
                    quote!(__r.skip(#len);)
                }
                _ => {
                    let len = proc_macro2::Literal::usize_unsuffixed(field.wire_bits().unwrap_or(0) / 8);
                    quote!(__r.skip(#len);)
                }
            },
            ast::FieldDesc::Parity(ldpc) => {
                let len = proc_macro2::Literal::usize_unsuffixed(ldpc.parity_bits() / 8);
                quote!(__r.skip(#len);)
            }
            ast::FieldDesc::Payload => {
                let len = match field.repeat {
                    ast::Repeat::None => quote!(__r.remaining()),
                    ast::Repeat::Constant(count) => {
                        proc_macro2::Literal::usize_unsuffixed(count * field.width / 8).into_token_stream()
                    }
                    ast::Repeat::FieldRef(index) => types::byte_len(self.count(index), field.width / 8),
                };
                self.payload = Some(id.clone());
                quote!(let #id = __r.get_bytes(#len);)
            }
            ast::FieldDesc::Bitfield => unreachable!("bit field `{}` is not packed", field.id),
        };
        self.tokens.extend(tokens);
    }

    /// Initializer of the structure from the local variables.
    fn constructor(&self) -> proc_macro2::TokenStream {
        let name = self.decl.id.to_ident();
        let fields = self.decl.stored_fields().into_iter().map(|f| f.id.to_ident());
        quote!(#name { #(#fields),* })
    }
}

/// Generate the decoding implementation of a structure.
///
/// Structures decoded from the start of a buffer implement `Decode`,
/// nested structures implement `DecodeFrom`.
pub fn decode(file: &ast::File, decl: &ast::Struct, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let mut parser = FieldParser::new(decl, config);
    for field in &decl.fields {
        parser.add(field);
    }
    let name = decl.id.to_ident();
    let tokens = &parser.tokens;
    let constructor = parser.constructor();

    if file.substructs.contains(&decl.id) {
        quote! {
            impl DecodeFrom for #name {
                fn decode_from(__r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    #tokens
                    Ok(#constructor)
                }
            }
        }
    } else {
        let payload = match &parser.payload {
            Some(id) => quote!(Some(#id)),
            None => quote!(None),
        };
        quote! {
            impl Decode for #name {
                fn decode(buf: &Bytes) -> Result<Decoded<Self>, DecodeError> {
                    let mut __reader = Reader::new(buf);
                    let __r = &mut __reader;
                    #tokens
                    Ok(Decoded { packet: #constructor, payload: #payload, len: __r.offset() })
                }
            }
        }
    }
}

pub fn generate(file: &ast::File, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let impls = file.structs.iter().map(|decl| decode(file, decl, config));
    quote! {
        #(#impls)*
    }
}
