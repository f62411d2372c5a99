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

/// Generate a range check for a scalar value backed to a rust type
/// that exceeds the actual size of the field.
fn range_check(
    value: proc_macro2::TokenStream,
    width: usize,
    packet_name: &str,
    field_name: &str,
) -> proc_macro2::TokenStream {
    let max_value = mask_bits(width, "u64");
    quote! {
        if #value > #max_value {
            return Err(EncodeError::InvalidScalarValue {
                packet: #packet_name,
                field: #field_name,
                value: #value as u64,
                maximum_value: #max_value as u64,
            })
        }
    }
}

/// Represents the computed size of a structure,
/// composed of constant and variable size fields.
struct RuntimeSize {
    constant: usize,
    variable: Vec<proc_macro2::TokenStream>,
}

impl quote::ToTokens for RuntimeSize {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let constant = proc_macro2::Literal::usize_unsuffixed(self.constant);
        tokens.extend(match self {
            RuntimeSize { variable, .. } if variable.is_empty() => quote! { #constant },
            RuntimeSize { variable, constant: 0 } => quote! { #(#variable)+* },
            RuntimeSize { variable, .. } => quote! { #constant + #(#variable)+* },
        })
    }
}

struct Encoder<'a> {
    decl: &'a ast::Struct,
    size: RuntimeSize,
    tokens: proc_macro2::TokenStream,
    window: BitWindow<proc_macro2::TokenStream>,
}

impl<'a> Encoder<'a> {
    fn new(decl: &'a ast::Struct, config: &GeneratorConfig) -> Self {
        Encoder {
            decl,
            size: RuntimeSize { constant: 0, variable: vec![] },
            tokens: quote! {},
            window: BitWindow::new(config.bitfield_window),
        }
    }

    /// Expression of the element count held by the field at `index`.
    fn count(&self, index: usize) -> proc_macro2::TokenStream {
        let field = &self.decl.fields[index];
        match field.fixed {
            Some(value) => {
                let value = proc_macro2::Literal::u64_unsuffixed(value);
                quote!(#value)
            }
            None => {
                let id = field.id.to_ident();
                quote!(self.#id as usize)
            }
        }
    }

    fn encode_packed_field(&mut self, field: &ast::Field) {
        let id = field.id.to_ident();
        let packet_name = self.decl.id.as_str();
        let value = match (&field.desc, field.fixed) {
            (_, Some(value)) => {
                let value = types::hex(value);
                quote!(#value)
            }
            (ast::FieldDesc::Bitfield, None) if field.seq => {
                let mask = mask_bits(field.width, "u64");
                quote!((self.#id & #mask))
            }
            (ast::FieldDesc::Enum { .. }, None) => {
                let value = quote!(u64::from(self.#id));
                self.tokens.extend(range_check(value.clone(), field.width, packet_name, &field.id));
                value
            }
            _ => {
                let value = quote!(self.#id);
                self.tokens.extend(range_check(value.clone(), field.width, packet_name, &field.id));
                value
            }
        };

        match self.window.push(value, field.width) {
            Ok(Some(chunk)) => self.encode_chunk(chunk),
            Ok(None) => (),
            Err(err) => unreachable!("invalid bit field layout in `{}`: {}", packet_name, err),
        }
    }

    /// Write a completed chunk, the first field in the most significant
    /// bits.
    fn encode_chunk(&mut self, chunk: Chunk<proc_macro2::TokenStream>) {
        let chunk_type = types::Integer::new(chunk.width);
        let terms = chunk.fields.iter().map(|packed| {
            let value = &packed.symbol;
            match packed.shift {
                0 => quote!((#value as #chunk_type)),
                shift => {
                    let shift = proc_macro2::Literal::usize_unsuffixed(shift);
                    quote!(((#value as #chunk_type) << #shift))
                }
            }
        });
        self.tokens.extend(types::put_int(chunk.width, false, quote!(#(#terms)|*)));
        self.size.constant += chunk.width / 8;
    }

    /// Write a single element of a byte aligned field.
    fn encode_element(&self, field: &ast::Field, value: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
        match &field.desc {
            ast::FieldDesc::Scalar { signed } => types::put_int(field.width, *signed, value),
            ast::FieldDesc::Rational => quote!(w.put_rational(#value)?;),
            ast::FieldDesc::Struct { .. } => quote!(#value.encode(w)?;),
            ast::FieldDesc::Enum { .. } => {
                let value = quote!(u64::from(#value));
                let field_type = types::Integer::new(field.width);
                let check = (field.width < 64)
                    .then(|| range_check(value.clone(), field.width, &self.decl.id, &field.id));
                let put = types::put_int(field.width, false, quote!(#value as #field_type));
                quote! {
                    #check
                    #put
                }
            }
            _ => unreachable!("field `{}` has no element encoding", field.id),
        }
    }

    fn encode_field(&mut self, field: &ast::Field) {
        if field.is_packed() {
            return self.encode_packed_field(field);
        }

        let id = field.id.to_ident();
        let packet_name = self.decl.id.as_str();
        let field_name = field.id.as_str();
        let element_bytes = field.width / 8;

        match field.wire_bits() {
            _ if matches!(field.desc, ast::FieldDesc::Payload) => (),
            _ if matches!(field.desc, ast::FieldDesc::Struct { .. }) => {
                self.size.variable.push(match field.repeat {
                    ast::Repeat::None => quote!(self.#id.encoded_len()),
                    _ => quote!(self.#id.iter().map(Encode::encoded_len).sum::<usize>()),
                });
            }
            Some(bits) => self.size.constant += bits / 8,
            None => match field.repeat {
                ast::Repeat::FieldRef(index) if !field.is_stored() => {
                    self.size.variable.push(types::byte_len(self.count(index), element_bytes));
                }
                _ => self.size.variable.push(types::byte_len(quote!(self.#id.len()), element_bytes)),
            },
        }

        if let (ast::Repeat::FieldRef(index), true) = (field.repeat, field.is_stored()) {
            let count = self.count(index);
            self.tokens.extend(quote! {
                if self.#id.len() != #count {
                    return Err(EncodeError::InvalidArrayCount {
                        packet: #packet_name,
                        field: #field_name,
                        count: self.#id.len(),
                        expected: #count,
                    });
                }
            });
        }

        self.tokens.extend(match &field.desc {
            ast::FieldDesc::Scalar { .. } if field.fixed.is_some() => {
                let value = types::hex(field.fixed.unwrap_or_default());
                types::put_int(field.width, false, value.into_token_stream())
            }
            ast::FieldDesc::Scalar { .. } if field.seq => {
                let field_type = types::Integer::new(field.width);
                types::put_int(field.width, false, quote!(self.#id as #field_type))
            }
            ast::FieldDesc::Scalar { .. } if types::is_byte_buffer(field) && field.repeat != ast::Repeat::None => {
                quote!(w.put_slice(&self.#id)?;)
            }
            ast::FieldDesc::Scalar { .. }
            | ast::FieldDesc::Rational
            | ast::FieldDesc::Struct { .. }
            | ast::FieldDesc::Enum { .. } => match field.repeat {
                ast::Repeat::None => self.encode_element(field, quote!(self.#id)),
                _ => {
                    let elem = match field.desc {
                        ast::FieldDesc::Struct { .. } => quote!(elem),
                        _ => quote!(*elem),
                    };
                    let element = self.encode_element(field, elem);
                    quote! {
                        for elem in &self.#id {
                            #element
                        }
                    }
                }
            },
            ast::FieldDesc::Bytes => quote!(w.put_slice(&self.#id)?;),
            ast::FieldDesc::String { .. } => quote!(w.put_fixed_str(&self.#id)?;),
            ast::FieldDesc::Descriptor => match (field.fixed, field.width) {
                (Some(value), 8) => types::put_int(8, false, types::hex(value >> 8).into_token_stream()),
                (Some(value), width) => types::put_int(width, false, types::hex(value).into_token_stream()),
                (None, 8) => quote!(w.put_u8((self.#id.code() >> 8) as u8)?;),
                (None, 16) => quote!(w.put_u16(self.#id.code())?;),
                (None, _) => quote!(w.put_u32(u32::from(self.#id.code()))?;),
            },
            ast::FieldDesc::Padding => match field.repeat {
                ast::Repeat::FieldRef(index) => {
                    let len = types::byte_len(self.count(index), element_bytes);
                    quote!(w.put_zeros(#len)?;)
                }
                _ => {
                    let len = proc_macro2::Literal::usize_unsuffixed(field.wire_bits().unwrap_or(0) / 8);
                    quote!(w.put_zeros(#len)?;)
                }
            },
            ast::FieldDesc::Parity(ldpc) => {
                let code_bits = proc_macro2::Literal::usize_unsuffixed(ldpc.code_bits);
                let message_bits = proc_macro2::Literal::usize_unsuffixed(ldpc.message_bits);
                quote!(w.put_ldpc(#code_bits, #message_bits)?;)
            }
            ast::FieldDesc::Payload => quote!(),
            ast::FieldDesc::Bitfield => unreachable!("bit field `{}` is not packed", field.id),
        });
    }
}

/// Generate the `Encode` implementation of a structure.
pub fn encode(decl: &ast::Struct, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let mut encoder = Encoder::new(decl, config);
    for field in &decl.fields {
        encoder.encode_field(field);
    }
    let name = decl.id.to_ident();
    let size = &encoder.size;
    let tokens = &encoder.tokens;
    quote! {
        impl Encode for #name {
            fn encoded_len(&self) -> usize {
                #size
            }

            fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
                #tokens
                Ok(())
            }
        }
    }
}

pub fn generate(file: &ast::File, config: &GeneratorConfig) -> proc_macro2::TokenStream {
    let impls = file.structs.iter().map(|decl| encode(decl, config));
    quote! {
        #(#impls)*
    }
}
