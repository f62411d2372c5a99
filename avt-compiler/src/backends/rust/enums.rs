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

//! Generation of the packet descriptor type and the symbolic
//! enumerations.

use crate::ast;
use crate::backends::rust::types::hex;
use crate::backends::rust::ToIdent;
use heck::ToShoutySnakeCase;
use quote::{format_ident, quote};

/// Generate the descriptor type, with one associated constant per
/// registered descriptor kind.
pub fn generate_descriptor_decl(file: &ast::File) -> proc_macro2::TokenStream {
    let consts = file
        .descriptors
        .iter()
        .map(|(kind, code)| {
            let name = format_ident!("{}", kind.to_shouty_snake_case());
            let doc = format!(" Descriptor of `{kind}` packets.");
            let value = if code & ast::FLAG_LSB_BITMASK != 0 {
                let code = hex((code & !ast::FLAG_LSB_BITMASK) as u64);
                quote!(PktDescriptor(#code | PktDescriptor::FLAG_LSB_BITMASK))
            } else {
                let code = hex(code as u64);
                quote!(PktDescriptor(#code))
            };
            let decl = quote! {
                #[doc = #doc]
                pub const #name: PktDescriptor = #value;
            };
            (name, kind, decl)
        })
        .collect::<Vec<_>>();
    let const_decls = consts.iter().map(|(_, _, decl)| decl);
    let names = consts.iter().map(|(name, kind, _)| quote!(PktDescriptor::#name => Some(#kind)));
    let name_body = if consts.is_empty() {
        quote! {
            let _ = self;
            None
        }
    } else {
        quote! {
            match self {
                #(#names,)*
                _ => None,
            }
        }
    };

    quote! {
        /// Packet descriptor code.
        ///
        /// Descriptors read from 8-bit fields hold the code in the upper
        /// byte and are marked with [`PktDescriptor::FLAG_LSB_BITMASK`].
        #[repr(transparent)]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct PktDescriptor(pub u32);

        impl PktDescriptor {
            pub const FLAG_LSB_BITMASK: u32 = 0x8000_0000;

            #(#const_decls)*

            /// Wire code of the descriptor, flag cleared.
            pub const fn code(self) -> u16 {
                (self.0 & 0xffff) as u16
            }

            /// Whether the descriptor is carried by an 8-bit field.
            pub const fn is_lsb(self) -> bool {
                self.0 & Self::FLAG_LSB_BITMASK != 0
            }

            /// Descriptor kind name, `None` for unregistered codes.
            pub fn name(self) -> Option<&'static str> {
                #name_body
            }
        }
    }
}

/// Generate the declaration of a symbolic enumeration.
///
/// Values without a named member are preserved by the `Unknown` case.
pub fn generate_enum_decl(decl: &ast::Enum) -> proc_macro2::TokenStream {
    let name = decl.id.to_ident();
    let variants = decl.members.iter().map(|m| m.id.to_ident()).collect::<Vec<_>>();
    let values = decl.members.iter().map(|m| hex(m.value)).collect::<Vec<_>>();

    let variant_decls = variants.iter().enumerate().map(|(index, variant)| {
        if index == 0 {
            quote!(#[default] #variant,)
        } else {
            quote!(#variant,)
        }
    });
    let (derive_default, default_impl) = if variants.is_empty() {
        (
            quote!(),
            quote! {
                impl Default for #name {
                    fn default() -> Self {
                        #name::Unknown(0)
                    }
                }
            },
        )
    } else {
        (quote!(Default,), quote!())
    };

    quote! {
        #[derive(Debug, #derive_default Clone, Copy, PartialEq, Eq, Hash)]
        pub enum #name {
            #(#variant_decls)*
            Unknown(u64),
        }

        #default_impl

        impl From<u64> for #name {
            fn from(value: u64) -> Self {
                match value {
                    #(#values => #name::#variants,)*
                    value => #name::Unknown(value),
                }
            }
        }

        impl From<#name> for u64 {
            fn from(value: #name) -> Self {
                match value {
                    #(#name::#variants => #values,)*
                    #name::Unknown(value) => value,
                }
            }
        }
    }
}

/// Session identifier: the `session_start` descriptor code in the upper
/// half and the fixed `session_version` in the lower half.
fn session_id(file: &ast::File) -> Option<u32> {
    let code = file.descriptors.get("session_start")? & 0xffff;
    let version = file
        .structs
        .iter()
        .find(|s| s.kind == "session_start")?
        .fields
        .iter()
        .find(|f| f.id == "session_version")?
        .fixed?;
    Some((code << 16) | (version as u32 & 0xffff))
}

pub fn generate(file: &ast::File) -> proc_macro2::TokenStream {
    let descriptor = generate_descriptor_decl(file);
    let enums = file.enums.iter().map(generate_enum_decl);
    let session_id = session_id(file).map(|id| {
        let id = hex(id as u64);
        quote! {
            /// Identifier of the session protocol version.
            pub const SESSION_ID: u32 = #id;
        }
    });
    quote! {
        /// Upper bound of the size of a packet header, in bytes.
        pub const MAX_HEADER_LEN: usize = 384;
        #session_id

        #descriptor
        #(#enums)*
    }
}
