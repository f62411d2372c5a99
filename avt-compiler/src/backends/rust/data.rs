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

//! Generation of the packet structures, the packet union and the
//! header size lookup.

use crate::ast;
use crate::backends::rust::{types, ToIdent};
use heck::ToShoutySnakeCase;
use quote::{format_ident, quote};

pub fn generate_struct_decl(decl: &ast::Struct) -> proc_macro2::TokenStream {
    let name = decl.id.to_ident();
    let fields = decl.stored_fields();
    let field_names = fields.iter().map(|f| f.id.to_ident()).collect::<Vec<_>>();
    let field_types = fields.iter().map(|f| types::rust_type(f));
    let field_defaults = fields.iter().map(|f| types::default_value(f));

    let header_size = proc_macro2::Literal::usize_unsuffixed(decl.header_size());
    let descriptor = decl.descriptor.map(|_| {
        let kind = format_ident!("{}", decl.kind.to_shouty_snake_case());
        quote! {
            pub const DESCRIPTOR: PktDescriptor = PktDescriptor::#kind;
        }
    });
    let doc = match decl.role {
        ast::StructRole::Packet => format!(" `{}` packet, table `{}`.", decl.kind, decl.key),
        ast::StructRole::Template => format!(" Generic `{}` packet layout.", decl.kind),
        ast::StructRole::Nested => format!(" Structure `{}`.", decl.key),
    };

    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct #name {
            #(pub #field_names: #field_types,)*
        }

        impl #name {
            #descriptor
            /// Size in bytes of the fixed part of the structure.
            pub const HEADER_SIZE: usize = #header_size;
        }

        impl Default for #name {
            fn default() -> Self {
                #name {
                    #(#field_names: #field_defaults,)*
                }
            }
        }
    }
}

/// Generate the union of the packets decoded from the start of a
/// buffer.
pub fn generate_packet_union(file: &ast::File) -> proc_macro2::TokenStream {
    let packets = file.toplevel_structs().collect::<Vec<_>>();
    let names = packets.iter().map(|s| s.id.to_ident()).collect::<Vec<_>>();
    let descriptor_arms = packets.iter().map(|s| {
        let name = s.id.to_ident();
        match (s.descriptor, s.descriptor_field()) {
            (Some(_), _) => quote!(PacketData::#name(_) => #name::DESCRIPTOR,),
            (None, Some(field)) if field.is_stored() => {
                let id = field.id.to_ident();
                quote!(PacketData::#name(packet) => packet.#id,)
            }
            _ => quote!(PacketData::#name(_) => PktDescriptor::default(),),
        }
    });
    let seq_arms = packets.iter().map(|s| {
        let name = s.id.to_ident();
        match s.seq_field() {
            Some(field) => {
                let id = field.id.to_ident();
                quote!(PacketData::#name(packet) => Some(packet.#id),)
            }
            None => quote!(PacketData::#name(_) => None,),
        }
    });
    let (descriptor_body, seq_body) = if packets.is_empty() {
        (quote!(match *self {}), quote!(match *self {}))
    } else {
        (quote!(match self { #(#descriptor_arms)* }), quote!(match self { #(#seq_arms)* }))
    };

    quote! {
        /// Packets decoded from the start of a buffer.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum PacketData {
            #(#names(#names),)*
        }

        impl PacketData {
            pub fn descriptor(&self) -> PktDescriptor {
                #descriptor_body
            }

            /// Sequence number of the packet, if it carries one.
            pub fn seq(&self) -> Option<u64> {
                #seq_body
            }
        }

        #(
            impl From<#names> for PacketData {
                fn from(packet: #names) -> Self {
                    PacketData::#names(packet)
                }
            }
        )*
    }
}

/// Generate the header size lookup by descriptor code.
pub fn generate_header_size(file: &ast::File) -> proc_macro2::TokenStream {
    let mut arms = vec![];
    for (_, code) in file.descriptors.iter() {
        if let Some(size) = file.header_size(code) {
            let code = types::hex((code & !ast::FLAG_LSB_BITMASK) as u64);
            let size = proc_macro2::Literal::usize_unsuffixed(size);
            arms.push(quote!(#code => Some(#size),));
        }
    }
    let body = if arms.is_empty() {
        quote! {
            let _ = descriptor;
            None
        }
    } else {
        quote! {
            match descriptor.code() {
                #(#arms)*
                _ => None,
            }
        }
    };

    quote! {
        /// Header size in bytes of the packets with the given descriptor,
        /// the 8-bit flag is ignored.
        pub fn header_size(descriptor: PktDescriptor) -> Option<usize> {
            #body
        }
    }
}

pub fn generate(file: &ast::File) -> proc_macro2::TokenStream {
    let structs = file.structs.iter().map(generate_struct_decl);
    let union = generate_packet_union(file);
    let header_size = generate_header_size(file);
    quote! {
        #(#structs)*
        #union
        #header_size
    }
}
