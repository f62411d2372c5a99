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

use crate::backends::rust::Unit;
use quote::quote;
use std::path::Path;

/// Generate the preamble of a generated unit.
///
/// The units are sibling modules, each holding the imports it needs
/// from the others and from the runtime.
pub fn generate(path: &Path, unit: Unit) -> proc_macro2::TokenStream {
    let filename = path.file_name().map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy());
    let module_doc_string = format!(" @generated rust {} from {filename}.", unit.module_name());
    let imports = match unit {
        Unit::Enums => quote! {},
        Unit::Data => quote! {
            #[allow(unused_imports)]
            use super::packet_enums::*;
            #[allow(unused_imports)]
            use avt_runtime::{Bytes, FixedStr, Rational};
        },
        Unit::Encoder => quote! {
            #[allow(unused_imports)]
            use super::packet_data::*;
            #[allow(unused_imports)]
            use super::packet_enums::*;
            #[allow(unused_imports)]
            use avt_runtime::{Encode, EncodeError, Writer};
        },
        Unit::Decoder => quote! {
            #[allow(unused_imports)]
            use super::packet_data::*;
            #[allow(unused_imports)]
            use super::packet_enums::*;
            #[allow(unused_imports)]
            use avt_runtime::{Bytes, Decode, DecodeError, DecodeFrom, Decoded, Reader};
        },
    };
    if imports.is_empty() {
        return imports;
    }
    // Not an inner comment (#![doc = ...]): the generated code can be
    // pulled into the middle of a module with include!.
    quote! {
        #[doc = #module_doc_string]
        #imports
    }
}
