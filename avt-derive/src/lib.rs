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

//! Attribute macros expanding AVTransport packet specifications into
//! packet types and codecs.

use avt_compiler::{analyzer, ast, backends, document, GeneratorConfig};
use codespan_reporting::term;
use proc_macro2::{Span, TokenStream};
use quote::quote;
use std::env;
use std::path::Path;
use syn::parse_macro_input;

fn compile_error(span: Span, buffer: termcolor::Buffer) -> TokenStream {
    syn::Error::new(span, String::from_utf8_lossy(&buffer.into_inner())).to_compile_error()
}

/// Expand the specification `source` inside the module `input`.
fn expand(
    span: Span,
    name: &str,
    source: String,
    include_path: Option<&str>,
    input: syn::ItemMod,
) -> TokenStream {
    // Parse the document.
    let mut sources = ast::SourceDatabase::new();
    let doc = match document::parse_inline(&mut sources, name, source) {
        Ok(doc) => doc,
        Err(err) => {
            let mut buffer = termcolor::Buffer::no_color();
            term::emit(&mut buffer, &term::Config::default(), &sources, &err)
                .expect("could not emit parser diagnostics");
            return compile_error(span, buffer);
        }
    };

    // Run the analyzer.
    let config = GeneratorConfig::default();
    let file = match analyzer::analyze(&doc, &config, name) {
        Ok(file) => file,
        Err(diagnostics) => {
            let mut buffer = termcolor::Buffer::no_color();
            diagnostics.emit(&sources, &mut buffer).expect("could not emit analyzer diagnostics");
            return compile_error(span, buffer);
        }
    };

    // Generate the packet units.
    let units = backends::rust::generate_modules(&file, &config);
    let mod_ident = input.ident;
    let mod_attrs = input.attrs;
    let mod_vis = input.vis;
    let mod_items = input.content.map(|(_, items)| items).unwrap_or_default();
    // Generate an include_bytes! statement to force a dependency on the
    // specification file.
    // This workaround is also used by pest, see
    // pest_generator::generator::generate_include, and for context
    // https://internals.rust-lang.org/t/pre-rfc-add-a-builtin-macro-to-indicate-build-dependency-to-file/9242.
    let include = include_path.map(|path| quote!(const _: &[u8] = include_bytes!(#path);));

    quote! {
        #(#mod_attrs)*
        #mod_vis mod #mod_ident {
            #include
            #units
            #(#mod_items)*
        }
    }
}

fn avt_proc_macro(path: syn::LitStr, input: syn::ItemMod) -> TokenStream {
    // Locate the specification file.
    let root = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into());
    let Some(full_path) =
        [Path::new(&root).join(path.value()), Path::new(&root).join("src").join(path.value())]
            .into_iter()
            .find(|path| path.exists())
    else {
        return syn::Error::new(path.span(), "error: unable to find file").to_compile_error();
    };

    let full_path = full_path.to_string_lossy().into_owned();
    let source = match std::fs::read_to_string(&full_path) {
        Ok(source) => source,
        Err(err) => {
            return syn::Error::new(path.span(), format!("error: unable to read file: {}", err))
                .to_compile_error()
        }
    };
    expand(path.span(), &full_path, source, Some(&full_path), input)
}

fn avt_inline_proc_macro(source: syn::LitStr, input: syn::ItemMod) -> TokenStream {
    expand(source.span(), "inline", source.value(), None, input)
}

/// Generate the packet types and codecs of a JSON specification file.
///
/// The path is relative to the crate root, or to its `src` directory.
///
/// ```ignore
/// #[avt("avtransport.json")]
/// mod packets {}
/// ```
#[proc_macro_attribute]
pub fn avt(attr: proc_macro::TokenStream, input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let attr = parse_macro_input!(attr as syn::LitStr);
    let input = parse_macro_input!(input as syn::ItemMod);
    avt_proc_macro(attr, input).into()
}

/// Generate the packet types and codecs of an inline JSON
/// specification.
#[proc_macro_attribute]
pub fn avt_inline(
    attr: proc_macro::TokenStream,
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let attr = parse_macro_input!(attr as syn::LitStr);
    let input = parse_macro_input!(input as syn::ItemMod);
    avt_inline_proc_macro(attr, input).into()
}
