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

use crate::{analyzer, ast, document, GeneratorConfig};

/// Analyze an inline JSON document, panics on any diagnostic.
pub fn analyze_inline(source: &str) -> ast::File {
    let mut db = ast::SourceDatabase::new();
    let doc = document::parse_inline(&mut db, "test", source.to_owned()).unwrap();
    match analyzer::analyze(&doc, &GeneratorConfig::default(), "test") {
        Ok(file) => file,
        Err(diagnostics) => panic!("unexpected diagnostics: {:?}", diagnostics.diagnostics),
    }
}

/// Format a token stream as Rust source.
pub fn format_rust(tokens: proc_macro2::TokenStream) -> String {
    let syntax_tree = syn::parse2::<syn::File>(tokens).expect("generated code is not valid Rust");
    prettyplease::unparse(&syntax_tree)
}

/// Check that `haystack` contains `needle`.
///
/// Panic with a nice message if not.
#[track_caller]
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(haystack.contains(needle), "Could not find {:?} in {:?}", needle, haystack);
}

/// Check that `haystack` contains each of the `needles`, ignoring
/// whitespace differences.
#[track_caller]
pub fn assert_contains_all(haystack: &str, needles: &[&str]) {
    let normalize = |text: &str| text.split_whitespace().collect::<Vec<_>>().join(" ");
    let haystack = normalize(haystack);
    for needle in needles {
        assert_contains(&haystack, &normalize(needle));
    }
}
