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

//! Access to the tables of a packet specification document.
//!
//! The analyzer only sees raw cell text through the [`Document`] trait.
//! [`JsonDocument`] is the catalogue format read by the command line
//! tool and the derive macro.

use crate::ast;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row of the descriptor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRow {
    /// Single code or `start:end` code range.
    pub codes: String,
    pub anchor: String,
}

/// Generic template structure, shared by a family of descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Identifier of the template structure table.
    pub id: String,
    pub anchor: String,
}

/// Row of a structure table, as written in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "type")]
    pub type_cell: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnumMember {
    pub name: String,
    pub value: String,
}

/// Read access to a packet specification document.
pub trait Document {
    fn descriptor_ranges(&self) -> Vec<RangeRow>;

    fn templates(&self) -> Vec<TemplateRef>;

    /// Row `index` of the structure table `struct_id`, `None` past the
    /// last row or when the table does not exist.
    fn field_row(&self, struct_id: &str, index: usize) -> Option<RawRow>;

    fn enum_members(&self, enum_id: &str) -> Option<Vec<RawEnumMember>>;
}

/// Packet specification catalogue in JSON format.
///
/// ```json
/// {
///   "descriptors": [ { "codes": "'0x4242'", "anchor": "#session-start" } ],
///   "structs": {
///     "0x4242": [ { "type": "u(16)", "name": "session_start_descriptor", "value": "'0x4242'" } ]
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonDocument {
    #[serde(default)]
    pub descriptors: Vec<RangeRow>,
    #[serde(default)]
    pub templates: Vec<TemplateRef>,
    #[serde(default)]
    pub structs: BTreeMap<String, Vec<RawRow>>,
    #[serde(default)]
    pub enums: BTreeMap<String, Vec<RawEnumMember>>,
}

impl Document for JsonDocument {
    fn descriptor_ranges(&self) -> Vec<RangeRow> {
        self.descriptors.clone()
    }

    fn templates(&self) -> Vec<TemplateRef> {
        self.templates.clone()
    }

    fn field_row(&self, struct_id: &str, index: usize) -> Option<RawRow> {
        self.structs.get(struct_id)?.get(index).cloned()
    }

    fn enum_members(&self, enum_id: &str) -> Option<Vec<RawEnumMember>> {
        self.enums.get(enum_id).cloned()
    }
}

/// Parse a JSON document from a string.
///
/// The file is added to the compilation database under the provided
/// name.
pub fn parse_inline(
    sources: &mut ast::SourceDatabase,
    name: &str,
    source: String,
) -> Result<JsonDocument, Diagnostic<ast::FileId>> {
    let file = sources.add(name.to_owned(), source.clone());
    serde_json::from_str(&source).map_err(|err| {
        let line_starts: Vec<_> = files::line_starts(&source).collect();
        let offset = line_starts
            .get(err.line().saturating_sub(1))
            .map_or(source.len(), |start| start + err.column().saturating_sub(1))
            .min(source.len());
        Diagnostic::error()
            .with_message(format!("failed to parse input file '{}'", name))
            .with_labels(vec![Label::primary(file, offset..offset).with_message(err.to_string())])
    })
}

/// Parse a new document file.
///
/// The source file is fully read and added to the compilation
/// database.
pub fn parse_file(
    sources: &mut ast::SourceDatabase,
    name: &str,
) -> Result<JsonDocument, Diagnostic<ast::FileId>> {
    let source = std::fs::read_to_string(name).map_err(|e| {
        Diagnostic::error().with_message(format!("failed to read input file '{}': {}", name, e))
    })?;
    parse_inline(sources, name, source)
}
