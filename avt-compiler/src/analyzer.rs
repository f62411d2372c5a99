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

//! Construction of the packet model from a specification document.

use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::files;
use codespan_reporting::term;
use codespan_reporting::term::termcolor;
use heck::{ToSnakeCase, ToUpperCamelCase};
use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::backends::common::alignment::BitWindow;
use crate::document::Document;
use crate::parser::{self, Marker, Multiplier, TypeCell, TypeKind};
use crate::GeneratorConfig;

/// List of unique errors reported as analyzer diagnostics.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    MalformedTypeCell = 1,
    MalformedNameCell = 2,
    MalformedMarker = 3,
    MalformedDescriptorRange = 4,
    MalformedAnchor = 5,
    MalformedEnumMember = 6,
    InvalidFieldWidth = 7,
    InvalidFieldRepeat = 8,
    InvalidFixedField = 9,
    FixedValueOutOfRange = 10,
    UndeclaredStructIdentifier = 11,
    UndeclaredEnumIdentifier = 12,
    UndeclaredTemplateAnchor = 13,
    UndeclaredCountIdentifier = 14,
    InvalidCountIdentifier = 15,
    RecursiveStruct = 16,
    LdpcBitCountMismatch = 17,
    InvalidLdpcCode = 18,
    DuplicatePayloadField = 19,
    PayloadInNestedStruct = 20,
    BitfieldWindowOverflow = 21,
    MisalignedBitfield = 22,
    InvalidDescriptorCode = 23,
    DuplicateDescriptorCode = 24,
    DuplicateDescriptorKind = 25,
    DuplicateEnumValue = 26,
    DuplicateEnumMember = 27,
    InvalidTypeIdentifier = 28,
    DuplicateTypeIdentifier = 29,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "E{}", *self as u16)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        format!("{}", code)
    }
}

/// Aggregate analyzer diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic<FileId>>,
}

impl Diagnostics {
    fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn push(&mut self, diagnostic: Diagnostic<FileId>) {
        self.diagnostics.push(diagnostic)
    }

    fn err_or<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    pub fn emit(
        &self,
        sources: &SourceDatabase,
        writer: &mut dyn termcolor::WriteColor,
    ) -> Result<(), files::Error> {
        let config = term::Config::default();
        for d in self.diagnostics.iter() {
            term::emit(writer, &config, sources, d)?;
        }
        Ok(())
    }
}

impl From<Diagnostic<FileId>> for Diagnostics {
    fn from(diagnostic: Diagnostic<FileId>) -> Self {
        Diagnostics { diagnostics: vec![diagnostic] }
    }
}

fn error(code: ErrorCode, message: impl Into<String>) -> Diagnostic<FileId> {
    Diagnostic::error().with_code(code).with_message(message)
}

/// Location of a row in the document, attached to diagnostics.
#[derive(Clone, Copy)]
struct Row<'a> {
    key: &'a str,
    index: usize,
}

impl Row<'_> {
    fn error(&self, code: ErrorCode, message: impl Into<String>) -> Diagnostic<FileId> {
        error(code, message)
            .with_notes(vec![format!("in structure `{}`, row {}", self.key, self.index)])
    }
}

/// Outcome of building a structure table.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Built {
    /// Structure with the given type name.
    Struct(String),
    /// Descriptor sharing the layout of a template.
    Templated,
    /// Missing or empty table.
    Empty,
}

/// Strip the `_descriptor` suffix from the label of a descriptor row.
fn descriptor_kind(label: &str) -> Option<&str> {
    label.strip_suffix("_descriptor").filter(|kind| !kind.is_empty())
}

fn is_identifier(id: &str) -> bool {
    id.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn mask(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// Builder state, owning all tables under construction.
pub struct Context<'d> {
    doc: &'d dyn Document,
    config: &'d GeneratorConfig,
    file: File,
    /// Memoized structure tables, by document key.
    built: HashMap<String, Built>,
    /// Keys of the structures currently being built.
    in_progress: Vec<String>,
    /// Template type names, by anchor.
    templates: HashMap<String, String>,
}

impl<'d> Context<'d> {
    pub fn new(doc: &'d dyn Document, config: &'d GeneratorConfig, source: &str) -> Self {
        Context {
            doc,
            config,
            file: File { source: source.to_owned(), ..Default::default() },
            built: HashMap::new(),
            in_progress: vec![],
            templates: HashMap::new(),
        }
    }

    /// Register the enumeration `key` on first use, returns its type name.
    pub fn resolve_enum(&mut self, key: &str) -> Result<String, Diagnostic<FileId>> {
        if let Some(e) = self.file.enums.iter().find(|e| e.key == key) {
            return Ok(e.id.clone());
        }
        let id = key.to_upper_camel_case();
        if !is_identifier(&id) {
            return Err(error(
                ErrorCode::InvalidTypeIdentifier,
                format!("enum `{}` does not name a valid type", key),
            ));
        }
        let Some(raw_members) = self.doc.enum_members(key) else {
            return Err(error(
                ErrorCode::UndeclaredEnumIdentifier,
                format!("undeclared enum identifier `{}`", key),
            ));
        };

        let mut members: Vec<EnumMember> = vec![];
        for raw in raw_members {
            let invalid = |err: String| {
                error(ErrorCode::MalformedEnumMember, format!("in enum `{}`: {}", key, err))
            };
            let member_id = parser::parse_name_cell(&raw.name).map_err(invalid)?.to_upper_camel_case();
            if !is_identifier(&member_id) {
                return Err(invalid(format!("`{}` does not name a valid member", raw.name)));
            }
            let value = parser::parse_code_cell(&raw.value).map_err(invalid)?;
            if member_id == "Unknown" || members.iter().any(|m| m.id == member_id) {
                return Err(error(
                    ErrorCode::DuplicateEnumMember,
                    format!("duplicate member `{}` in enum `{}`", member_id, key),
                ));
            }
            if let Some(other) = members.iter().find(|m| m.value == value) {
                return Err(error(
                    ErrorCode::DuplicateEnumValue,
                    format!(
                        "enum `{}` members `{}` and `{}` share the value {:#x}",
                        key, other.id, member_id, value
                    ),
                ));
            }
            members.push(EnumMember { id: member_id, value });
        }

        tracing::debug!(enum_id = %id, members = members.len(), "parsed enum");
        self.file.enums.push(Enum { key: key.to_owned(), id: id.clone(), members });
        Ok(id)
    }

    /// Build the structure table `key`, memoized.
    ///
    /// `name` overrides the generated type name; `role` only applies to
    /// the first build of a table.
    pub fn build_struct(
        &mut self,
        key: &str,
        name: Option<&str>,
        role: StructRole,
    ) -> Result<Option<String>, Diagnostic<FileId>> {
        Ok(match self.build(key, name, role)? {
            Built::Struct(id) => Some(id),
            Built::Templated | Built::Empty => None,
        })
    }

    fn build(&mut self, key: &str, name: Option<&str>, role: StructRole) -> Result<Built, Diagnostic<FileId>> {
        if let Some(built) = self.built.get(key) {
            return Ok(built.clone());
        }
        if self.in_progress.iter().any(|k| k == key) {
            return Err(error(
                ErrorCode::RecursiveStruct,
                format!("recursive declaration of structure `{}`", key),
            ));
        }
        self.in_progress.push(key.to_owned());
        let built = self.build_fields(key, name, role);
        self.in_progress.pop();
        let built = built?;
        self.built.insert(key.to_owned(), built.clone());
        Ok(built)
    }

    fn build_fields(
        &mut self,
        key: &str,
        name: Option<&str>,
        role: StructRole,
    ) -> Result<Built, Diagnostic<FileId>> {
        let mut fields: Vec<Field> = vec![];
        let mut size_bits = 0;
        let mut bits_since_ldpc = 0;
        let mut descriptor = None;
        let mut kind = None;

        for index in 0.. {
            let Some(raw) = self.doc.field_row(key, index) else {
                break;
            };
            let row = Row { key, index };
            let marker = parser::parse_marker_cell(&raw.value)
                .map_err(|err| row.error(ErrorCode::MalformedMarker, err))?;
            let label = parser::parse_name_cell(&raw.name)
                .map_err(|err| row.error(ErrorCode::MalformedNameCell, err))?
                .to_snake_case();

            if let Marker::Template(anchor) = &marker {
                return self.build_templated(row, anchor, &raw.type_cell, &label);
            }
            if index == 0 {
                kind = Some(match (descriptor_kind(&label), name) {
                    (Some(kind), _) => kind.to_owned(),
                    (None, Some(name)) => name.to_snake_case(),
                    (None, None) => label.clone(),
                });
            }

            let cell = parser::parse_type_cell(&raw.type_cell)
                .map_err(|err| row.error(ErrorCode::MalformedTypeCell, err))?;
            let mut id = label.clone();
            let mut suffix = 2;
            while fields.iter().any(|f| f.id == id) {
                id = format!("{}_{}", label, suffix);
                suffix += 1;
            }

            let field = self.build_field(row, &fields, cell, id, marker, bits_since_ldpc)?;
            match &field.desc {
                FieldDesc::Parity(_) => bits_since_ldpc = 0,
                _ => {
                    let count = match field.repeat {
                        Repeat::Constant(count) => count,
                        _ => 1,
                    };
                    bits_since_ldpc += field.width * count;
                }
            }
            if !matches!(field.desc, FieldDesc::Payload | FieldDesc::Struct { .. }) {
                size_bits += field.wire_bits().unwrap_or(0);
            }
            if let (0, FieldDesc::Descriptor, Some(value)) = (index, &field.desc, field.fixed) {
                descriptor = Some(if field.width == 8 { value as u32 | FLAG_LSB_BITMASK } else { value as u32 });
            }
            fields.push(field);
        }

        if size_bits == 0 {
            return Ok(Built::Empty);
        }

        let kind = kind.unwrap_or_else(|| key.to_snake_case());
        let id = match name.filter(|name| is_identifier(name)) {
            Some(name) => name.to_upper_camel_case(),
            None => kind.to_upper_camel_case(),
        };
        if !is_identifier(&id) {
            return Err(error(
                ErrorCode::InvalidTypeIdentifier,
                format!("structure `{}` does not name a valid type", key),
            ));
        }

        self.check_bitfields(key, &fields)?;
        if let Some(code) = descriptor {
            self.register_descriptor(key, &kind, code)?;
        }

        tracing::debug!(key, id = %id, fields = fields.len(), size_bits, "parsed structure");
        self.file.structs.push(Struct {
            key: key.to_owned(),
            id: id.clone(),
            kind,
            role,
            fields,
            size_bits,
            descriptor,
        });
        Ok(Built::Struct(id))
    }

    fn build_templated(
        &mut self,
        row: Row<'_>,
        anchor: &str,
        type_cell: &str,
        label: &str,
    ) -> Result<Built, Diagnostic<FileId>> {
        let Some(template_id) = self.templates.get(anchor).cloned() else {
            return Err(row.error(
                ErrorCode::UndeclaredTemplateAnchor,
                format!("undeclared template anchor `{}`", anchor),
            ));
        };
        let code = parser::parse_code_cell(type_cell)
            .map_err(|err| row.error(ErrorCode::InvalidDescriptorCode, err))?;
        let code = u16::try_from(code).map_err(|_| {
            row.error(ErrorCode::InvalidDescriptorCode, format!("descriptor code {:#x} is too large", code))
        })?;
        let kind = descriptor_kind(label).unwrap_or(label).to_owned();
        self.register_descriptor(row.key, &kind, code as u32)?;
        tracing::debug!(kind = %kind, code, template = %template_id, "parsed templated structure");
        self.file.templated.push(TemplatedStruct { kind, descriptor: code as u32, template_id });
        Ok(Built::Templated)
    }

    fn build_field(
        &mut self,
        row: Row<'_>,
        siblings: &[Field],
        cell: TypeCell,
        id: String,
        marker: Marker,
        bits_since_ldpc: usize,
    ) -> Result<Field, Diagnostic<FileId>> {
        let mut width = cell.width;
        if width == 0 {
            return Err(row.error(ErrorCode::InvalidFieldWidth, format!("field `{}` has zero width", id)));
        }
        let mut repeat = match &cell.multiplier {
            None | Some(Multiplier::Count(1)) => Repeat::None,
            Some(Multiplier::Count(0)) => {
                return Err(row.error(
                    ErrorCode::InvalidFieldRepeat,
                    format!("field `{}` has zero elements", id),
                ))
            }
            Some(Multiplier::Count(count)) => Repeat::Constant(*count),
            Some(Multiplier::Field(name)) => Repeat::FieldRef(resolve_count(row, siblings, name)?),
        };
        // Repeated single bits are packed into one field.
        if let (1, Repeat::Constant(count), TypeKind::Unsigned | TypeKind::Bits, Marker::None | Marker::Fixed(_)) =
            (width, repeat, cell.kind, &marker)
        {
            width = count;
            repeat = Repeat::None;
        }
        let mut field = Field { id, desc: FieldDesc::Payload, width, repeat, fixed: None, seq: false };

        field.desc = match marker {
            Marker::Payload => FieldDesc::Payload,
            Marker::Ldpc { code_bits, message_bits } => {
                if code_bits <= message_bits || message_bits % 8 != 0 || (code_bits - message_bits) % 8 != 0 {
                    return Err(row.error(
                        ErrorCode::InvalidLdpcCode,
                        format!("invalid LDPC code ({}, {})", code_bits, message_bits),
                    ));
                }
                if message_bits != bits_since_ldpc {
                    return Err(row.error(
                        ErrorCode::LdpcBitCountMismatch,
                        format!(
                            "LDPC({}, {}) covers {} bits, but {} bits precede the marker",
                            code_bits, message_bits, message_bits, bits_since_ldpc
                        ),
                    ));
                }
                let declared = match field.repeat {
                    Repeat::None => Some(width),
                    Repeat::Constant(count) => Some(width * count),
                    Repeat::FieldRef(_) => None,
                };
                if declared != Some(code_bits - message_bits) {
                    return Err(row.error(
                        ErrorCode::LdpcBitCountMismatch,
                        format!(
                            "parity field `{}` must hold {} bits",
                            field.id,
                            code_bits - message_bits
                        ),
                    ));
                }
                field.repeat = Repeat::None;
                FieldDesc::Parity(Ldpc { code_bits, message_bits })
            }
            Marker::Struct(struct_key) => {
                let Some(type_id) = self.build_struct(&struct_key, Some(&struct_key), StructRole::Nested)? else {
                    return Err(row.error(
                        ErrorCode::UndeclaredStructIdentifier,
                        format!("undeclared structure identifier `{}`", struct_key),
                    ));
                };
                if self.file.get_struct(&type_id).and_then(Struct::payload_field).is_some() {
                    return Err(row.error(
                        ErrorCode::PayloadInNestedStruct,
                        format!("structure `{}` has a payload and cannot be nested", type_id),
                    ));
                }
                self.file.substructs.insert(type_id.clone());
                FieldDesc::Struct { type_id }
            }
            Marker::Enum(enum_key) => {
                if !(width < 8 && field.repeat == Repeat::None || matches!(width, 8 | 16 | 32 | 64)) {
                    return Err(row.error(
                        ErrorCode::InvalidFieldWidth,
                        format!("enum field `{}` has invalid width {}", field.id, width),
                    ));
                }
                FieldDesc::Enum { type_id: self.resolve_enum(&enum_key)? }
            }
            Marker::String => {
                if width % 8 != 0 {
                    return Err(row.error(
                        ErrorCode::InvalidFieldWidth,
                        format!("string field `{}` is not byte aligned", field.id),
                    ));
                }
                match field.repeat {
                    Repeat::None => FieldDesc::String { capacity: width / 8 },
                    Repeat::Constant(count) => {
                        field.repeat = Repeat::None;
                        field.width = width * count;
                        FieldDesc::String { capacity: width * count / 8 }
                    }
                    Repeat::FieldRef(_) if width == 8 => FieldDesc::Scalar { signed: false },
                    Repeat::FieldRef(_) => {
                        return Err(row.error(
                            ErrorCode::InvalidFieldWidth,
                            format!("variable length string `{}` must have 8-bit elements", field.id),
                        ))
                    }
                }
            }
            Marker::Fixed(value) => {
                let desc = typed_desc(row, &field, &cell)?;
                field.fixed = Some(fixed_value(row, &field, &desc, value)?);
                desc
            }
            Marker::None => typed_desc(row, &field, &cell)?,
            Marker::Template(_) => unreachable!("templated rows are handled by the caller"),
        };

        if matches!(field.desc, FieldDesc::Payload) && siblings.iter().any(|f| matches!(f.desc, FieldDesc::Payload)) {
            return Err(row.error(
                ErrorCode::DuplicatePayloadField,
                format!("second payload field `{}`", field.id),
            ));
        }
        field.seq = field.id.contains("seq")
            && matches!(field.desc, FieldDesc::Scalar { .. } | FieldDesc::Bitfield)
            && field.repeat == Repeat::None;
        Ok(field)
    }

    fn check_bitfields(&self, key: &str, fields: &[Field]) -> Result<(), Diagnostic<FileId>> {
        let mut window = BitWindow::new(self.config.bitfield_window);
        for (index, field) in fields.iter().enumerate() {
            let row = Row { key, index };
            if field.is_packed() {
                window.push(index, field.width).map_err(|err| {
                    row.error(ErrorCode::BitfieldWindowOverflow, format!("field `{}`: {}", field.id, err))
                })?;
            } else {
                window.flush().map_err(|err| {
                    row.error(ErrorCode::MisalignedBitfield, format!("field `{}`: {}", field.id, err))
                })?;
            }
        }
        window.flush().map_err(|err| {
            error(ErrorCode::MisalignedBitfield, format!("at the end of structure `{}`: {}", key, err))
        })
    }

    fn register_descriptor(&mut self, key: &str, kind: &str, code: u32) -> Result<(), Diagnostic<FileId>> {
        if let Some(other) = self.file.descriptors.get(kind) {
            return Err(error(
                ErrorCode::DuplicateDescriptorKind,
                format!(
                    "descriptor kind `{}` of structure `{}` is already registered with code {:#06x}",
                    kind, key, other
                ),
            ));
        }
        self.file.descriptors.insert(kind, code);
        Ok(())
    }

    fn build_all(&mut self) -> Result<(), Diagnostic<FileId>> {
        for template in self.doc.templates() {
            let anchor = parser::parse_anchor_cell(&template.anchor).map_err(|err| {
                error(ErrorCode::MalformedAnchor, format!("template `{}`: {}", template.id, err))
            })?;
            let Some(id) = self.build_struct(&template.id, None, StructRole::Template)? else {
                return Err(error(
                    ErrorCode::UndeclaredStructIdentifier,
                    format!("template `{}` has no fields", template.id),
                ));
            };
            tracing::debug!(anchor = %anchor, template = %id, "registered template");
            self.templates.insert(anchor, id);
        }

        for range in self.doc.descriptor_ranges() {
            let malformed = |err: String| {
                error(ErrorCode::MalformedDescriptorRange, format!("descriptor range `{}`: {}", range.codes, err))
            };
            let (start, end) = parser::parse_code_range_cell(&range.codes).map_err(malformed)?;
            if start > end || end > 0xffff {
                return Err(malformed(format!("invalid bounds {:#06x}..={:#06x}", start, end)));
            }
            tracing::debug!(start, end, anchor = %range.anchor, "walking descriptor range");
            for code in start..=end {
                if self.build(&format!("0x{:04X}", code), None, StructRole::Packet)? == Built::Empty {
                    break;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<File, Diagnostics> {
        let mut diagnostics = Diagnostics::default();
        let file = self.file;

        let mut codes: HashMap<u32, &str> = HashMap::new();
        for (kind, code) in file.descriptors.iter() {
            if let Some(other) = codes.insert(code & !FLAG_LSB_BITMASK, kind) {
                diagnostics.push(error(
                    ErrorCode::DuplicateDescriptorCode,
                    format!(
                        "descriptor kinds `{}` and `{}` share the code {:#06x}",
                        other,
                        kind,
                        code & !FLAG_LSB_BITMASK
                    ),
                ));
            }
        }

        let mut types: HashMap<&str, &str> = HashMap::new();
        types.insert("PktDescriptor", "generated descriptor type");
        types.insert("PacketData", "generated packet union");
        let decls = file
            .enums
            .iter()
            .map(|e| (e.id.as_str(), e.key.as_str()))
            .chain(file.structs.iter().map(|s| (s.id.as_str(), s.key.as_str())));
        for (id, key) in decls {
            if let Some(other) = types.insert(id, key) {
                diagnostics.push(error(
                    ErrorCode::DuplicateTypeIdentifier,
                    format!("type name `{}` of `{}` is already used by `{}`", id, key, other),
                ));
            }
        }

        diagnostics.err_or(file)
    }
}

fn resolve_count(row: Row<'_>, siblings: &[Field], name: &str) -> Result<usize, Diagnostic<FileId>> {
    let name = name.to_snake_case();
    let Some(index) = siblings.iter().position(|f| f.id == name) else {
        return Err(row.error(
            ErrorCode::UndeclaredCountIdentifier,
            format!("undeclared count field `{}`", name),
        ));
    };
    let count = &siblings[index];
    if !matches!(count.desc, FieldDesc::Scalar { signed: false } | FieldDesc::Bitfield)
        || count.repeat != Repeat::None
    {
        return Err(row.error(
            ErrorCode::InvalidCountIdentifier,
            format!("count field `{}` is not an unsigned scalar", name),
        ));
    }
    Ok(index)
}

/// Field description derived from the type cell and the field name.
fn typed_desc(row: Row<'_>, field: &Field, cell: &TypeCell) -> Result<FieldDesc, Diagnostic<FileId>> {
    let invalid_width = || {
        row.error(
            ErrorCode::InvalidFieldWidth,
            format!("field `{}` has invalid width {}", field.id, field.width),
        )
    };
    let invalid_repeat = || {
        row.error(ErrorCode::InvalidFieldRepeat, format!("field `{}` cannot be repeated", field.id))
    };
    let width = field.width;
    let repeated = field.repeat != Repeat::None;

    if field.id.ends_with("descriptor") {
        if !matches!(width, 8 | 16 | 32) {
            return Err(invalid_width());
        }
        if repeated {
            return Err(invalid_repeat());
        }
        return Ok(FieldDesc::Descriptor);
    }
    if field.id.starts_with("padding") && width % 8 == 0 {
        return Ok(FieldDesc::Padding);
    }
    match (cell.kind, width) {
        (TypeKind::Rational, 64) => Ok(FieldDesc::Rational),
        (TypeKind::Rational, _) => Err(invalid_width()),
        (TypeKind::Unsigned | TypeKind::Bits, 1..=7) if repeated => Err(invalid_repeat()),
        (TypeKind::Unsigned | TypeKind::Bits, 1..=7) => Ok(FieldDesc::Bitfield),
        (_, 8 | 16 | 32 | 64) => Ok(FieldDesc::Scalar { signed: cell.kind == TypeKind::Signed }),
        (TypeKind::Unsigned | TypeKind::Bits, _) if width % 8 == 0 && !repeated => Ok(FieldDesc::Bytes),
        (TypeKind::Unsigned | TypeKind::Bits, _) if width % 8 == 0 => Err(invalid_repeat()),
        _ => Err(invalid_width()),
    }
}

/// Validate a fixed value, returns the value as stored in the model.
fn fixed_value(row: Row<'_>, field: &Field, desc: &FieldDesc, value: u64) -> Result<u64, Diagnostic<FileId>> {
    if field.repeat != Repeat::None
        || !matches!(desc, FieldDesc::Scalar { .. } | FieldDesc::Bitfield | FieldDesc::Descriptor)
    {
        return Err(row.error(
            ErrorCode::InvalidFixedField,
            format!("field `{}` cannot hold a fixed value", field.id),
        ));
    }
    let limit = match desc {
        FieldDesc::Descriptor => mask(field.width.min(16)),
        _ => mask(field.width),
    };
    if value > limit {
        return Err(row.error(
            ErrorCode::FixedValueOutOfRange,
            format!("fixed value {:#x} of field `{}` exceeds {} bits", value, field.id, field.width),
        ));
    }
    Ok(match desc {
        FieldDesc::Descriptor if field.width == 8 => value << 8,
        _ => value,
    })
}

/// Build the packet model of a specification document.
pub fn analyze(doc: &dyn Document, config: &GeneratorConfig, source: &str) -> Result<File, Diagnostics> {
    let mut context = Context::new(doc, config, source);
    context.build_all()?;
    context.finish()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::document::{JsonDocument, RangeRow, RawEnumMember, RawRow, TemplateRef};

    fn rows(rows: &[(&str, &str, &str)]) -> Vec<RawRow> {
        rows.iter()
            .map(|(type_cell, name, value)| RawRow {
                type_cell: type_cell.to_string(),
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    /// Document with a single descriptor range and the given tables.
    fn doc(codes: &str, structs: &[(&str, &[(&str, &str, &str)])]) -> JsonDocument {
        JsonDocument {
            descriptors: vec![RangeRow { codes: codes.to_owned(), anchor: "#packets".to_owned() }],
            structs: structs.iter().map(|(key, r)| (key.to_string(), rows(r))).collect(),
            ..Default::default()
        }
    }

    fn with_enum(mut doc: JsonDocument, key: &str, members: &[(&str, &str)]) -> JsonDocument {
        doc.enums.insert(
            key.to_owned(),
            members
                .iter()
                .map(|(name, value)| RawEnumMember { name: name.to_string(), value: value.to_string() })
                .collect(),
        );
        doc
    }

    macro_rules! raises {
        ($code:ident, $doc:expr) => {{
            let db = SourceDatabase::new();
            let result = analyze(&$doc, &GeneratorConfig::default(), "test");
            assert!(matches!(result, Err(_)));
            let diagnostics = result.err().unwrap();
            let mut buffer = termcolor::Buffer::no_color();
            let _ = diagnostics.emit(&db, &mut buffer);
            println!("{}", std::str::from_utf8(buffer.as_slice()).unwrap());
            assert_eq!(diagnostics.diagnostics.len(), 1);
            assert_eq!(diagnostics.diagnostics[0].code, Some(ErrorCode::$code.into()));
        }};
    }

    fn valid(doc: &JsonDocument) -> File {
        match analyze(doc, &GeneratorConfig::default(), "test") {
            Ok(file) => file,
            Err(diagnostics) => panic!("unexpected diagnostics: {:?}", diagnostics.diagnostics),
        }
    }

    const SESSION_START: &[(&str, &str, &str)] = &[
        ("u(16)", "session_start_descriptor", "0x4242"),
        ("u(3)", "a", ""),
        ("u(2)", "b", ""),
        ("u(3)", "c", ""),
    ];

    #[test]
    fn session_start() {
        let file = valid(&doc("'0x4242'", &[("0x4242", SESSION_START)]));
        let s = file.get_struct("SessionStart").unwrap();
        assert_eq!(s.kind, "session_start");
        assert_eq!(s.size_bits, 24);
        assert_eq!(s.descriptor, Some(0x4242));
        assert_eq!(s.fields[0].fixed, Some(0x4242));
        assert!(s.fields[1..].iter().all(|f| f.desc == FieldDesc::Bitfield));
        assert_eq!(file.descriptors.get("session_start"), Some(0x4242));
        assert_eq!(file.header_size(0x4242), Some(3));
        assert_eq!(file.header_size(0x4243), None);
    }

    #[test]
    fn range_walk_stops_at_empty_slot() {
        let file = valid(&doc(
            "'0x0100':'0x01FF'",
            &[
                ("0x0100", &[("u(16)", "a_descriptor", "0x0100"), ("u(8)", "x", "")]),
                ("0x0101", &[("u(16)", "b_descriptor", "0x0101")]),
                ("0x0103", &[("u(16)", "d_descriptor", "0x0103")]),
            ],
        ));
        let ids: Vec<_> = file.structs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(file.descriptors.len(), 2);
    }

    #[test]
    fn narrow_descriptor_is_flagged() {
        let file = valid(&doc(
            "'0x0001'",
            &[("0x0001", &[("u(8)", "stream_data_descriptor", "0x01"), ("u(8)", "x", "")])],
        ));
        let s = file.get_struct("StreamData").unwrap();
        assert_eq!(s.fields[0].fixed, Some(0x0100));
        assert_eq!(s.descriptor, Some(0x0100 | FLAG_LSB_BITMASK));
        assert_eq!(file.header_size(0x0100), Some(2));
        assert_eq!(file.header_size(0x0100 | FLAG_LSB_BITMASK), Some(2));
    }

    #[test]
    fn name_promotions() {
        let file = valid(&doc(
            "'0x0010'",
            &[(
                "0x0010",
                &[
                    ("u(16)", "x_descriptor", "0x0010"),
                    ("u(32)", "global_seq", ""),
                    ("u(16)", "target_descriptor", ""),
                    ("u(8)", "padding", ""),
                    ("u(8)", "value", ""),
                    ("u(8)", "value", ""),
                ],
            )],
        ));
        let s = file.get_struct("X").unwrap();
        assert!(s.fields[1].seq);
        assert_eq!(s.fields[2].desc, FieldDesc::Descriptor);
        assert_eq!(s.fields[2].fixed, None);
        assert_eq!(s.fields[3].desc, FieldDesc::Padding);
        assert_eq!(s.fields[5].id, "value_2");
        assert_eq!(s.size_bits, 16 + 32 + 16 + 8 + 8 + 8);
    }

    #[test]
    fn arrays_and_payload() {
        let file = valid(&doc(
            "'0x0020'",
            &[(
                "0x0020",
                &[
                    ("u(16)", "y_descriptor", "0x0020"),
                    ("4*u(8)", "tag", ""),
                    ("u(16)", "len", ""),
                    ("[=len=]*u(16)", "samples", ""),
                    ("[=len=]*u(8)", "data", "payload"),
                ],
            )],
        ));
        let s = file.get_struct("Y").unwrap();
        assert_eq!(s.fields[1].repeat, Repeat::Constant(4));
        assert_eq!(s.fields[3].repeat, Repeat::FieldRef(2));
        assert_eq!(s.fields[4].desc, FieldDesc::Payload);
        assert_eq!(s.size_bits, 16 + 32 + 16);
    }

    #[test]
    fn nested_structs_are_registered() {
        let file = valid(&doc(
            "'0x0030'",
            &[
                (
                    "0x0030",
                    &[("u(16)", "z_descriptor", "0x0030"), ("u(64)", "info", "struct{StreamInfo}")],
                ),
                ("StreamInfo", &[("u(32)", "width", ""), ("u(32)", "height", "")]),
            ],
        ));
        assert_eq!(file.structs[0].id, "StreamInfo");
        assert_eq!(file.structs[0].role, StructRole::Nested);
        assert!(file.substructs.contains("StreamInfo"));
        assert_eq!(file.get_struct("Z").unwrap().size_bits, 16);
        assert_eq!(file.toplevel_structs().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["Z"]);
    }

    #[test]
    fn templates() {
        let mut d = doc(
            "'0x0110':'0x0111'",
            &[
                (
                    "GenericData",
                    &[("u(16)", "generic_data_descriptor", ""), ("u(32)", "global_seq", "")],
                ),
                ("0x0110", &[("'0x0110'", "stream_data_descriptor", "[[#generic-data]]")]),
                ("0x0111", &[("'0x0111'", "user_data_descriptor", "[[#generic-data]]")]),
            ],
        );
        d.templates.push(TemplateRef { id: "GenericData".to_owned(), anchor: "[[#generic-data]]".to_owned() });
        let file = valid(&d);
        assert_eq!(file.templated.len(), 2);
        assert_eq!(file.templated[0].template_id, "GenericData");
        assert_eq!(file.descriptors.get("user_data"), Some(0x0111));
        assert_eq!(file.header_size(0x0111), Some(6));
        assert_eq!(file.get_struct("GenericData").unwrap().role, StructRole::Template);
    }

    #[test]
    fn enums() {
        let d = with_enum(
            doc(
                "'0x0040'",
                &[(
                    "0x0040",
                    &[
                        ("u(16)", "e_descriptor", "0x0040"),
                        ("u(8)", "primaries", "enum{ColorPrimaries}"),
                        ("u(4)", "mode", "enum{ColorPrimaries}"),
                        ("u(4)", "other", ""),
                    ],
                )],
            ),
            "ColorPrimaries",
            &[("BT709", "0x1"), ("BT2020", "0x9")],
        );
        let file = valid(&d);
        assert_eq!(file.enums.len(), 1);
        assert_eq!(file.enums[0].id, "ColorPrimaries");
        assert_eq!(file.enums[0].members[1], EnumMember { id: "Bt2020".to_owned(), value: 9 });
    }

    #[test]
    fn test_malformed_cells() {
        raises!(MalformedTypeCell, doc("'0x0001'", &[("0x0001", &[("x(16)", "a_descriptor", "")])]));
        raises!(MalformedNameCell, doc("'0x0001'", &[("0x0001", &[("u(16)", "a b", "")])]));
        raises!(MalformedMarker, doc("'0x0001'", &[("0x0001", &[("u(16)", "a", "LDPC(1)")])]));
        raises!(MalformedDescriptorRange, doc("'0x0002':'0x0001'", &[]));
        raises!(MalformedDescriptorRange, doc("zero", &[]));
    }

    #[test]
    fn test_invalid_field_width() {
        raises!(InvalidFieldWidth, doc("'0x0001'", &[("0x0001", &[("u(12)", "a", "")])]));
        raises!(InvalidFieldWidth, doc("'0x0001'", &[("0x0001", &[("R(32)", "a", "")])]));
        raises!(InvalidFieldWidth, doc("'0x0001'", &[("0x0001", &[("u(4)", "a_descriptor", "")])]));
        raises!(InvalidFieldWidth, doc("'0x0001'", &[("0x0001", &[("u(0)", "a", "")])]));
        raises!(InvalidFieldRepeat, doc("'0x0001'", &[("0x0001", &[("8*u(2)", "a", "")])]));
        raises!(
            InvalidFieldRepeat,
            doc("'0x0001'", &[("0x0001", &[("u(8)", "len", ""), ("[=len=]*b(1)", "a", "")])])
        );
    }

    #[test]
    fn repeated_single_bits_are_packed() {
        let file = valid(&doc(
            "'0x0001'",
            &[(
                "0x0001",
                &[
                    ("u(16)", "flags_descriptor", "0x0001"),
                    ("8*b(1)", "flags", ""),
                    ("4*u(1)", "low", ""),
                    ("u(4)", "high", ""),
                    ("16*b(1)", "mask", "0x00ff"),
                ],
            )],
        ));
        let s = file.get_struct("Flags").unwrap();
        assert_eq!(s.fields[1].desc, FieldDesc::Scalar { signed: false });
        assert_eq!((s.fields[1].width, s.fields[1].repeat), (8, Repeat::None));
        assert_eq!(s.fields[2].desc, FieldDesc::Bitfield);
        assert_eq!(s.fields[2].width, 4);
        assert_eq!(s.fields[4].fixed, Some(0xff));
        assert_eq!(s.size_bits, 16 + 8 + 8 + 16);
    }

    #[test]
    fn descriptor_code_only_from_first_row() {
        let file = valid(&doc(
            "'0x0001'",
            &[("0x0001", &[("u(16)", "y_descriptor", ""), ("u(16)", "target_descriptor", "0x0005")])],
        ));
        let s = file.get_struct("Y").unwrap();
        assert_eq!(s.descriptor, None);
        assert_eq!(s.fields[1].fixed, Some(0x0005));
        assert_eq!(file.descriptors.get("y"), None);
        assert_eq!(file.header_size(0x0005), None);
    }

    #[test]
    fn kind_from_first_label() {
        let file = valid(&doc(
            "'0x0001'",
            &[("0x0001", &[("u(8)", "ping", ""), ("u(8)", "x", "")])],
        ));
        let s = file.get_struct("Ping").unwrap();
        assert_eq!(s.kind, "ping");
        assert_eq!(s.size_bits, 16);
    }

    #[test]
    fn test_fixed_values() {
        raises!(FixedValueOutOfRange, doc("'0x0001'", &[("0x0001", &[("u(8)", "a", "0x100")])]));
        raises!(FixedValueOutOfRange, doc("'0x0001'", &[("0x0001", &[("u(8)", "a_descriptor", "0x100")])]));
        raises!(InvalidFixedField, doc("'0x0001'", &[("0x0001", &[("R(64)", "a", "0x1")])]));
    }

    #[test]
    fn test_undeclared_references() {
        raises!(UndeclaredStructIdentifier, doc("'0x0001'", &[("0x0001", &[("u(8)", "a", "struct{Nope}")])]));
        raises!(UndeclaredEnumIdentifier, doc("'0x0001'", &[("0x0001", &[("u(8)", "a", "enum{Nope}")])]));
        raises!(
            UndeclaredTemplateAnchor,
            doc("'0x0001'", &[("0x0001", &[("'0x0001'", "a_descriptor", "[[#generic-nope]]")])])
        );
        raises!(
            UndeclaredCountIdentifier,
            doc("'0x0001'", &[("0x0001", &[("[=len=]*u(8)", "a", ""), ("u(8)", "len", "")])])
        );
        raises!(
            InvalidCountIdentifier,
            doc("'0x0001'", &[("0x0001", &[("R(64)", "len", ""), ("[=len=]*u(8)", "a", "")])])
        );
    }

    #[test]
    fn test_recursive_struct() {
        raises!(
            RecursiveStruct,
            doc("'0x0001'", &[("0x0001", &[("u(16)", "a_descriptor", "0x1"), ("u(8)", "x", "struct{0x0001}")])])
        );
        raises!(
            RecursiveStruct,
            doc(
                "'0x0001'",
                &[("0x0001", &[("u(8)", "x", "struct{A}")]), ("A", &[("u(8)", "y", "struct{B}")]), ("B", &[("u(8)", "z", "struct{A}")])]
            )
        );
    }

    #[test]
    fn test_ldpc() {
        let mut message: Vec<(&str, &str, &str)> = vec![("u(16)", "a_descriptor", "0x1")];
        message.extend(std::iter::repeat(("u(16)", "x", "")).take(13));
        message.push(("u(64)", "parity", "LDPC(288, 224)"));
        valid(&doc("'0x0001'", &[("0x0001", &message)]));

        message.remove(1);
        raises!(LdpcBitCountMismatch, doc("'0x0001'", &[("0x0001", &message)]));
        raises!(InvalidLdpcCode, doc("'0x0001'", &[("0x0001", &[("u(64)", "parity", "LDPC(224, 224)")])]));
        raises!(
            LdpcBitCountMismatch,
            doc("'0x0001'", &[("0x0001", &[("u(8)", "x", ""), ("u(16)", "parity", "LDPC(16, 8)")])])
        );
    }

    #[test]
    fn test_payload_placement() {
        raises!(
            DuplicatePayloadField,
            doc("'0x0001'", &[("0x0001", &[("u(8)", "len", ""), ("u(8)", "a", "payload"), ("u(8)", "b", "payload")])])
        );
        raises!(
            PayloadInNestedStruct,
            doc(
                "'0x0001'",
                &[("0x0001", &[("u(8)", "x", "struct{A}")]), ("A", &[("u(8)", "len", ""), ("u(8)", "data", "payload")])]
            )
        );
    }

    #[test]
    fn test_bitfield_windows() {
        raises!(
            MisalignedBitfield,
            doc("'0x0001'", &[("0x0001", &[("u(3)", "a", ""), ("u(8)", "b", "")])])
        );
        raises!(MisalignedBitfield, doc("'0x0001'", &[("0x0001", &[("u(8)", "b", ""), ("u(5)", "a", "")])]));

        let mut wide: Vec<(&str, &str, &str)> = vec![("u(7)", "a", ""); 5];
        wide.push(("u(5)", "b", ""));
        raises!(BitfieldWindowOverflow, doc("'0x0001'", &[("0x0001", &wide)]));
    }

    #[test]
    fn test_bitfield_window_config() {
        let d = doc("'0x0001'", &[("0x0001", &[("u(7)", "a", ""), ("u(7)", "b", ""), ("u(2)", "c", "")])]);
        assert!(analyze(&d, &GeneratorConfig::default(), "test").is_ok());
        let narrow = GeneratorConfig { bitfield_window: 8 };
        assert!(analyze(&d, &narrow, "test").is_err());
    }

    #[test]
    fn test_duplicate_descriptors() {
        raises!(
            DuplicateDescriptorCode,
            doc(
                "'0x0001':'0x0002'",
                &[
                    ("0x0001", &[("u(16)", "a_descriptor", "0x0100")]),
                    ("0x0002", &[("u(8)", "b_descriptor", "0x01")]),
                ]
            )
        );
        raises!(
            DuplicateDescriptorKind,
            doc(
                "'0x0001':'0x0002'",
                &[
                    ("0x0001", &[("u(16)", "a_descriptor", "0x0001")]),
                    ("0x0002", &[("u(16)", "a_descriptor", "0x0002")]),
                ]
            )
        );
    }

    #[test]
    fn test_duplicate_enum_members() {
        let base = doc("'0x0001'", &[("0x0001", &[("u(8)", "mode", "enum{Mode}")])]);
        raises!(DuplicateEnumValue, with_enum(base.clone(), "Mode", &[("A", "0x1"), ("B", "0x1")]));
        raises!(DuplicateEnumMember, with_enum(base.clone(), "Mode", &[("A", "0x1"), ("a", "0x2")]));
        raises!(DuplicateEnumMember, with_enum(base.clone(), "Mode", &[("UNKNOWN", "0x1")]));
        raises!(MalformedEnumMember, with_enum(base, "Mode", &[("A", "one")]));
    }

    #[test]
    fn test_duplicate_type_identifier() {
        raises!(
            DuplicateTypeIdentifier,
            with_enum(
                doc("'0x0001'", &[("0x0001", &[("u(16)", "mode_descriptor", "0x1"), ("u(8)", "m", "enum{Mode}")])]),
                "Mode",
                &[("A", "0x1")]
            )
        );
    }
}
