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

//! Resolved packet model.
//!
//! The model is produced by [`crate::analyzer::analyze`] and consumed
//! read-only by the backends.

use codespan_reporting::files;
use serde::Serialize;
use std::collections::BTreeSet;

/// File identifier.
/// References a source file in the source database.
pub type FileId = usize;

/// Source database.
/// Stores the source file contents for reference.
pub type SourceDatabase = files::SimpleFiles<String, String>;

/// Bit set on 8-bit descriptor codes to distinguish them from 16-bit
/// codes sharing the same upper byte.
pub const FLAG_LSB_BITMASK: u32 = 1 << 31;

/// Element repetition of a field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Repeat {
    #[default]
    None,
    /// Fixed number of elements.
    Constant(usize),
    /// Number of elements held by an earlier sibling field, by index.
    FieldRef(usize),
}

/// LDPC (code_bits, message_bits) parity marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ldpc {
    pub code_bits: usize,
    pub message_bits: usize,
}

impl Ldpc {
    pub fn parity_bits(&self) -> usize {
        self.code_bits - self.message_bits
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDesc {
    /// Byte aligned integer of 8, 16, 32 or 64 bits.
    Scalar { signed: bool },
    /// Unsigned value narrower than a byte, packed in a bit window.
    Bitfield,
    /// Pair of signed 32-bit integers.
    Rational,
    /// Opaque byte array of `width / 8` bytes.
    Bytes,
    /// Zero padded string of `capacity` bytes.
    String { capacity: usize },
    /// Inlined structure.
    Struct { type_id: String },
    /// Symbolic enumeration, encoded as an integer of the field width.
    Enum { type_id: String },
    /// Packet descriptor code.
    Descriptor,
    /// Zero filled bytes, skipped on decode.
    Padding,
    /// Parity bits protecting the preceding message bits.
    Parity(Ldpc),
    /// Variable length data following the header.
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Unique field name within its structure, in snake case.
    pub id: String,
    pub desc: FieldDesc,
    /// Declared element width in bits.
    pub width: usize,
    pub repeat: Repeat,
    /// Constant wire value. Narrow descriptor values are stored
    /// shifted left by 8 bits.
    pub fixed: Option<u64>,
    /// Sequence numbers are held as `u64` regardless of their wire width.
    pub seq: bool,
}

impl Field {
    /// Number of bits occupied on the wire, `None` when only known at
    /// runtime.
    pub fn wire_bits(&self) -> Option<usize> {
        match (&self.desc, self.repeat) {
            (FieldDesc::Payload, _) | (_, Repeat::FieldRef(_)) => None,
            (FieldDesc::Parity(ldpc), _) => Some(ldpc.parity_bits()),
            (_, Repeat::Constant(count)) => Some(self.width * count),
            (_, Repeat::None) => Some(self.width),
        }
    }

    /// Whether the field is packed with its neighbours in a bit window.
    pub fn is_packed(&self) -> bool {
        self.width < 8 && matches!(self.desc, FieldDesc::Bitfield | FieldDesc::Enum { .. })
    }

    /// Whether the field is held in the generated structure.
    pub fn is_stored(&self) -> bool {
        self.fixed.is_none()
            && !matches!(self.desc, FieldDesc::Padding | FieldDesc::Parity(_) | FieldDesc::Payload)
    }
}

/// Role of a structure in the packet family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructRole {
    /// Packet listed in the descriptor table.
    Packet,
    /// Generic layout shared by a family of descriptor codes.
    Template,
    /// Structure only reachable as a field of another structure.
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Struct {
    /// Identifier of the structure in the document.
    pub key: String,
    /// Generated type name.
    pub id: String,
    /// Descriptor kind name, in snake case.
    pub kind: String,
    pub role: StructRole,
    pub fields: Vec<Field>,
    /// Total of the fixed wire sizes of the fields, payload and nested
    /// structures excluded.
    pub size_bits: usize,
    /// Descriptor code registered for this structure.
    pub descriptor: Option<u32>,
}

impl Struct {
    pub fn header_size(&self) -> usize {
        self.size_bits / 8
    }

    /// The field carrying the packet descriptor.
    pub fn descriptor_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| matches!(f.desc, FieldDesc::Descriptor))
    }

    /// The field carrying the sequence number.
    pub fn seq_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.seq && f.is_stored())
    }

    pub fn payload_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| matches!(f.desc, FieldDesc::Payload))
    }

    /// Stored fields in declaration order, with the descriptor and
    /// sequence number hoisted first.
    pub fn stored_fields(&self) -> Vec<&Field> {
        let descriptor = self.descriptor_field().filter(|f| f.is_stored());
        let seq = self.seq_field();
        let mut fields: Vec<&Field> = descriptor.into_iter().chain(seq).collect();
        for field in &self.fields {
            if field.is_stored() && !fields.iter().any(|f| std::ptr::eq(*f, field)) {
                fields.push(field);
            }
        }
        fields
    }
}

/// Descriptor code sharing the layout of a template structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplatedStruct {
    /// Descriptor kind name, in snake case.
    pub kind: String,
    pub descriptor: u32,
    /// Type name of the template structure.
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumMember {
    pub id: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enum {
    /// Identifier of the enumeration in the document.
    pub key: String,
    /// Generated type name.
    pub id: String,
    pub members: Vec<EnumMember>,
}

/// Association of descriptor kind names to descriptor codes, in
/// registration order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorTable {
    entries: Vec<(String, u32)>,
}

impl DescriptorTable {
    pub fn insert(&mut self, kind: &str, code: u32) {
        match self.entries.iter_mut().find(|(name, _)| name == kind) {
            Some(entry) => entry.1 = code,
            None => self.entries.push((kind.to_owned(), code)),
        }
    }

    pub fn get(&self, kind: &str) -> Option<u32> {
        self.entries.iter().find(|(name, _)| name == kind).map(|(_, code)| *code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, code)| (name.as_str(), *code))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolved packet family.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct File {
    /// Name of the input document.
    pub source: String,
    /// Enumerations, in order of first reference.
    pub enums: Vec<Enum>,
    /// Structures, nested structures before the structures using them.
    pub structs: Vec<Struct>,
    pub templated: Vec<TemplatedStruct>,
    pub descriptors: DescriptorTable,
    /// Type names of the structures used as fields.
    pub substructs: BTreeSet<String>,
}

impl File {
    pub fn get_struct(&self, id: &str) -> Option<&Struct> {
        self.structs.iter().find(|s| s.id == id)
    }

    pub fn get_enum(&self, id: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.id == id)
    }

    /// Structures decoded from the start of a packet buffer.
    pub fn toplevel_structs(&self) -> impl Iterator<Item = &Struct> {
        self.structs.iter().filter(|s| !self.substructs.contains(&s.id))
    }

    /// Header size in bytes of the packet identified by `code`, flag
    /// ignored.
    pub fn header_size(&self, code: u32) -> Option<usize> {
        let code = code & !FLAG_LSB_BITMASK;
        let packet = self
            .toplevel_structs()
            .filter(|s| s.role == StructRole::Packet)
            .find(|s| s.descriptor.map(|d| d & !FLAG_LSB_BITMASK) == Some(code));
        if let Some(packet) = packet {
            return Some(packet.header_size());
        }
        self.templated
            .iter()
            .find(|t| t.descriptor == code)
            .and_then(|t| self.get_struct(&t.template_id))
            .map(Struct::header_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, desc: FieldDesc, width: usize) -> Field {
        Field { id: id.to_owned(), desc, width, repeat: Repeat::None, fixed: None, seq: false }
    }

    #[test]
    fn wire_bits() {
        let mut f = field("a", FieldDesc::Scalar { signed: false }, 16);
        assert_eq!(f.wire_bits(), Some(16));
        f.repeat = Repeat::Constant(4);
        assert_eq!(f.wire_bits(), Some(64));
        f.repeat = Repeat::FieldRef(0);
        assert_eq!(f.wire_bits(), None);
        let p = field("p", FieldDesc::Parity(Ldpc { code_bits: 288, message_bits: 224 }), 64);
        assert_eq!(p.wire_bits(), Some(64));
    }

    #[test]
    fn stored_fields_are_hoisted() {
        let mut seq = field("global_seq", FieldDesc::Scalar { signed: false }, 32);
        seq.seq = true;
        let s = Struct {
            key: "0x0100".to_owned(),
            id: "Foo".to_owned(),
            kind: "foo".to_owned(),
            role: StructRole::Packet,
            fields: vec![
                field("a", FieldDesc::Scalar { signed: false }, 8),
                seq,
                field("foo_descriptor", FieldDesc::Descriptor, 16),
                field("padding", FieldDesc::Padding, 8),
            ],
            size_bits: 64,
            descriptor: None,
        };
        let ids: Vec<_> = s.stored_fields().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["foo_descriptor", "global_seq", "a"]);
    }

    #[test]
    fn descriptor_table_keeps_order() {
        let mut table = DescriptorTable::default();
        table.insert("b", 2);
        table.insert("a", 1);
        table.insert("b", 3);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("b", 3), ("a", 1)]);
        assert_eq!(table.get("a"), Some(1));
        assert_eq!(table.len(), 2);
    }
}
