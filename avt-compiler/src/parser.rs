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

//! Grammar of the individual table cells of a packet document.
//!
//! Cells are parsed independently; errors are reported as plain strings
//! and attached to the offending row by the analyzer.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use std::iter::{Filter, Peekable};

#[derive(pest_derive::Parser)]
#[grammar_inline = r##"
WHITESPACE = _{ " " | "\n" | "\r" | "\t" }

integer = @{ ("0x" | "0X") ~ ASCII_HEX_DIGIT+ | ASCII_DIGIT+ }
intvalue = @{ ASCII_DIGIT+ }
identifier = @{ (ASCII_ALPHA | "_") ~ (ASCII_ALPHANUMERIC | "_")* }
struct_key = @{ (ASCII_ALPHANUMERIC | "_" | "-")+ }
anchor = @{ "#" ~ (ASCII_ALPHANUMERIC | "-" | "_")+ }

field_ref = { "[=" ~ identifier ~ "=]" }
multiplier = { (intvalue | field_ref) ~ "*" }
kind = { "u" | "i" | "b" | "R" }
type_cell = { SOI ~ "'"? ~ multiplier? ~ kind ~ "(" ~ intvalue ~ ")" ~ "'"? ~ EOI }

name_cell = { SOI ~ "'"? ~ (field_ref | identifier) ~ "'"? ~ EOI }

code_value = { "["? ~ "'"? ~ "[="? ~ integer ~ "=]"? ~ "'"? ~ "]"? }
code_cell = { SOI ~ code_value ~ EOI }
code_range_cell = { SOI ~ code_value ~ (":" ~ code_value)? ~ EOI }
anchor_cell = { SOI ~ "[["? ~ anchor ~ "]]"? ~ EOI }

ldpc_marker = { "LDPC" ~ "(" ~ intvalue ~ "," ~ intvalue ~ ")" }
enum_marker = { "enum" ~ "{"? ~ struct_key ~ "}"? }
struct_link = { "[[" ~ anchor ~ "|" ~ struct_key ~ "]]" }
struct_marker = { "struct" ~ "{"? ~ (struct_link | struct_key) ~ "}"? }
template_marker = { "[[" ~ anchor ~ "]]" }
payload_marker = { ^"payload" }
fixed_marker = { "[="? ~ integer ~ "=]"? }
string_marker = @{ (!"string" ~ ANY)* ~ "string" ~ ANY* }
marker_cell = {
    SOI ~ "'"? ~
    (ldpc_marker | enum_marker | struct_marker | template_marker | payload_marker |
     fixed_marker | string_marker)? ~
    "'"? ~ EOI
}
"##]
pub struct CellParser;

type Node<'i> = Pair<'i, Rule>;
type NodeIterator<'i> = Peekable<Filter<Pairs<'i, Rule>, fn(&Node<'i>) -> bool>>;

/// Element count prefix of a type cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Multiplier {
    Count(usize),
    /// Name of the sibling field holding the element count.
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Unsigned,
    Signed,
    Bits,
    Rational,
}

/// Parsed `[N*|[=name=]*]kind(width)` type cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCell {
    pub multiplier: Option<Multiplier>,
    pub kind: TypeKind,
    pub width: usize,
}

/// Parsed value cell of a field row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    None,
    Fixed(u64),
    Payload,
    String,
    Ldpc { code_bits: usize, message_bits: usize },
    Enum(String),
    Struct(String),
    /// Reference to a generic template, by anchor.
    Template(String),
}

trait Helpers<'i> {
    fn children(self) -> NodeIterator<'i>;
    fn as_string(&self) -> String;
    fn as_u64(&self) -> Result<u64, String>;
    fn as_usize(&self) -> Result<usize, String>;
}

impl<'i> Helpers<'i> for Node<'i> {
    fn children(self) -> NodeIterator<'i> {
        self.into_inner().filter((|n| n.as_rule() != Rule::EOI) as fn(&Self) -> bool).peekable()
    }

    fn as_string(&self) -> String {
        self.as_str().to_owned()
    }

    fn as_u64(&self) -> Result<u64, String> {
        let text = self.as_str();
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(num) => u64::from_str_radix(num, 16),
            None => text.parse::<u64>(),
        }
        .map_err(|_| format!("cannot convert '{}' to an integer", text))
    }

    fn as_usize(&self) -> Result<usize, String> {
        let value = self.as_u64()?;
        usize::try_from(value).map_err(|_| format!("'{}' is too large", self.as_str()))
    }
}

fn err_unexpected_rule<T>(expected: Rule, found: Rule) -> Result<T, String> {
    Err(format!("expected rule {:?}, got {:?}", expected, found))
}

fn err_missing_rule<T>(expected: Rule) -> Result<T, String> {
    Err(format!("expected rule {:?}, got nothing", expected))
}

fn expect<'i>(iter: &mut impl Iterator<Item = Node<'i>>, rule: Rule) -> Result<Node<'i>, String> {
    match iter.next() {
        Some(node) if node.as_rule() == rule => Ok(node),
        Some(node) => err_unexpected_rule(rule, node.as_rule()),
        None => err_missing_rule(rule),
    }
}

fn maybe<'i>(iter: &mut NodeIterator<'i>, rule: Rule) -> Option<Node<'i>> {
    iter.next_if(|n| n.as_rule() == rule)
}

fn parse_cell(rule: Rule, text: &str) -> Result<NodeIterator<'_>, String> {
    let mut pairs = CellParser::parse(rule, text.trim())
        .map_err(|err| format!("malformed cell '{}': {}", text, err.variant.message()))?;
    match pairs.next() {
        Some(root) => Ok(root.children()),
        None => err_missing_rule(rule),
    }
}

fn parse_field_ref(node: Node<'_>) -> Result<String, String> {
    expect(&mut node.children(), Rule::identifier).map(|n| n.as_string())
}

fn parse_code_value(node: Node<'_>) -> Result<u64, String> {
    expect(&mut node.children(), Rule::integer)?.as_u64()
}

/// Parse the type cell of a field row, e.g. `u(16)`, `4*u(8)` or
/// `[=len=]*u(8)`.
pub fn parse_type_cell(text: &str) -> Result<TypeCell, String> {
    let mut children = parse_cell(Rule::type_cell, text)?;
    let multiplier = match maybe(&mut children, Rule::multiplier) {
        Some(node) => {
            let count = node.children().next().ok_or("empty multiplier")?;
            Some(match count.as_rule() {
                Rule::intvalue => Multiplier::Count(count.as_usize()?),
                Rule::field_ref => Multiplier::Field(parse_field_ref(count)?),
                rule => return err_unexpected_rule(Rule::intvalue, rule),
            })
        }
        None => None,
    };
    let kind = match expect(&mut children, Rule::kind)?.as_str() {
        "u" => TypeKind::Unsigned,
        "i" => TypeKind::Signed,
        "b" => TypeKind::Bits,
        _ => TypeKind::Rational,
    };
    let width = expect(&mut children, Rule::intvalue)?.as_usize()?;
    Ok(TypeCell { multiplier, kind, width })
}

/// Parse the name cell of a field row, e.g. `global_seq` or `[=global_seq=]`.
pub fn parse_name_cell(text: &str) -> Result<String, String> {
    let mut children = parse_cell(Rule::name_cell, text)?;
    match children.next() {
        Some(node) if node.as_rule() == Rule::field_ref => parse_field_ref(node),
        Some(node) if node.as_rule() == Rule::identifier => Ok(node.as_string()),
        Some(node) => err_unexpected_rule(Rule::identifier, node.as_rule()),
        None => err_missing_rule(Rule::identifier),
    }
}

/// Parse the value cell of a field row.
pub fn parse_marker_cell(text: &str) -> Result<Marker, String> {
    let mut children = parse_cell(Rule::marker_cell, text)?;
    let Some(node) = children.next() else {
        return Ok(Marker::None);
    };
    let rule = node.as_rule();
    let mut inner = node.children();
    match rule {
        Rule::fixed_marker => Ok(Marker::Fixed(expect(&mut inner, Rule::integer)?.as_u64()?)),
        Rule::payload_marker => Ok(Marker::Payload),
        Rule::string_marker => Ok(Marker::String),
        Rule::ldpc_marker => {
            let code_bits = expect(&mut inner, Rule::intvalue)?.as_usize()?;
            let message_bits = expect(&mut inner, Rule::intvalue)?.as_usize()?;
            Ok(Marker::Ldpc { code_bits, message_bits })
        }
        Rule::enum_marker => Ok(Marker::Enum(expect(&mut inner, Rule::struct_key)?.as_string())),
        Rule::struct_marker => match inner.next() {
            Some(link) if link.as_rule() == Rule::struct_link => {
                let mut link = link.children();
                expect(&mut link, Rule::anchor)?;
                Ok(Marker::Struct(expect(&mut link, Rule::struct_key)?.as_string()))
            }
            Some(key) if key.as_rule() == Rule::struct_key => Ok(Marker::Struct(key.as_string())),
            Some(node) => err_unexpected_rule(Rule::struct_key, node.as_rule()),
            None => err_missing_rule(Rule::struct_key),
        },
        Rule::template_marker => Ok(Marker::Template(expect(&mut inner, Rule::anchor)?.as_string())),
        rule => err_unexpected_rule(Rule::marker_cell, rule),
    }
}

/// Parse a single code cell, e.g. `'0x0110'`.
pub fn parse_code_cell(text: &str) -> Result<u64, String> {
    parse_code_value(expect(&mut parse_cell(Rule::code_cell, text)?, Rule::code_value)?)
}

/// Parse a descriptor range cell, e.g. `'0x0100':'0x01FF'` or `'0x4242'`.
/// Single codes yield a range of one element.
pub fn parse_code_range_cell(text: &str) -> Result<(u64, u64), String> {
    let mut children = parse_cell(Rule::code_range_cell, text)?;
    let start = parse_code_value(expect(&mut children, Rule::code_value)?)?;
    let end = match maybe(&mut children, Rule::code_value) {
        Some(node) => parse_code_value(node)?,
        None => start,
    };
    Ok((start, end))
}

/// Parse an anchor cell, e.g. `[[#generic-data-packets]]`, keeping the
/// leading `#`.
pub fn parse_anchor_cell(text: &str) -> Result<String, String> {
    expect(&mut parse_cell(Rule::anchor_cell, text)?, Rule::anchor).map(|n| n.as_string())
}
