// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Symbol-aware annotation of a decoded instruction stream.
//!
//! Inserts a header whenever the enclosing function changes, charts each
//! instruction relative to the current function and resolves direct and
//! indirect operands to symbol names.

use crate::address_space::AddressSpace;
use crate::capstone::DecodedInstruction;
use crate::symbols::Resolver;
use regex::Regex;
use std::sync::LazyLock;

/// Past this distance a symbol is too far away to describe an address.
pub const NEAR_SYMBOL_LIMIT: u64 = 0x1000;

static DIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+$").expect("valid operand regex"));
static INDIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(0x[0-9a-fA-F]+)\]").expect("valid operand regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedRow {
    pub address: u64,
    /// Hex distance from the current function start, when close enough to mean something.
    pub relative_offset: Option<String>,
    pub hexdump: String,
    pub instruction: String,
    pub comment: String,
}

/// One output line: either a function header or an instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Header(String),
    Row(AnnotatedRow),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FunctionBoundaryState {
    pub last_function_start: u64,
    pub last_function_name: String,
}

pub struct Annotator<'a> {
    resolver: &'a dyn Resolver,
    space: &'a dyn AddressSpace,
    pointer_width: usize,
    state: FunctionBoundaryState,
}

impl<'a> Annotator<'a> {
    pub fn new(resolver: &'a dyn Resolver, space: &'a dyn AddressSpace, pointer_width: usize) -> Self {
        Self {
            resolver,
            space,
            pointer_width,
            state: FunctionBoundaryState::default(),
        }
    }

    pub fn state(&self) -> &FunctionBoundaryState {
        &self.state
    }

    /// `name` at the symbol itself, `name+0xOFF` shortly after it, otherwise empty.
    pub fn format_symbol_ref(&self, address: u64) -> String {
        match self.resolver.nearest_symbol(address) {
            Some((base, name)) if !name.is_empty() && address >= base => {
                let difference = address - base;
                if difference == 0 {
                    name
                } else if difference < NEAR_SYMBOL_LIMIT {
                    format!("{}+0x{:X}", name, difference)
                } else {
                    String::new()
                }
            }
            _ => String::new(),
        }
    }

    /// Comment for a memory operand: the pointer it holds and where both ends resolve.
    fn format_indirect(&self, operand: u64) -> String {
        // An unreadable pointer reads as null, so the operand is still named
        let target = self
            .space
            .read_pointer(operand, self.pointer_width)
            .unwrap_or(0);
        let target_name = self.format_symbol_ref(target);
        let operand_name = self.format_symbol_ref(operand);
        if target_name.is_empty() {
            format!("0x{:X} {}", target, operand_name).trim_end().to_string()
        } else {
            format!("0x{:X} {} -> {}", target, operand_name, target_name)
        }
    }

    fn comment(&self, text: &str) -> String {
        if let Some(m) = INDIRECT_RE.captures(text).and_then(|c| c.get(1)) {
            return parse_hex(m.as_str())
                .map(|operand| self.format_indirect(operand))
                .unwrap_or_default();
        }
        if let Some(m) = DIRECT_RE.find(text) {
            return parse_hex(m.as_str())
                .map(|operand| self.format_symbol_ref(operand))
                .unwrap_or_default();
        }
        String::new()
    }

    /// Annotate one instruction, returning a header first when a new function begins.
    pub fn annotate_one(&mut self, insn: DecodedInstruction) -> (Option<String>, AnnotatedRow) {
        let mut header = None;
        if let Some((base, name)) = self.resolver.nearest_symbol(insn.offset) {
            if !name.is_empty() && name != self.state.last_function_name {
                header = Some(name.clone());
                self.state = FunctionBoundaryState {
                    last_function_start: base,
                    last_function_name: name,
                };
            }
        }

        let relative_offset = insn
            .offset
            .checked_sub(self.state.last_function_start)
            .filter(|d| *d < NEAR_SYMBOL_LIMIT)
            .map(|d| format!("{:X}", d));

        let comment = self.comment(&insn.text);
        let row = AnnotatedRow {
            address: insn.offset,
            relative_offset,
            hexdump: insn.hexdump,
            instruction: insn.text,
            comment,
        };
        (header, row)
    }

    /// Lazily annotate a stream, preserving its order.
    pub fn annotate<I>(self, instructions: I) -> Annotated<'a, I::IntoIter>
    where
        I: IntoIterator<Item = DecodedInstruction>,
    {
        Annotated {
            annotator: self,
            inner: instructions.into_iter(),
            pending_row: None,
        }
    }
}

fn parse_hex(literal: &str) -> Option<u64> {
    let digits = literal.strip_prefix("0x").unwrap_or(literal);
    u64::from_str_radix(digits, 16).ok()
}

pub struct Annotated<'a, I> {
    annotator: Annotator<'a>,
    inner: I,
    pending_row: Option<AnnotatedRow>,
}

impl<I: Iterator<Item = DecodedInstruction>> Iterator for Annotated<'_, I> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        if let Some(row) = self.pending_row.take() {
            return Some(Line::Row(row));
        }
        let insn = self.inner.next()?;
        match self.annotator.annotate_one(insn) {
            (Some(header), row) => {
                self.pending_row = Some(row);
                Some(Line::Header(header))
            }
            (None, row) => Some(Line::Row(row)),
        }
    }
}
