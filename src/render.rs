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

use crate::annotate::{AnnotatedRow, Line};
use crate::capstone::ProcessorMode;
use serde_json::{json, Value};
use std::io::{self, Write};

/// Plain-text table writer for disassembly lines.
pub struct TextRenderer<W: Write> {
    out: W,
    addr_width: usize,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W, mode: ProcessorMode) -> Self {
        Self {
            out,
            addr_width: mode.pointer_width() * 2,
        }
    }

    pub fn table_header(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "{:<w$} {:>4} {:<20} {:<30} {}",
            "Address",
            "Rel",
            "Op Codes",
            "Instruction",
            "Comment",
            w = self.addr_width + 2
        )?;
        writeln!(
            self.out,
            "{} {} {} {} {}",
            "-".repeat(self.addr_width + 2),
            "-".repeat(4),
            "-".repeat(20),
            "-".repeat(30),
            "-".repeat(7)
        )
    }

    pub fn line(&mut self, line: &Line) -> io::Result<()> {
        match line {
            Line::Header(name) => writeln!(self.out, "------ {} ------", name),
            Line::Row(row) => self.row(row),
        }
    }

    fn row(&mut self, row: &AnnotatedRow) -> io::Result<()> {
        let text = format!(
            "0x{:0w$x} {:>4} {:<20} {:<30} {}",
            row.address,
            row.relative_offset.as_deref().unwrap_or(""),
            row.hexdump,
            row.instruction,
            row.comment,
            w = self.addr_width
        );
        writeln!(self.out, "{}", text.trim_end())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Serialize lines into a compact JSON message.
/// Format:
/// {
///   "t": "disasm",
///   "next": "0x...",
///   "rows": [ [addr_hex, rel, bytes, instr, comment] | {"function": name}, ... ]
/// }
pub fn serialize_compact_lines(lines: &[Line], next_offset: u64) -> Value {
    let rows: Vec<Value> = lines
        .iter()
        .map(|line| match line {
            Line::Header(name) => json!({ "function": name }),
            Line::Row(row) => json!([
                format!("0x{:x}", row.address),
                row.relative_offset.clone().unwrap_or_default(),
                row.hexdump,
                row.instruction,
                row.comment,
            ]),
        })
        .collect();

    json!({
        "t": "disasm",
        "next": format!("0x{:x}", next_offset),
        "rows": Value::Array(rows),
    })
}
