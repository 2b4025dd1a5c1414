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

use capstone::prelude::*;
use std::fmt::Write;
use std::str::FromStr;

/// Processor mode used for decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    Bits32,
    Bits64,
}

impl ProcessorMode {
    /// Profile architecture "I386" is 32-bit; every other profile decodes as 64-bit.
    pub fn from_arch(arch: &str) -> Self {
        if arch == "I386" {
            ProcessorMode::Bits32
        } else {
            ProcessorMode::Bits64
        }
    }

    pub fn pointer_width(&self) -> usize {
        match self {
            ProcessorMode::Bits32 => 4,
            ProcessorMode::Bits64 => 8,
        }
    }
}

impl FromStr for ProcessorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i386" | "x86" | "32" | "32bit" => Ok(ProcessorMode::Bits32),
            "amd64" | "x64" | "x86_64" | "64" | "64bit" => Ok(ProcessorMode::Bits64),
            _ => Err(format!("unknown processor mode {:?}", s)),
        }
    }
}

/// One decoded instruction. `hexdump` is the encoded bytes as lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: u64,
    pub length: u32,
    pub hexdump: String,
    pub text: String,
}

impl DecodedInstruction {
    pub fn new(offset: u64, bytes: &[u8], text: String) -> Self {
        Self {
            offset,
            length: bytes.len() as u32,
            hexdump: hexdump(bytes),
            text,
        }
    }

    /// Address of the byte following this instruction.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length as u64)
    }
}

pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// The instruction decoding primitive.
pub trait Decoder {
    /// Decode `code` as if it were loaded at `address`, covering every byte.
    fn decode(&self, code: &[u8], address: u64) -> Vec<DecodedInstruction>;

    /// Longest possible encoding; bytes closer than this to a buffer end may be truncated.
    fn max_instruction_length(&self) -> usize;

    fn mode(&self) -> ProcessorMode;
}

pub struct CapstoneDecoder {
    cs: Capstone,
    mode: ProcessorMode,
}

impl CapstoneDecoder {
    pub fn new(mode: ProcessorMode) -> Result<Self, capstone::Error> {
        let arch_mode = match mode {
            ProcessorMode::Bits32 => arch::x86::ArchMode::Mode32,
            ProcessorMode::Bits64 => arch::x86::ArchMode::Mode64,
        };
        let cs = Capstone::new()
            .x86()
            .mode(arch_mode)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(false)
            .build()?;

        Ok(Self { cs, mode })
    }
}

impl Decoder for CapstoneDecoder {
    fn decode(&self, code: &[u8], address: u64) -> Vec<DecodedInstruction> {
        let mut results = Vec::new();
        let mut pos = 0usize;
        while pos < code.len() {
            let base = address.wrapping_add(pos as u64);
            let before = pos;
            // disasm_all stops at the first byte it cannot decode
            if let Ok(insns) = self.cs.disasm_all(&code[pos..], base) {
                for i in insns.iter() {
                    let mnemonic = i.mnemonic().unwrap_or("");
                    let text = match i.op_str() {
                        Some(ops) if !ops.is_empty() => format!("{} {}", mnemonic, ops),
                        _ => mnemonic.to_string(),
                    };
                    pos += i.bytes().len();
                    results.push(DecodedInstruction::new(i.address(), i.bytes(), text));
                }
            }
            if pos == before {
                let byte = code[pos];
                results.push(DecodedInstruction::new(
                    base,
                    &code[pos..pos + 1],
                    format!("db 0x{:02x}", byte),
                ));
                pos += 1;
            }
        }
        results
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn mode(&self) -> ProcessorMode {
        self.mode
    }
}
