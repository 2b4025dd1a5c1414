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

//! The `dis` command: stream, annotate and remember where to continue.

use crate::address_space::AddressSpace;
use crate::annotate::{Annotator, Line};
use crate::capstone::{Decoder, ProcessorMode};
use crate::session::Session;
use crate::stream::{InstructionStream, StreamOptions};
use crate::symbols::Resolver;
use log::debug;

pub const DEFAULT_LENGTH: usize = 50;

#[derive(Debug, Clone)]
pub struct DisassembleOptions {
    /// Start address. `None` continues where the previous run in this session stopped.
    pub offset: Option<u64>,
    /// Number of instructions (lines) to disassemble.
    pub length: Option<usize>,
    /// Last address to disassemble.
    pub end: Option<u64>,
    /// Processor mode; taken from the session architecture when unset.
    pub mode: Option<ProcessorMode>,
    pub suppress_headers: bool,
}

impl Default for DisassembleOptions {
    fn default() -> Self {
        Self {
            offset: None,
            length: Some(DEFAULT_LENGTH),
            end: None,
            mode: None,
            suppress_headers: false,
        }
    }
}

impl DisassembleOptions {
    pub fn mode(&self, session: &Session) -> ProcessorMode {
        self.mode
            .unwrap_or_else(|| ProcessorMode::from_arch(session.arch()))
    }
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub lines: Vec<Line>,
    pub next_offset: u64,
}

impl Listing {
    pub fn rows(&self) -> impl Iterator<Item = &crate::annotate::AnnotatedRow> {
        self.lines.iter().filter_map(|l| match l {
            Line::Row(r) => Some(r),
            Line::Header(_) => None,
        })
    }
}

pub struct Disassembly<'a> {
    space: &'a dyn AddressSpace,
    decoder: &'a dyn Decoder,
    resolver: &'a dyn Resolver,
}

impl<'a> Disassembly<'a> {
    pub fn new(
        space: &'a dyn AddressSpace,
        decoder: &'a dyn Decoder,
        resolver: &'a dyn Resolver,
    ) -> Self {
        Self {
            space,
            decoder,
            resolver,
        }
    }

    /// Disassemble, handing each line to `emit` as it is produced.
    /// Returns the address after the last instruction, which also becomes the
    /// session's resume point.
    pub fn run_into(
        &self,
        session: &mut Session,
        opts: &DisassembleOptions,
        mut emit: impl FnMut(Line),
    ) -> u64 {
        let start = opts
            .offset
            .or(session.resume.next_offset)
            .unwrap_or(0);
        debug!(
            "Disassembling {} from 0x{:x} (length {:?}, end {:?})",
            self.space.name(),
            start,
            opts.length,
            opts.end
        );

        let mut stream = InstructionStream::new(
            self.space,
            self.decoder,
            StreamOptions {
                start,
                buffer_size: session.buffer_size(),
                length: opts.length,
                end: opts.end,
            },
        );
        let annotator = Annotator::new(
            self.resolver,
            self.space,
            self.decoder.mode().pointer_width(),
        );
        for line in annotator.annotate(stream.by_ref()) {
            if opts.suppress_headers && matches!(line, Line::Header(_)) {
                continue;
            }
            emit(line);
        }

        let next_offset = stream.next_offset();
        session.resume.next_offset = Some(next_offset);
        next_offset
    }

    pub fn run(&self, session: &mut Session, opts: &DisassembleOptions) -> Listing {
        let mut lines = Vec::new();
        let next_offset = self.run_into(session, opts, |l| lines.push(l));
        Listing { lines, next_offset }
    }
}
