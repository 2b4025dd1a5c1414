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

//! Lazy instruction stream over an address space.
//!
//! Memory is fetched `buffer_size` bytes at a time and decoded. Near the end
//! of a full buffer an instruction may be cut short, so decoding of a full
//! buffer stops `max_instruction_length` bytes before its end and the next
//! fetch starts right after the last instruction kept. A short buffer means
//! no more data follows and is decoded to the end.

use crate::address_space::AddressSpace;
use crate::capstone::{DecodedInstruction, Decoder};
use log::trace;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub start: u64,
    pub buffer_size: usize,
    /// Maximum number of instructions to yield.
    pub length: Option<usize>,
    /// No instruction starting above this address is yielded.
    pub end: Option<u64>,
}

pub struct InstructionStream<'a> {
    space: &'a dyn AddressSpace,
    decoder: &'a dyn Decoder,
    opts: StreamOptions,
    cursor: u64,
    pending: VecDeque<DecodedInstruction>,
    yielded: usize,
    next_offset: u64,
    done: bool,
}

impl<'a> InstructionStream<'a> {
    pub fn new(space: &'a dyn AddressSpace, decoder: &'a dyn Decoder, opts: StreamOptions) -> Self {
        Self {
            space,
            decoder,
            opts,
            cursor: opts.start,
            pending: VecDeque::new(),
            yielded: 0,
            next_offset: opts.start,
            done: false,
        }
    }

    /// Address following the last yielded instruction (the start if none was yielded).
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Fetch and decode the next buffer. Returns false when nothing more can be decoded.
    fn refill(&mut self) -> bool {
        // A full buffer must hold at least one whole instruction before its seam margin
        let buffer_size = self
            .opts
            .buffer_size
            .max(2 * self.decoder.max_instruction_length())
            .max(1);
        let data = self.space.read(self.cursor, buffer_size as u64);
        if data.is_empty() {
            trace!("No data at 0x{:x}, stream ends", self.cursor);
            return false;
        }

        let full = data.len() >= buffer_size;
        let limit = if full {
            data.len().saturating_sub(self.decoder.max_instruction_length())
        } else {
            data.len()
        };
        let buf_end = self.cursor.saturating_add(data.len() as u64);

        let mut taken = 0usize;
        let mut resume_at = self.cursor;
        for insn in self.decoder.decode(&data, self.cursor) {
            let rel = insn.offset.wrapping_sub(self.cursor) as usize;
            // Always keep one instruction so tiny buffers still make progress
            if taken > 0 && rel >= limit {
                break;
            }
            if insn.length == 0 || insn.end() > buf_end {
                break;
            }
            resume_at = insn.end();
            self.pending.push_back(insn);
            taken += 1;
        }
        trace!(
            "Decoded {} instructions from {} bytes at 0x{:x}",
            taken,
            data.len(),
            self.cursor
        );

        if taken == 0 || resume_at <= self.cursor {
            return false;
        }
        self.cursor = resume_at;
        true
    }
}

impl Iterator for InstructionStream<'_> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.opts.length.is_some_and(|n| self.yielded >= n) {
            self.done = true;
            return None;
        }
        if self.pending.is_empty() && !self.refill() {
            self.done = true;
            return None;
        }
        let insn = self.pending.pop_front()?;
        if self.opts.end.is_some_and(|end| insn.offset > end) {
            self.done = true;
            return None;
        }
        self.yielded += 1;
        self.next_offset = insn.end();
        Some(insn)
    }
}
