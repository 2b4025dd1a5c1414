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

//! The address space contract every memory provider implements.
//!
//! Reads are fail-soft: a provider that cannot satisfy a read returns fewer
//! bytes (possibly none) instead of an error, so a scan across sparse memory
//! degrades to "no data" rather than aborting.

use serde_json::{json, Value};

/// Inclusive bounds of an addressable window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    pub min_addr: u64,
    pub max_addr: u64,
}

impl MemoryWindow {
    /// Returns `None` when `min_addr > max_addr`.
    pub fn new(min_addr: u64, max_addr: u64) -> Option<Self> {
        if min_addr <= max_addr {
            Some(Self { min_addr, max_addr })
        } else {
            None
        }
    }

    /// Window covering `size` bytes starting at `base`. `None` for an empty window.
    pub fn with_size(base: u64, size: u64) -> Option<Self> {
        let last = size.checked_sub(1)?;
        Self::new(base, base.checked_add(last)?)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.min_addr <= addr && addr <= self.max_addr
    }

    pub fn size(&self) -> u64 {
        (self.max_addr - self.min_addr).saturating_add(1)
    }

    /// Intersect with the inclusive range `[low_addr, high_addr]`.
    pub fn clip(&self, low_addr: u64, high_addr: u64) -> Option<MemoryWindow> {
        MemoryWindow::new(self.min_addr.max(low_addr), self.max_addr.min(high_addr))
    }

    pub fn to_json(&self) -> Value {
        json!({
            "min_addr": format!("0x{:x}", self.min_addr),
            "max_addr": format!("0x{:x}", self.max_addr),
            "size": format!("0x{:x}", self.size()),
        })
    }
}

/// How a run of logical addresses maps onto the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
}

impl Run {
    pub fn to_json(&self) -> Value {
        json!({
            "start": format!("0x{:x}", self.start),
            "end": format!("0x{:x}", self.end),
            "file_offset": format!("0x{:x}", self.file_offset),
        })
    }
}

pub trait AddressSpace {
    /// Short name used in logs and flush hook registration.
    fn name(&self) -> &str;

    /// Read up to `size` bytes at `addr`. Never fails; errors yield an empty vector.
    fn read(&self, addr: u64, size: u64) -> Vec<u8>;

    /// Returns false when the backend is read-only.
    fn write(&self, addr: u64, data: &[u8]) -> bool;

    fn is_valid_address(&self, addr: Option<u64>) -> bool;

    /// Contiguous `(start, end)` ranges (inclusive) that hold data.
    fn get_available_addresses(&self) -> Box<dyn Iterator<Item = (u64, u64)> + '_>;

    fn get_mappings(&self, start: u64, end: u64) -> Box<dyn Iterator<Item = Run> + '_>;

    /// State may change underneath between reads (live targets).
    fn is_volatile(&self) -> bool {
        false
    }

    /// Dereference a little-endian pointer of `width` bytes (4 or 8).
    fn read_pointer(&self, addr: u64, width: usize) -> Option<u64> {
        let b = self.read(addr, width as u64);
        match width {
            4 if b.len() >= 4 => Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
            8 if b.len() >= 8 => Some(u64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ])),
            _ => None,
        }
    }
}

/// A local memory image (raw dump or test buffer) mapped at `base`.
pub struct BufferAddressSpace {
    name: String,
    base: u64,
    data: std::cell::RefCell<Vec<u8>>,
}

impl BufferAddressSpace {
    pub fn new(name: impl Into<String>, base: u64, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            base,
            data: std::cell::RefCell::new(data),
        }
    }

    pub fn window(&self) -> Option<MemoryWindow> {
        MemoryWindow::with_size(self.base, self.data.borrow().len() as u64)
    }
}

impl AddressSpace for BufferAddressSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, addr: u64, size: u64) -> Vec<u8> {
        let data = self.data.borrow();
        let Some(start) = addr.checked_sub(self.base) else {
            return Vec::new();
        };
        if start >= data.len() as u64 {
            return Vec::new();
        }
        let start = start as usize;
        let end = start.saturating_add(size.min(usize::MAX as u64) as usize).min(data.len());
        data[start..end].to_vec()
    }

    fn write(&self, addr: u64, bytes: &[u8]) -> bool {
        let mut data = self.data.borrow_mut();
        let Some(start) = addr.checked_sub(self.base) else {
            return false;
        };
        let start = start as usize;
        match start.checked_add(bytes.len()) {
            Some(end) if end <= data.len() => {
                data[start..end].copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    fn is_valid_address(&self, addr: Option<u64>) -> bool {
        match (addr, self.window()) {
            (Some(a), Some(w)) => w.contains(a),
            _ => false,
        }
    }

    fn get_available_addresses(&self) -> Box<dyn Iterator<Item = (u64, u64)> + '_> {
        Box::new(self.window().map(|w| (w.min_addr, w.max_addr)).into_iter())
    }

    fn get_mappings(&self, start: u64, end: u64) -> Box<dyn Iterator<Item = Run> + '_> {
        let base = self.base;
        Box::new(
            self.window()
                .and_then(|w| w.clip(start, end))
                .map(move |w| Run {
                    start: w.min_addr,
                    end: w.max_addr,
                    file_offset: w.min_addr - base,
                })
                .into_iter(),
        )
    }
}
