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

use crate::error::SymbolError;
use log::{debug, info};
use memmap2::Mmap;
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Maps addresses to the nearest known name at or below them.
pub trait Resolver {
    /// `(symbol_address, name)` of the closest symbol at or below `address`.
    fn nearest_symbol(&self, address: u64) -> Option<(u64, String)>;
}

/// Resolver that knows nothing; every lookup degrades to "no symbol".
pub struct NoSymbols;

impl Resolver for NoSymbols {
    fn nearest_symbol(&self, _address: u64) -> Option<(u64, String)> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolType {
    Function,
    Data,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub kind: SymbolType,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u64, kind: SymbolType) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
        }
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    // BTreeMap lets `range(..=addr).next_back()` find the closest start address to the left.
    symbols_by_addr: BTreeMap<u64, Arc<Symbol>>,
    symbols_by_name: HashMap<String, Arc<Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols_by_addr: BTreeMap::new(),
            symbols_by_name: HashMap::new(),
        }
    }

    /// Aliases at one address keep the function name over data labels; otherwise the latest wins.
    pub fn insert(&mut self, symbol: Symbol) {
        let arc_symbol = Arc::new(symbol);
        self.symbols_by_name
            .insert(arc_symbol.name.clone(), arc_symbol.clone());

        let keep_existing = self
            .symbols_by_addr
            .get(&arc_symbol.address)
            .is_some_and(|old| {
                old.kind == SymbolType::Function && arc_symbol.kind != SymbolType::Function
            });
        if !keep_existing {
            self.symbols_by_addr.insert(arc_symbol.address, arc_symbol);
        }
    }

    /// Closest symbol starting at or below `address`, regardless of its size.
    pub fn nearest(&self, address: u64) -> Option<&Symbol> {
        self.symbols_by_addr
            .range(..=address)
            .next_back()
            .map(|(_, s)| s.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name.get(name).map(|s| s.as_ref())
    }

    /// Address of `name` or `name+0xOFF`; `None` when the name is unknown.
    pub fn lookup_address(&self, expr: &str) -> Option<u64> {
        let (name, offset) = match expr.split_once('+') {
            Some((name, off)) => (name.trim(), crate::utils::parse_number(off).ok()?),
            None => (expr.trim(), 0),
        };
        self.get_by_name(name)
            .and_then(|s| s.address.checked_add(offset))
    }

    pub fn len(&self) -> usize {
        self.symbols_by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_addr.is_empty()
    }

    /// Load defined code and data symbols from an ELF, PE or Mach-O file.
    pub fn load(path: &Path) -> Result<Self, SymbolError> {
        let io_err = |source| SymbolError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        // Safety: the mapping is read-only and dropped before returning
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
        let obj = object::File::parse(&*mmap).map_err(|source| SymbolError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut table = SymbolTable::new();
        for sym in obj.symbols().chain(obj.dynamic_symbols()) {
            if !sym.is_definition() || sym.address() == 0 {
                continue;
            }
            let kind = match sym.kind() {
                SymbolKind::Text => SymbolType::Function,
                SymbolKind::Data => SymbolType::Data,
                _ => continue,
            };
            let Ok(raw) = sym.name() else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            table.insert(Symbol {
                name: demangle(raw),
                address: sym.address(),
                kind,
            });
        }
        info!("Loaded {} symbols from {}", table.len(), path.display());
        Ok(table)
    }
}

impl Resolver for SymbolTable {
    fn nearest_symbol(&self, address: u64) -> Option<(u64, String)> {
        self.nearest(address).map(|s| (s.address, s.name.clone()))
    }
}

/// Rust names first, then Itanium C++, else the raw name.
pub fn demangle(name: &str) -> String {
    if let Ok(dm) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", dm);
    }
    if name.starts_with("_Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name) {
            if let Ok(s) = sym.demangle() {
                return s;
            }
        }
        debug!("Unable to demangle {}", name);
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        let mut t = SymbolTable::new();
        t.insert(Symbol::new("foo", 0x1000, SymbolType::Function));
        t.insert(Symbol::new("bar", 0x2000, SymbolType::Function));
        t.insert(Symbol::new("bar_alias", 0x2000, SymbolType::Data));
        t
    }

    #[test]
    fn nearest_is_at_or_below() {
        let t = table();
        assert_eq!(t.nearest_symbol(0xfff), None);
        assert_eq!(t.nearest_symbol(0x1000), Some((0x1000, "foo".to_string())));
        assert_eq!(t.nearest_symbol(0x1fff), Some((0x1000, "foo".to_string())));
        assert_eq!(t.nearest_symbol(0x9000), Some((0x2000, "bar".to_string())));
        assert_eq!(t.len(), 2);
        assert!(t.get_by_name("bar_alias").is_some());
    }

    #[test]
    fn lookup_by_name_and_offset() {
        let t = table();
        assert_eq!(t.lookup_address("foo"), Some(0x1000));
        assert_eq!(t.lookup_address("bar+0x10"), Some(0x2010));
        assert_eq!(t.lookup_address("bar + 16"), Some(0x2010));
        assert_eq!(t.lookup_address("missing"), None);
        assert_eq!(t.lookup_address("foo+zz"), None);
        assert!(!t.is_empty());
        assert!(SymbolTable::new().is_empty());
    }

    #[test]
    fn demangles_rust_and_cpp() {
        assert_eq!(demangle("_ZN4core3fmt5write17h0123456789abcdefE"), "core::fmt::write");
        assert_eq!(demangle("_Z3fooi"), "foo(int)");
        assert_eq!(demangle("main"), "main");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = SymbolTable::load(Path::new("/nonexistent/vmlinux")).unwrap_err();
        assert!(matches!(err, SymbolError::Io { .. }));
    }

    #[test]
    fn load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"definitely not an object file").unwrap();
        assert!(matches!(
            SymbolTable::load(&path),
            Err(SymbolError::Parse { .. })
        ));
    }
}
