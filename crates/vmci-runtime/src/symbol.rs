//! Symbol interning
//!
//! Names, signatures and type descriptors are interned once per runtime.
//! Type symbols are only ever created through descriptor validation, so a
//! `Symbol` obtained from [`SymbolTable::lookup_valid_type`] or
//! [`SymbolTable::get_or_create_valid_type`] is always well formed.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::descriptor;

/// Interned string
#[derive(Clone)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Symbol outside any table; re-interned when a class is defined
    pub(crate) fn detached(text: &str) -> Self {
        Symbol(Arc::from(text))
    }

    /// The symbol text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared backing storage
    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Thread-safe symbol table
#[derive(Default)]
pub struct SymbolTable {
    symbols: DashMap<Arc<str>, Symbol, FxBuildHasher>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning the canonical symbol
    pub fn intern(&self, text: &str) -> Symbol {
        if let Some(existing) = self.symbols.get(text) {
            return existing.value().clone();
        }
        let key: Arc<str> = Arc::from(text);
        self.symbols
            .entry(key.clone())
            .or_insert_with(|| Symbol(key))
            .value()
            .clone()
    }

    /// Existing symbol for `text`, never interning
    pub fn lookup(&self, text: &str) -> Option<Symbol> {
        self.symbols.get(text).map(|s| s.value().clone())
    }

    /// Existing symbol for a well-formed type descriptor
    ///
    /// Returns `None` when the descriptor is malformed or has never been
    /// interned. Never creates a symbol.
    pub fn lookup_valid_type(&self, descriptor: &str) -> Option<Symbol> {
        if !descriptor::is_valid_type_descriptor(descriptor) {
            return None;
        }
        self.lookup(descriptor)
    }

    /// Symbol for a well-formed type descriptor, interning it if needed
    ///
    /// Returns `None` when the descriptor is malformed.
    pub fn get_or_create_valid_type(&self, descriptor: &str) -> Option<Symbol> {
        if !descriptor::is_valid_type_descriptor(descriptor) {
            return None;
        }
        Some(self.intern(descriptor))
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.symbols.len())
            .finish()
    }
}
