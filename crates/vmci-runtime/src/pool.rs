//! Constant pools
//!
//! Entries are immutable once a class is defined. Each index additionally
//! owns a resolution cell that starts empty and is filled at most once;
//! concurrent resolvers compute their value independently and the first
//! one installed wins, so every caller observes the same result.

use std::fmt;

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::class::KlassId;
use crate::field::FieldId;
use crate::kind::JavaKind;
use crate::method::MethodId;
use crate::object::{CallSiteLink, ObjectRef, Value};
use crate::symbol::{Symbol, SymbolTable};
use crate::LinkageError;

pub const REF_GET_FIELD: u8 = 1;
pub const REF_GET_STATIC: u8 = 2;
pub const REF_PUT_FIELD: u8 = 3;
pub const REF_PUT_STATIC: u8 = 4;
pub const REF_INVOKE_VIRTUAL: u8 = 5;
pub const REF_INVOKE_STATIC: u8 = 6;
pub const REF_INVOKE_SPECIAL: u8 = 7;
pub const REF_NEW_INVOKE_SPECIAL: u8 = 8;
pub const REF_INVOKE_INTERFACE: u8 = 9;

/// Constant pool tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolTag {
    Invalid = 0,
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    FieldRef = 9,
    MethodRef = 10,
    InterfaceMethodRef = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
}

impl PoolTag {
    /// Tag byte as found in a class file
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Tags an `ldc` may load
    pub fn is_loadable(self) -> bool {
        matches!(
            self,
            PoolTag::Integer
                | PoolTag::Float
                | PoolTag::Long
                | PoolTag::Double
                | PoolTag::Class
                | PoolTag::String
                | PoolTag::MethodHandle
                | PoolTag::MethodType
                | PoolTag::Dynamic
        )
    }
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Raw constant pool entry
#[derive(Debug, Clone)]
pub enum PoolEntry {
    /// Index 0 and the upper half of long/double entries
    Invalid,
    Utf8(Symbol),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { utf8_index: u16 },
    FieldRef { class_index: u16, nat_index: u16 },
    MethodRef { class_index: u16, nat_index: u16 },
    InterfaceMethodRef { class_index: u16, nat_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { ref_kind: u8, ref_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bsm_index: u16, nat_index: u16 },
    InvokeDynamic { bsm_index: u16, nat_index: u16 },
}

impl PoolEntry {
    pub fn tag(&self) -> PoolTag {
        match self {
            PoolEntry::Invalid => PoolTag::Invalid,
            PoolEntry::Utf8(_) => PoolTag::Utf8,
            PoolEntry::Integer(_) => PoolTag::Integer,
            PoolEntry::Float(_) => PoolTag::Float,
            PoolEntry::Long(_) => PoolTag::Long,
            PoolEntry::Double(_) => PoolTag::Double,
            PoolEntry::Class { .. } => PoolTag::Class,
            PoolEntry::String { .. } => PoolTag::String,
            PoolEntry::FieldRef { .. } => PoolTag::FieldRef,
            PoolEntry::MethodRef { .. } => PoolTag::MethodRef,
            PoolEntry::InterfaceMethodRef { .. } => PoolTag::InterfaceMethodRef,
            PoolEntry::NameAndType { .. } => PoolTag::NameAndType,
            PoolEntry::MethodHandle { .. } => PoolTag::MethodHandle,
            PoolEntry::MethodType { .. } => PoolTag::MethodType,
            PoolEntry::Dynamic { .. } => PoolTag::Dynamic,
            PoolEntry::InvokeDynamic { .. } => PoolTag::InvokeDynamic,
        }
    }
}

/// Outcome of resolving a dynamic constant
#[derive(Debug, Clone)]
pub enum DynamicValue {
    /// Bootstrap produced a value of `kind`
    Value { kind: JavaKind, value: Value },
    /// Bootstrap failed; the failure is replayed on every later resolution
    Failed(LinkageError),
}

/// Value installed in a resolution cell
#[derive(Debug, Clone)]
pub enum Resolved {
    Class(KlassId),
    String(ObjectRef),
    Field(FieldId),
    Method(MethodId),
    MethodHandle(ObjectRef),
    MethodType(ObjectRef),
    Dynamic(DynamicValue),
    CallSite(CallSiteLink),
}

/// Entry of the `BootstrapMethods` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// Index of a `CONSTANT_MethodHandle`
    pub method_handle_index: u16,
    /// Indices of loadable constants passed as static arguments
    pub arguments: Vec<u16>,
}

/// Symbolic member reference
#[derive(Debug, Clone, Copy)]
pub struct MemberRef<'a> {
    pub class_index: u16,
    pub name: &'a Symbol,
    pub descriptor: &'a Symbol,
}

/// Symbolic dynamic constant or invokedynamic reference
#[derive(Debug, Clone, Copy)]
pub struct DynamicRef<'a> {
    pub bsm_index: u16,
    pub name: &'a Symbol,
    pub descriptor: &'a Symbol,
}

/// Constant pool of one class
pub struct ConstantPool {
    entries: Box<[PoolEntry]>,
    resolved: Box<[OnceCell<Resolved>]>,
    bootstrap_methods: Box<[BootstrapMethod]>,
}

impl ConstantPool {
    pub fn new(entries: Vec<PoolEntry>, bootstrap_methods: Vec<BootstrapMethod>) -> Self {
        let resolved = (0..entries.len()).map(|_| OnceCell::new()).collect();
        Self {
            entries: entries.into_boxed_slice(),
            resolved,
            bootstrap_methods: bootstrap_methods.into_boxed_slice(),
        }
    }

    /// Number of slots, index 0 included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entry(&self, index: u16) -> Option<&PoolEntry> {
        self.entries.get(index as usize)
    }

    pub fn tag_at(&self, index: u16) -> Option<PoolTag> {
        self.entry(index).map(PoolEntry::tag)
    }

    pub fn utf8_at(&self, index: u16) -> Option<&Symbol> {
        match self.entry(index)? {
            PoolEntry::Utf8(sym) => Some(sym),
            _ => None,
        }
    }

    /// Internal name of a `CONSTANT_Class`
    pub fn class_name_at(&self, index: u16) -> Option<&Symbol> {
        match self.entry(index)? {
            PoolEntry::Class { name_index } => self.utf8_at(*name_index),
            _ => None,
        }
    }

    /// Contents of a `CONSTANT_String`
    pub fn string_at(&self, index: u16) -> Option<&Symbol> {
        match self.entry(index)? {
            PoolEntry::String { utf8_index } => self.utf8_at(*utf8_index),
            _ => None,
        }
    }

    pub fn name_and_type_at(&self, index: u16) -> Option<(&Symbol, &Symbol)> {
        match self.entry(index)? {
            PoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Some((self.utf8_at(*name_index)?, self.utf8_at(*descriptor_index)?)),
            _ => None,
        }
    }

    /// Field, method or interface method reference
    pub fn member_ref_at(&self, index: u16) -> Option<MemberRef<'_>> {
        let (class_index, nat_index) = match self.entry(index)? {
            PoolEntry::FieldRef {
                class_index,
                nat_index,
            }
            | PoolEntry::MethodRef {
                class_index,
                nat_index,
            }
            | PoolEntry::InterfaceMethodRef {
                class_index,
                nat_index,
            } => (*class_index, *nat_index),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type_at(nat_index)?;
        Some(MemberRef {
            class_index,
            name,
            descriptor,
        })
    }

    pub fn method_type_at(&self, index: u16) -> Option<&Symbol> {
        match self.entry(index)? {
            PoolEntry::MethodType { descriptor_index } => self.utf8_at(*descriptor_index),
            _ => None,
        }
    }

    /// `CONSTANT_Dynamic` or `CONSTANT_InvokeDynamic`
    pub fn dynamic_at(&self, index: u16) -> Option<DynamicRef<'_>> {
        let (bsm_index, nat_index) = match self.entry(index)? {
            PoolEntry::Dynamic {
                bsm_index,
                nat_index,
            }
            | PoolEntry::InvokeDynamic {
                bsm_index,
                nat_index,
            } => (*bsm_index, *nat_index),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type_at(nat_index)?;
        Some(DynamicRef {
            bsm_index,
            name,
            descriptor,
        })
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    pub fn bootstrap_method(&self, bsm_index: u16) -> Option<&BootstrapMethod> {
        self.bootstrap_methods.get(bsm_index as usize)
    }

    /// Resolved value at `index`, if any
    pub fn resolved_at(&self, index: u16) -> Option<&Resolved> {
        self.resolved.get(index as usize)?.get()
    }

    /// Install `value` unless another resolver got there first
    ///
    /// Returns the value that ended up in the cell.
    pub(crate) fn install(&self, index: u16, value: Resolved) -> Option<&Resolved> {
        let cell = self.resolved.get(index as usize)?;
        Some(cell.get_or_init(|| value))
    }

    /// Replace detached symbols by their interned counterparts
    pub(crate) fn intern_symbols(&mut self, symbols: &SymbolTable) {
        for entry in self.entries.iter_mut() {
            if let PoolEntry::Utf8(sym) = entry {
                let interned = symbols.intern(sym.as_str());
                *sym = interned;
            }
        }
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.resolved.iter().filter(|c| c.get().is_some()).count();
        f.debug_struct("ConstantPool")
            .field("len", &self.entries.len())
            .field("resolved", &resolved)
            .field("bootstrap_methods", &self.bootstrap_methods.len())
            .finish()
    }
}

/// Assembles a constant pool entry by entry
///
/// Utf8 and class entries are shared when requested twice. Every method
/// returns the index of the entry it produced.
#[derive(Debug)]
pub struct ConstantPoolBuilder {
    entries: Vec<PoolEntry>,
    utf8s: FxHashMap<String, u16>,
    classes: FxHashMap<String, u16>,
    bootstrap_methods: Vec<BootstrapMethod>,
}

impl Default for ConstantPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPoolBuilder {
    pub fn new() -> Self {
        Self {
            entries: vec![PoolEntry::Invalid],
            utf8s: FxHashMap::default(),
            classes: FxHashMap::default(),
            bootstrap_methods: Vec::new(),
        }
    }

    fn push(&mut self, entry: PoolEntry) -> u16 {
        let index = self.entries.len() as u16;
        let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
        self.entries.push(entry);
        if wide {
            self.entries.push(PoolEntry::Invalid);
        }
        index
    }

    /// Index the next entry will get
    pub fn next_index(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8s.get(text) {
            return index;
        }
        let index = self.push(PoolEntry::Utf8(Symbol::detached(text)));
        self.utf8s.insert(text.to_string(), index);
        index
    }

    /// `CONSTANT_Class` for an internal name (`p/A`, `[I`)
    pub fn class(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.classes.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let index = self.push(PoolEntry::Class { name_index });
        self.classes.insert(name.to_string(), index);
        index
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let utf8_index = self.utf8(text);
        self.push(PoolEntry::String { utf8_index })
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(PoolEntry::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.push(PoolEntry::Float(value))
    }

    /// Occupies two slots
    pub fn long(&mut self, value: i64) -> u16 {
        self.push(PoolEntry::Long(value))
    }

    /// Occupies two slots
    pub fn double(&mut self, value: f64) -> u16 {
        self.push(PoolEntry::Double(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(PoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.push(PoolEntry::FieldRef {
            class_index,
            nat_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, signature: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, signature);
        self.push(PoolEntry::MethodRef {
            class_index,
            nat_index,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, signature: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, signature);
        self.push(PoolEntry::InterfaceMethodRef {
            class_index,
            nat_index,
        })
    }

    /// `CONSTANT_MethodHandle` of `ref_kind` pointing at a member reference
    pub fn method_handle(&mut self, ref_kind: u8, ref_index: u16) -> u16 {
        self.push(PoolEntry::MethodHandle {
            ref_kind,
            ref_index,
        })
    }

    pub fn method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.utf8(descriptor);
        self.push(PoolEntry::MethodType { descriptor_index })
    }

    /// Add a `BootstrapMethods` entry, returning its attribute index
    pub fn bootstrap_method(&mut self, method_handle_index: u16, arguments: &[u16]) -> u16 {
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push(BootstrapMethod {
            method_handle_index,
            arguments: arguments.to_vec(),
        });
        index
    }

    pub fn dynamic(&mut self, bsm_index: u16, name: &str, descriptor: &str) -> u16 {
        let nat_index = self.name_and_type(name, descriptor);
        self.push(PoolEntry::Dynamic {
            bsm_index,
            nat_index,
        })
    }

    pub fn invoke_dynamic(&mut self, bsm_index: u16, name: &str, descriptor: &str) -> u16 {
        let nat_index = self.name_and_type(name, descriptor);
        self.push(PoolEntry::InvokeDynamic {
            bsm_index,
            nat_index,
        })
    }

    pub fn build(self) -> ConstantPool {
        ConstantPool::new(self.entries, self.bootstrap_methods)
    }
}
