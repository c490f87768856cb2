//! Class model
//!
//! A `Klass` is created by the loader and then only moves forward through
//! its states: loaded, linked, initialized. Dispatch tables are installed
//! once during linking and never change afterwards, so readers on other
//! threads either see no table or the final one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::field::FieldId;
use crate::flags::AccessFlags;
use crate::kind::JavaKind;
use crate::layout::FieldStorage;
use crate::method::{CodeAttribute, MethodId};
use crate::object::{ObjectRef, Value};
use crate::pool::{ConstantPool, ConstantPoolBuilder};
use crate::symbol::Symbol;

/// Stable identity of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KlassId(u32);

impl KlassId {
    pub const fn from_raw(raw: u32) -> Self {
        KlassId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Defining class loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u32);

impl LoaderId {
    /// The bootstrap loader
    pub const BOOT: LoaderId = LoaderId(0);

    pub const fn from_raw(raw: u32) -> Self {
        LoaderId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Lifecycle state of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClassState {
    Loaded = 0,
    Linked = 1,
    Initialized = 2,
    Erroneous = 3,
}

impl ClassState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ClassState::Loaded,
            1 => ClassState::Linked,
            2 => ClassState::Initialized,
            _ => ClassState::Erroneous,
        }
    }
}

/// Shape of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlassKind {
    /// Class or interface defined from a class definition
    Instance,
    /// Array class
    Array {
        component: KlassId,
        elemental: KlassId,
        dimensions: u32,
    },
    /// Primitive pseudo-class, `void` included
    Primitive(JavaKind),
}

/// Implementations of one interface's methods, indexed by itable slot
#[derive(Debug, Clone)]
pub struct ItableEntry {
    pub interface: KlassId,
    pub methods: Box<[MethodId]>,
}

/// Runtime class
#[derive(Debug)]
pub struct Klass {
    id: KlassId,
    name: Symbol,
    flags: AccessFlags,
    loader: LoaderId,
    kind: KlassKind,
    super_klass: Option<KlassId>,
    interfaces: Box<[KlassId]>,
    methods: Box<[MethodId]>,
    fields: Box<[FieldId]>,
    pool: Arc<ConstantPool>,
    instance_size: u32,
    statics: FieldStorage,
    state: AtomicU8,
    vtable: OnceCell<Box<[MethodId]>>,
    itable: OnceCell<Box<[ItableEntry]>>,
    mirror: OnceCell<ObjectRef>,
    array_klass: OnceCell<KlassId>,
}

pub(crate) struct KlassSpec {
    pub id: KlassId,
    pub name: Symbol,
    pub flags: AccessFlags,
    pub loader: LoaderId,
    pub kind: KlassKind,
    pub super_klass: Option<KlassId>,
    pub interfaces: Vec<KlassId>,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
    pub pool: ConstantPool,
    pub instance_size: u32,
    pub static_size: u32,
    pub state: ClassState,
}

impl Klass {
    pub(crate) fn new(spec: KlassSpec) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            flags: spec.flags,
            loader: spec.loader,
            kind: spec.kind,
            super_klass: spec.super_klass,
            interfaces: spec.interfaces.into_boxed_slice(),
            methods: spec.methods.into_boxed_slice(),
            fields: spec.fields.into_boxed_slice(),
            pool: Arc::new(spec.pool),
            instance_size: spec.instance_size,
            statics: FieldStorage::new(spec.static_size),
            state: AtomicU8::new(spec.state as u8),
            vtable: OnceCell::new(),
            itable: OnceCell::new(),
            mirror: OnceCell::new(),
            array_klass: OnceCell::new(),
        }
    }

    pub fn id(&self) -> KlassId {
        self.id
    }

    /// Type descriptor (`Ljava/lang/Object;`, `[I`, `I`)
    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    pub fn kind(&self) -> KlassKind {
        self.kind
    }

    pub fn is_interface(&self) -> bool {
        self.flags.is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, KlassKind::Array { .. })
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, KlassKind::Primitive(_))
    }

    /// Instance class or interface
    pub fn is_instance_klass(&self) -> bool {
        self.kind == KlassKind::Instance
    }

    /// Kind of values of this type
    pub fn java_kind(&self) -> JavaKind {
        match self.kind {
            KlassKind::Primitive(kind) => kind,
            _ => JavaKind::Object,
        }
    }

    pub fn super_klass(&self) -> Option<KlassId> {
        self.super_klass
    }

    /// Directly implemented or extended interfaces
    pub fn interfaces(&self) -> &[KlassId] {
        &self.interfaces
    }

    /// Declared methods in declaration order
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn constant_pool(&self) -> &Arc<ConstantPool> {
        &self.pool
    }

    /// Instance size including header and inherited fields
    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    /// Storage for static fields
    pub fn statics(&self) -> &FieldStorage {
        &self.statics
    }

    pub fn state(&self) -> ClassState {
        ClassState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// States are ordered; an erroneous class stays erroneous
    pub(crate) fn advance_state(&self, to: ClassState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    pub fn is_linked(&self) -> bool {
        matches!(self.state(), ClassState::Linked | ClassState::Initialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ClassState::Initialized
    }

    /// Virtual method table, `None` until linked
    pub fn vtable(&self) -> Option<&[MethodId]> {
        self.vtable.get().map(|t| &**t)
    }

    /// Method in vtable slot `slot`
    pub fn vtable_lookup(&self, slot: i32) -> Option<MethodId> {
        if slot < 0 {
            return None;
        }
        self.vtable()?.get(slot as usize).copied()
    }

    /// Interface method tables, `None` until linked
    pub fn itable(&self) -> Option<&[ItableEntry]> {
        self.itable.get().map(|t| &**t)
    }

    /// Implementation of `interface`'s method in itable slot `slot`
    pub fn itable_lookup_or_null(&self, interface: KlassId, slot: i32) -> Option<MethodId> {
        if slot < 0 {
            return None;
        }
        self.itable()?
            .iter()
            .find(|entry| entry.interface == interface)?
            .methods
            .get(slot as usize)
            .copied()
    }

    pub(crate) fn install_tables(&self, vtable: Vec<MethodId>, itable: Vec<ItableEntry>) {
        let installed_vtable = self.vtable.set(vtable.into_boxed_slice()).is_ok();
        let installed_itable = self.itable.set(itable.into_boxed_slice()).is_ok();
        assert!(
            installed_vtable && installed_itable,
            "dispatch tables of {} installed twice",
            self.name
        );
    }

    pub(crate) fn mirror_cell(&self) -> &OnceCell<ObjectRef> {
        &self.mirror
    }

    pub(crate) fn array_klass_cell(&self) -> &OnceCell<KlassId> {
        &self.array_klass
    }

    /// Array class with this component, if it was created
    pub fn array_klass(&self) -> Option<KlassId> {
        self.array_klass.get().copied()
    }
}

/// Field of a [`ClassDefinition`]
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub descriptor: String,
    pub flags: AccessFlags,
    pub constant_value: Option<Value>,
}

impl FieldDefinition {
    pub fn new(name: &str, descriptor: &str, flags: AccessFlags) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags,
            constant_value: None,
        }
    }

    /// `ConstantValue` attribute
    pub fn with_constant(mut self, value: Value) -> Self {
        self.constant_value = Some(value);
        self
    }
}

/// Method of a [`ClassDefinition`]
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub name: String,
    pub signature: String,
    pub flags: AccessFlags,
    pub code: Option<CodeAttribute>,
}

impl MethodDefinition {
    /// Method without code
    pub fn new(name: &str, signature: &str, flags: AccessFlags) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
            flags,
            code: None,
        }
    }

    pub fn with_code(mut self, code: CodeAttribute) -> Self {
        self.code = Some(code);
        self
    }
}

/// Parsed form of a class, ready to be defined
#[derive(Debug)]
pub struct ClassDefinition {
    pub name: String,
    pub flags: AccessFlags,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
    pub pool: ConstantPoolBuilder,
}

impl ClassDefinition {
    /// Public class extending `java/lang/Object`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: AccessFlags::PUBLIC | AccessFlags::SYNCHRONIZED,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            pool: ConstantPoolBuilder::new(),
        }
    }

    /// Public interface
    pub fn interface(name: &str) -> Self {
        let mut def = Self::new(name);
        def.flags = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        def
    }

    pub fn flags(mut self, flags: AccessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    /// Root class without a superclass
    pub fn root(mut self) -> Self {
        self.super_name = None;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, method: MethodDefinition) -> Self {
        self.methods.push(method);
        self
    }

    pub fn constant_pool(mut self, pool: ConstantPoolBuilder) -> Self {
        self.pool = pool;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn klass(state: ClassState) -> Klass {
        Klass::new(KlassSpec {
            id: KlassId::from_raw(9),
            name: Symbol::detached("Lp/A;"),
            flags: AccessFlags::PUBLIC,
            loader: LoaderId::BOOT,
            kind: KlassKind::Instance,
            super_klass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            pool: ConstantPoolBuilder::new().build(),
            instance_size: 16,
            static_size: 0,
            state,
        })
    }

    #[test]
    fn test_state_only_moves_forward() {
        let k = klass(ClassState::Loaded);
        assert!(!k.is_linked());
        k.advance_state(ClassState::Initialized);
        k.advance_state(ClassState::Linked);
        assert!(k.is_initialized());
        assert!(k.is_linked());
    }

    #[test]
    fn test_tables_absent_until_installed() {
        let k = klass(ClassState::Loaded);
        assert!(k.vtable().is_none());
        assert_eq!(k.vtable_lookup(0), None);

        let iface = KlassId::from_raw(3);
        k.install_tables(
            vec![MethodId::from_raw(1), MethodId::from_raw(2)],
            vec![ItableEntry {
                interface: iface,
                methods: vec![MethodId::from_raw(2)].into_boxed_slice(),
            }],
        );
        assert_eq!(k.vtable_lookup(1), Some(MethodId::from_raw(2)));
        assert_eq!(k.vtable_lookup(2), None);
        assert_eq!(k.vtable_lookup(-1), None);
        assert_eq!(k.itable_lookup_or_null(iface, 0), Some(MethodId::from_raw(2)));
        assert_eq!(k.itable_lookup_or_null(KlassId::from_raw(4), 0), None);
    }

    #[test]
    #[should_panic(expected = "installed twice")]
    fn test_tables_install_once() {
        let k = klass(ClassState::Loaded);
        k.install_tables(Vec::new(), Vec::new());
        k.install_tables(Vec::new(), Vec::new());
    }

    #[test]
    fn test_definition_builder() {
        let def = ClassDefinition::interface("p/I")
            .method(MethodDefinition::new("m", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT));
        assert!(def.flags.is_interface());
        assert_eq!(def.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(def.methods.len(), 1);
    }
}
