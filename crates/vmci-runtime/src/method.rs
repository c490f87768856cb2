//! Method records
//!
//! Methods live in an append-only arena and are addressed by `MethodId`.
//! A method record never changes after allocation except for its vtable
//! slot, which linking assigns exactly once.
//!
//! Linking may place *copies* of a method into a class's vtable: inherited
//! default methods, miranda entries for unimplemented interface methods and
//! poison pills for conflicting defaults. A copy has its own `MethodId` and
//! vtable slot but shares the `identity` of the method it was copied from.
//! Code is reached through a separate version cell shared by the method and
//! all of its copies, so redefinition never changes identities.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::class::KlassId;
use crate::flags::AccessFlags;
use crate::symbol::Symbol;

/// Stable identity of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    pub fn from_raw(raw: u32) -> Self {
        MethodId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// How a method record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOrigin {
    /// Declared in a class file
    Declared,
    /// Inherited default method placed in a class vtable
    DefaultCopy,
    /// Abstract placeholder for an unimplemented interface method
    Miranda,
    /// Placeholder for conflicting defaults; must never be invoked
    PoisonPill,
}

/// Entry of the exception table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_bci: u16,
    pub end_bci: u16,
    pub handler_bci: u16,
    /// Constant pool index of the caught class, 0 for catch-all
    pub catch_type_index: u16,
}

/// `(bci, line)` pair of the line number table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub bci: u16,
    pub line: u16,
}

/// `Code` attribute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub line_numbers: Vec<LineNumber>,
}

impl CodeAttribute {
    /// Code with the given limits and no tables
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            ..Default::default()
        }
    }
}

/// One revision of a method body
#[derive(Debug, Clone)]
pub struct MethodVersion {
    pub code: Option<Arc<CodeAttribute>>,
    pub revision: u32,
}

/// Immutable method record
#[derive(Debug)]
pub struct Method {
    id: MethodId,
    identity: MethodId,
    origin: MethodOrigin,
    declaring: KlassId,
    declared_in_interface: bool,
    name: Symbol,
    signature: Symbol,
    flags: AccessFlags,
    vtable_index: AtomicI32,
    itable_index: i32,
    version: Arc<RwLock<Arc<MethodVersion>>>,
}

impl Method {
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Canonical identity; equal for a method and all of its copies
    pub fn identity(&self) -> MethodId {
        self.identity
    }

    pub fn origin(&self) -> MethodOrigin {
        self.origin
    }

    /// Class that declares the method (an interface for default copies)
    pub fn declaring(&self) -> KlassId {
        self.declaring
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn signature(&self) -> &Symbol {
        &self.signature
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    pub fn is_private(&self) -> bool {
        self.flags.is_private()
    }

    pub fn is_public(&self) -> bool {
        self.flags.is_public()
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    pub fn is_native(&self) -> bool {
        self.flags.is_native()
    }

    pub fn is_final(&self) -> bool {
        self.flags.is_final()
    }

    /// `<init>`
    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }

    /// `<clinit>`
    pub fn is_class_initializer(&self) -> bool {
        &*self.name == "<clinit>"
    }

    /// Whether the declaring class is an interface
    pub fn is_interface_method(&self) -> bool {
        self.declared_in_interface
    }

    /// Non-abstract instance method of an interface
    pub fn is_default(&self) -> bool {
        self.declared_in_interface && !self.is_abstract() && !self.is_static() && !self.is_private()
    }

    /// Never-invokable placeholder
    pub fn is_poison_pill(&self) -> bool {
        self.origin == MethodOrigin::PoisonPill
    }

    /// Method that can occupy a vtable slot
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.is_constructor() && !self.is_class_initializer()
    }

    /// Same name and signature
    pub fn same_signature(&self, other: &Method) -> bool {
        self.name == other.name && self.signature == other.signature
    }

    /// Vtable slot, -1 when the method has none
    pub fn vtable_index(&self) -> i32 {
        self.vtable_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_vtable_index(&self, index: i32) {
        let previous = self.vtable_index.swap(index, Ordering::AcqRel);
        assert!(
            previous == -1 || previous == index,
            "vtable index of {}{} reassigned from {} to {}",
            self.name,
            self.signature,
            previous,
            index
        );
    }

    /// Itable slot within the declaring interface, -1 when the method has none
    pub fn itable_index(&self) -> i32 {
        self.itable_index
    }

    /// Current version of the method body
    pub fn current_version(&self) -> Arc<MethodVersion> {
        self.version.read().clone()
    }

    /// Current code, `None` for abstract and native methods
    pub fn code(&self) -> Option<Arc<CodeAttribute>> {
        self.current_version().code.clone()
    }

    /// Install a new body; identities and vtable slots are untouched
    pub fn redefine(&self, code: Option<CodeAttribute>) -> u32 {
        let mut version = self.version.write();
        let revision = version.revision + 1;
        *version = Arc::new(MethodVersion {
            code: code.map(Arc::new),
            revision,
        });
        revision
    }
}

/// Everything needed to allocate a declared method
pub(crate) struct MethodSpec {
    pub declaring: KlassId,
    pub declared_in_interface: bool,
    pub name: Symbol,
    pub signature: Symbol,
    pub flags: AccessFlags,
    pub itable_index: i32,
    pub code: Option<CodeAttribute>,
}

/// Append-only arena of methods
#[derive(Debug, Default)]
pub struct MethodArena {
    methods: RwLock<Vec<Arc<Method>>>,
}

impl MethodArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&self, spec: MethodSpec) -> MethodId {
        let mut methods = self.methods.write();
        let id = MethodId(methods.len() as u32);
        methods.push(Arc::new(Method {
            id,
            identity: id,
            origin: MethodOrigin::Declared,
            declaring: spec.declaring,
            declared_in_interface: spec.declared_in_interface,
            name: spec.name,
            signature: spec.signature,
            flags: spec.flags,
            vtable_index: AtomicI32::new(-1),
            itable_index: spec.itable_index,
            version: Arc::new(RwLock::new(Arc::new(MethodVersion {
                code: spec.code.map(Arc::new),
                revision: 0,
            }))),
        }));
        id
    }

    /// Allocate a relinked view of `of`
    pub(crate) fn alloc_copy(&self, of: &Method, origin: MethodOrigin) -> MethodId {
        let mut methods = self.methods.write();
        let id = MethodId(methods.len() as u32);
        let flags = match origin {
            MethodOrigin::Miranda => of.flags.union(AccessFlags::ABSTRACT),
            _ => of.flags,
        };
        methods.push(Arc::new(Method {
            id,
            identity: of.identity,
            origin,
            declaring: of.declaring,
            declared_in_interface: of.declared_in_interface,
            name: of.name.clone(),
            signature: of.signature.clone(),
            flags,
            vtable_index: AtomicI32::new(-1),
            itable_index: of.itable_index,
            version: of.version.clone(),
        }));
        id
    }

    pub fn get(&self, id: MethodId) -> Option<Arc<Method>> {
        self.methods.read().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}
