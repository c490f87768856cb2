//! Runtime context
//!
//! `Runtime` owns every live structure of the interpreter model. It is
//! shared between interpreter threads and compiler threads behind an `Arc`;
//! all of its state is internally synchronized.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

use crate::bytecode;
use crate::class::{
    ClassDefinition, ClassState, Klass, KlassId, KlassKind, KlassSpec, LoaderId, MethodDefinition,
};
use crate::field::{Field, FieldArena, FieldId};
use crate::flags::AccessFlags;
use crate::kind::JavaKind;
use crate::method::{CodeAttribute, Method, MethodArena, MethodId};
use crate::object::{CallSiteLink, ObjectRef, Payload, Value};
use crate::pool::ConstantPoolBuilder;
use crate::symbol::{Symbol, SymbolTable};
use crate::{LinkageError, RuntimeResult};

/// Classes defined by every runtime, in definition order
pub mod well_known {
    use crate::class::KlassId;

    pub const OBJECT: KlassId = KlassId::from_raw(0);
    pub const STRING: KlassId = KlassId::from_raw(1);
    pub const CLASS: KlassId = KlassId::from_raw(2);
    pub const METHOD_TYPE: KlassId = KlassId::from_raw(3);
    pub const METHOD_HANDLE: KlassId = KlassId::from_raw(4);
    pub const VAR_HANDLE: KlassId = KlassId::from_raw(5);
    pub const CALL_SITE: KlassId = KlassId::from_raw(6);

    /// First primitive class; primitives follow in `JavaKind::PRIMITIVES` order
    pub(crate) const PRIMITIVE_BASE: u32 = 7;
}

const OBJECT_ARRAY_PARAMETER: &str = "[Ljava/lang/Object;";

/// Everything a bootstrap method receives
#[derive(Debug)]
pub struct BootstrapRequest<'a> {
    /// Class whose constant pool holds the dynamic entry
    pub caller: KlassId,
    /// Index of the `CONSTANT_Dynamic` or `CONSTANT_InvokeDynamic`
    pub cpi: u16,
    /// Resolved bootstrap method handle
    pub bootstrap_method: ObjectRef,
    pub name: &'a Symbol,
    pub descriptor: &'a Symbol,
    /// Resolved static arguments, in order
    pub arguments: Vec<Value>,
}

/// Executes bootstrap methods on behalf of the runtime
pub trait Bootstrapper: Send + Sync {
    /// Produce the value of a dynamic constant
    fn bootstrap_constant(&self, rt: &Runtime, request: &BootstrapRequest<'_>) -> RuntimeResult<Value>;

    /// Link an invokedynamic call site
    fn bootstrap_call_site(
        &self,
        rt: &Runtime,
        request: &BootstrapRequest<'_>,
    ) -> RuntimeResult<CallSiteLink>;
}

/// Fails every bootstrap request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBootstrapper;

impl Bootstrapper for NoBootstrapper {
    fn bootstrap_constant(&self, _rt: &Runtime, request: &BootstrapRequest<'_>) -> RuntimeResult<Value> {
        Err(LinkageError::BootstrapFailed(format!(
            "no bootstrapper installed for dynamic constant {}",
            request.name
        )))
    }

    fn bootstrap_call_site(
        &self,
        _rt: &Runtime,
        request: &BootstrapRequest<'_>,
    ) -> RuntimeResult<CallSiteLink> {
        Err(LinkageError::BootstrapFailed(format!(
            "no bootstrapper installed for call site {}",
            request.name
        )))
    }
}

/// The interpreter's live state
pub struct Runtime {
    pub(crate) symbols: SymbolTable,
    pub(crate) klasses: RwLock<Vec<Arc<Klass>>>,
    pub(crate) by_name: DashMap<(LoaderId, Symbol), KlassId, FxBuildHasher>,
    pub(crate) class_path: Mutex<FxHashMap<Symbol, (LoaderId, ClassDefinition)>>,
    /// Loading lock plus the stack of classes being defined on the owning thread
    pub(crate) loading: ReentrantMutex<RefCell<Vec<Symbol>>>,
    methods: MethodArena,
    fields: FieldArena,
    strings: DashMap<Arc<str>, ObjectRef, FxBuildHasher>,
    bootstrapper: RwLock<Arc<dyn Bootstrapper>>,
}

impl Runtime {
    /// Runtime with the bootstrap classes defined and linked
    pub fn new() -> RuntimeResult<Self> {
        let rt = Self {
            symbols: SymbolTable::new(),
            klasses: RwLock::new(Vec::new()),
            by_name: DashMap::with_hasher(FxBuildHasher),
            class_path: Mutex::new(FxHashMap::default()),
            loading: ReentrantMutex::new(RefCell::new(Vec::new())),
            methods: MethodArena::new(),
            fields: FieldArena::new(),
            strings: DashMap::with_hasher(FxBuildHasher),
            bootstrapper: RwLock::new(Arc::new(NoBootstrapper)),
        };
        rt.define_bootstrap_classes()?;
        Ok(rt)
    }

    /// Runtime whose dynamic constants and call sites go through `bootstrapper`
    pub fn with_bootstrapper(bootstrapper: Arc<dyn Bootstrapper>) -> RuntimeResult<Self> {
        let rt = Self::new()?;
        rt.set_bootstrapper(bootstrapper);
        Ok(rt)
    }

    fn define_bootstrap_classes(&self) -> RuntimeResult<()> {
        let public = AccessFlags::PUBLIC;
        let native = AccessFlags::PUBLIC | AccessFlags::NATIVE;
        let polymorphic =
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::NATIVE | AccessFlags::VARARGS;
        let abstract_class = AccessFlags::PUBLIC | AccessFlags::ABSTRACT;
        let final_class = AccessFlags::PUBLIC | AccessFlags::FINAL;

        let definitions = [
            (
                well_known::OBJECT,
                ClassDefinition::new("java/lang/Object")
                    .root()
                    .method(
                        MethodDefinition::new("<init>", "()V", public)
                            .with_code(CodeAttribute::new(0, 1, vec![bytecode::RETURN])),
                    )
                    .method(MethodDefinition::new("equals", "(Ljava/lang/Object;)Z", public))
                    .method(MethodDefinition::new("hashCode", "()I", native))
                    .method(MethodDefinition::new("toString", "()Ljava/lang/String;", public))
                    .method(MethodDefinition::new(
                        "clone",
                        "()Ljava/lang/Object;",
                        AccessFlags::PROTECTED | AccessFlags::NATIVE,
                    ))
                    .method(MethodDefinition::new("finalize", "()V", AccessFlags::PROTECTED)),
            ),
            (
                well_known::STRING,
                ClassDefinition::new("java/lang/String").flags(final_class),
            ),
            (
                well_known::CLASS,
                ClassDefinition::new("java/lang/Class").flags(final_class),
            ),
            (
                well_known::METHOD_TYPE,
                ClassDefinition::new("java/lang/invoke/MethodType").flags(final_class),
            ),
            (
                well_known::METHOD_HANDLE,
                ClassDefinition::new("java/lang/invoke/MethodHandle")
                    .flags(abstract_class)
                    .method(MethodDefinition::new(
                        "invoke",
                        "([Ljava/lang/Object;)Ljava/lang/Object;",
                        polymorphic,
                    ))
                    .method(MethodDefinition::new(
                        "invokeExact",
                        "([Ljava/lang/Object;)Ljava/lang/Object;",
                        polymorphic,
                    )),
            ),
            (
                well_known::VAR_HANDLE,
                ClassDefinition::new("java/lang/invoke/VarHandle")
                    .flags(abstract_class)
                    .method(MethodDefinition::new(
                        "get",
                        "([Ljava/lang/Object;)Ljava/lang/Object;",
                        polymorphic,
                    ))
                    .method(MethodDefinition::new("set", "([Ljava/lang/Object;)V", polymorphic)),
            ),
            (
                well_known::CALL_SITE,
                ClassDefinition::new("java/lang/invoke/CallSite").flags(abstract_class),
            ),
        ];

        for (expected, def) in definitions {
            let klass = self.define_class(LoaderId::BOOT, def)?;
            assert_eq!(klass.id(), expected, "bootstrap class defined out of order");
            self.initialize(&klass)?;
        }

        for (i, kind) in JavaKind::PRIMITIVES.into_iter().enumerate() {
            let id = self.define_primitive(kind);
            assert_eq!(
                id.as_u32(),
                well_known::PRIMITIVE_BASE + i as u32,
                "primitive class defined out of order"
            );
        }
        Ok(())
    }

    fn define_primitive(&self, kind: JavaKind) -> KlassId {
        let _guard = self.loading.lock();
        let mut klasses = self.klasses.write();
        let id = KlassId::from_raw(klasses.len() as u32);
        let name = self.symbols.intern(&kind.type_char().to_string());
        let klass = Arc::new(Klass::new(KlassSpec {
            id,
            name: name.clone(),
            flags: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
            loader: LoaderId::BOOT,
            kind: KlassKind::Primitive(kind),
            super_klass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            pool: ConstantPoolBuilder::new().build(),
            instance_size: 0,
            static_size: 0,
            state: ClassState::Initialized,
        }));
        klass.install_tables(Vec::new(), Vec::new());
        klasses.push(klass);
        self.by_name.insert((LoaderId::BOOT, name), id);
        id
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Class for an id handed out by this runtime
    ///
    /// Panics on an id this runtime never produced.
    pub fn klass(&self, id: KlassId) -> Arc<Klass> {
        match self.klasses.read().get(id.index()) {
            Some(klass) => klass.clone(),
            None => panic!("unknown class id {}", id.as_u32()),
        }
    }

    pub fn try_klass(&self, id: KlassId) -> Option<Arc<Klass>> {
        self.klasses.read().get(id.index()).cloned()
    }

    /// Number of classes, primitives and arrays included
    pub fn klass_count(&self) -> usize {
        self.klasses.read().len()
    }

    /// Snapshot of every defined class
    pub fn loaded_klasses(&self) -> Vec<Arc<Klass>> {
        self.klasses.read().clone()
    }

    /// Method for an id handed out by this runtime
    pub fn method(&self, id: MethodId) -> Arc<Method> {
        match self.methods.get(id) {
            Some(method) => method,
            None => panic!("unknown method id {}", id.as_u32()),
        }
    }

    /// Field for an id handed out by this runtime
    pub fn field(&self, id: FieldId) -> Arc<Field> {
        match self.fields.get(id) {
            Some(field) => field,
            None => panic!("unknown field id {}", id.as_u32()),
        }
    }

    pub(crate) fn method_arena(&self) -> &MethodArena {
        &self.methods
    }

    pub(crate) fn field_arena(&self) -> &FieldArena {
        &self.fields
    }

    pub fn object_klass(&self) -> Arc<Klass> {
        self.klass(well_known::OBJECT)
    }

    /// Primitive class for `kind`, `void` included
    pub fn primitive_klass(&self, kind: JavaKind) -> Option<Arc<Klass>> {
        let position = JavaKind::PRIMITIVES.iter().position(|k| *k == kind)?;
        self.try_klass(KlassId::from_raw(well_known::PRIMITIVE_BASE + position as u32))
    }

    pub fn set_bootstrapper(&self, bootstrapper: Arc<dyn Bootstrapper>) {
        *self.bootstrapper.write() = bootstrapper;
    }

    pub fn bootstrapper(&self) -> Arc<dyn Bootstrapper> {
        self.bootstrapper.read().clone()
    }

    /// Canonical string object for `text`
    pub fn intern_string(&self, text: &str) -> ObjectRef {
        if let Some(existing) = self.strings.get(text) {
            return existing.value().clone();
        }
        let key: Arc<str> = Arc::from(text);
        self.strings
            .entry(key.clone())
            .or_insert_with(|| ObjectRef::new(well_known::STRING, Payload::String(key)))
            .value()
            .clone()
    }

    /// `java.lang.Class` instance of `klass`
    pub fn mirror_of(&self, klass: &Klass) -> ObjectRef {
        klass
            .mirror_cell()
            .get_or_init(|| ObjectRef::new(well_known::CLASS, Payload::ClassMirror(klass.id())))
            .clone()
    }

    /// Class mirrored by a `java.lang.Class` instance
    pub fn klass_of_mirror(&self, mirror: &ObjectRef) -> Option<Arc<Klass>> {
        match mirror.payload() {
            Payload::ClassMirror(id) => self.try_klass(*id),
            _ => None,
        }
    }

    /// Method declared directly in `klass`
    pub fn declared_method(&self, klass: &Klass, name: &str, signature: &str) -> Option<MethodId> {
        klass.methods().iter().copied().find(|&id| {
            let m = self.method(id);
            m.name().as_str() == name && m.signature().as_str() == signature
        })
    }

    /// Signature-polymorphic method of `MethodHandle` or `VarHandle`
    pub fn is_signature_polymorphic(&self, method: &Method) -> bool {
        let holder = method.declaring();
        if holder != well_known::METHOD_HANDLE && holder != well_known::VAR_HANDLE {
            return false;
        }
        if !method.is_native() || !method.flags().contains(AccessFlags::VARARGS) {
            return false;
        }
        crate::descriptor::parse_signature(method.signature())
            .is_some_and(|sig| sig.parameters == [OBJECT_ARRAY_PARAMETER])
    }

    /// `klass` is `ancestor` or inherits from it through superclasses
    pub fn is_subclass_of(&self, klass: &Klass, ancestor: KlassId) -> bool {
        let mut current = Some(klass.id());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.klass(id).super_klass();
        }
        false
    }

    /// Every interface `klass` implements or extends, transitively
    ///
    /// Local interfaces come first, each followed by its superinterfaces,
    /// then those inherited from the superclass chain.
    pub fn all_interfaces(&self, klass: &Klass) -> Vec<KlassId> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = Some(klass.id());
        while let Some(id) = current {
            let k = self.klass(id);
            for &iface in k.interfaces() {
                self.collect_interfaces(iface, &mut out, &mut seen);
            }
            current = k.super_klass();
        }
        out
    }

    fn collect_interfaces(&self, iface: KlassId, out: &mut Vec<KlassId>, seen: &mut FxHashSet<KlassId>) {
        if !seen.insert(iface) {
            return;
        }
        out.push(iface);
        for &parent in self.klass(iface).interfaces() {
            self.collect_interfaces(parent, out, seen);
        }
    }

    /// Whether a value of type `from` may be stored in a slot of type `to`
    pub fn is_assignable(&self, to: &Klass, from: &Klass) -> bool {
        if to.id() == from.id() {
            return true;
        }
        if to.is_primitive() || from.is_primitive() {
            return false;
        }
        match from.kind() {
            KlassKind::Array { component, .. } => match to.kind() {
                KlassKind::Array {
                    component: to_component,
                    ..
                } => {
                    let from_component = self.klass(component);
                    let to_component = self.klass(to_component);
                    if from_component.is_primitive() || to_component.is_primitive() {
                        from_component.id() == to_component.id()
                    } else {
                        self.is_assignable(&to_component, &from_component)
                    }
                }
                _ => to.id() == well_known::OBJECT,
            },
            _ => {
                if to.is_array() {
                    false
                } else if to.is_interface() {
                    self.all_interfaces(from).contains(&to.id())
                } else {
                    self.is_subclass_of(from, to.id())
                }
            }
        }
    }

    /// Loaded classes other than `klass` that are assignable to it
    fn loaded_subtypes(&self, klass: &Klass) -> Vec<Arc<Klass>> {
        self.loaded_klasses()
            .into_iter()
            .filter(|k| k.id() != klass.id() && k.is_instance_klass())
            .filter(|k| self.is_assignable(klass, k))
            .collect()
    }

    /// No loaded class extends or implements `klass`
    ///
    /// Advisory: a later definition may invalidate the answer.
    pub fn is_leaf_type(&self, klass: &Klass) -> bool {
        match klass.kind() {
            KlassKind::Primitive(_) => true,
            KlassKind::Array { elemental, .. } => self.is_leaf_type(&self.klass(elemental)),
            KlassKind::Instance => klass.flags().is_final() || self.loaded_subtypes(klass).is_empty(),
        }
    }

    /// The one loaded class implementing `interface`, if there is exactly one
    ///
    /// Subclasses of an implementor do not count as further implementors.
    /// Advisory like [`Runtime::is_leaf_type`].
    pub fn single_implementor_of(&self, interface: &Klass) -> Option<KlassId> {
        if !interface.is_interface() {
            return None;
        }
        let mut implementors = self.loaded_subtypes(interface).into_iter().filter(|k| {
            !k.is_interface()
                && !k
                    .super_klass()
                    .is_some_and(|s| self.is_assignable(interface, &self.klass(s)))
        });
        let first = implementors.next()?;
        match implementors.next() {
            Some(_) => None,
            None => Some(first.id()),
        }
    }

    /// The one concrete loaded class assignable to `klass`, if unique
    pub fn leaf_concrete_subtype(&self, klass: &Klass) -> Option<KlassId> {
        match klass.kind() {
            KlassKind::Primitive(_) => None,
            KlassKind::Array { elemental, .. } => {
                let elemental = self.klass(elemental);
                if elemental.is_primitive() || self.is_leaf_type(&elemental) {
                    Some(klass.id())
                } else {
                    None
                }
            }
            KlassKind::Instance => {
                let mut candidates: Vec<KlassId> = self
                    .loaded_subtypes(klass)
                    .into_iter()
                    .filter(|k| !k.is_interface() && !k.is_abstract())
                    .map(|k| k.id())
                    .collect();
                if !klass.is_interface() && !klass.is_abstract() {
                    candidates.push(klass.id());
                }
                match candidates.as_slice() {
                    [only] => Some(*only),
                    _ => None,
                }
            }
        }
    }

    /// No loaded subtype dispatches `method` to a different implementation
    ///
    /// Advisory like [`Runtime::is_leaf_type`].
    pub fn is_leaf_method(&self, method: &Method) -> bool {
        if method.is_static() || method.is_private() || method.is_final() || !method.is_virtual() {
            return true;
        }
        let declaring = self.klass(method.declaring());
        if declaring.flags().is_final() {
            return true;
        }
        let subtypes = self.loaded_subtypes(&declaring);
        if method.is_interface_method() {
            subtypes
                .iter()
                .filter(|k| !k.is_interface() && k.is_linked())
                .all(|k| {
                    k.itable_lookup_or_null(declaring.id(), method.itable_index())
                        .is_none_or(|id| self.method(id).identity() == method.identity())
                })
        } else {
            let slot = method.vtable_index();
            if slot < 0 {
                return false;
            }
            subtypes.iter().filter(|k| k.is_linked()).all(|k| {
                k.vtable_lookup(slot)
                    .is_none_or(|id| self.method(id).identity() == method.identity())
            })
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("klasses", &self.klass_count())
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_classes() {
        let rt = Runtime::new().unwrap();
        let object = rt.object_klass();
        assert_eq!(object.name().as_str(), "Ljava/lang/Object;");
        assert!(object.is_initialized());
        assert_eq!(object.vtable().unwrap().len(), 5);
        assert_eq!(rt.klass(well_known::STRING).super_klass(), Some(well_known::OBJECT));

        let int = rt.primitive_klass(JavaKind::Int).unwrap();
        assert_eq!(int.name().as_str(), "I");
        assert!(int.is_initialized());
        assert_eq!(rt.primitive_klass(JavaKind::Void).unwrap().name().as_str(), "V");
        assert!(rt.primitive_klass(JavaKind::Object).is_none());
    }

    #[test]
    fn test_interned_strings_are_canonical() {
        let rt = Runtime::new().unwrap();
        let a = rt.intern_string("hello");
        let b = rt.intern_string("hello");
        assert!(ObjectRef::ptr_eq(&a, &b));
        assert_eq!(a.as_str(), Some("hello"));
        assert_eq!(a.klass(), well_known::STRING);
    }

    #[test]
    fn test_mirror_is_cached() {
        let rt = Runtime::new().unwrap();
        let object = rt.object_klass();
        let m1 = rt.mirror_of(&object);
        let m2 = rt.mirror_of(&object);
        assert!(ObjectRef::ptr_eq(&m1, &m2));
        assert_eq!(rt.klass_of_mirror(&m1).unwrap().id(), well_known::OBJECT);
    }

    #[test]
    fn test_signature_polymorphic() {
        let rt = Runtime::new().unwrap();
        let mh = rt.klass(well_known::METHOD_HANDLE);
        let invoke = rt
            .declared_method(&mh, "invoke", "([Ljava/lang/Object;)Ljava/lang/Object;")
            .unwrap();
        assert!(rt.is_signature_polymorphic(&rt.method(invoke)));

        let vh = rt.klass(well_known::VAR_HANDLE);
        let set = rt.declared_method(&vh, "set", "([Ljava/lang/Object;)V").unwrap();
        assert!(rt.is_signature_polymorphic(&rt.method(set)));

        let object = rt.object_klass();
        let equals = rt
            .declared_method(&object, "equals", "(Ljava/lang/Object;)Z")
            .unwrap();
        assert!(!rt.is_signature_polymorphic(&rt.method(equals)));
    }

    #[test]
    fn test_no_bootstrapper_fails() {
        let rt = Runtime::new().unwrap();
        let name = rt.symbols().intern("x");
        let desc = rt.symbols().intern("I");
        let request = BootstrapRequest {
            caller: well_known::OBJECT,
            cpi: 1,
            bootstrap_method: rt.intern_string("bsm"),
            name: &name,
            descriptor: &desc,
            arguments: Vec::new(),
        };
        assert!(matches!(
            rt.bootstrapper().bootstrap_constant(&rt, &request),
            Err(LinkageError::BootstrapFailed(_))
        ));
    }
}
