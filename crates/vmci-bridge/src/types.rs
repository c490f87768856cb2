//! Type mirrors
//!
//! A [`TypeHandle`] is either backed by a loaded class (instance, array,
//! primitive) or is an [`UnresolvedType`] carrying only a descriptor.
//! Unresolved handles never turn into resolved ones on their own; callers
//! resolve explicitly through [`UnresolvedType::resolve`] or
//! [`lookup_type`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;
use vmci_runtime::descriptor;
use vmci_runtime::{well_known, AccessFlags, JavaKind, Klass, KlassId, KlassKind};

use crate::context::BridgeContext;
use crate::field::{self, FieldHandle};
use crate::method::{self, MethodHandle};
use crate::pool::ConstantPoolHandle;
use crate::{BridgeError, BridgeResult};

/// Class or interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceType {
    klass: KlassId,
}

/// Primitive type, `void` included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveType {
    kind: JavaKind,
    klass: KlassId,
}

/// Innermost element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementalType {
    Instance(InstanceType),
    Primitive(PrimitiveType),
}

/// Array type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayType {
    klass: KlassId,
    elemental: ElementalType,
    dimensions: u32,
}

/// Type known only by its descriptor
///
/// Clones share the descriptor; [`UnresolvedType::same_handle`] tells a
/// handle apart from an equal but separately minted one.
#[derive(Clone)]
pub struct UnresolvedType {
    descriptor: Arc<str>,
}

/// Compiler-facing type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeHandle {
    Instance(InstanceType),
    Array(ArrayType),
    Primitive(PrimitiveType),
    Unresolved(UnresolvedType),
}

/// Answer of a hierarchy oracle
///
/// When `requires_assumption` is set the answer only holds for the classes
/// loaded so far; later loading may invalidate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assumption<T> {
    pub result: T,
    pub requires_assumption: bool,
}

/// Mirror of a loaded class
pub fn to_type(cx: &BridgeContext, klass: &Klass) -> BridgeResult<TypeHandle> {
    cx.ensure_enabled()?;
    Ok(type_of(cx, klass))
}

pub(crate) fn type_of(cx: &BridgeContext, klass: &Klass) -> TypeHandle {
    match klass.kind() {
        KlassKind::Primitive(kind) => TypeHandle::Primitive(cx.primitive(kind)),
        KlassKind::Instance => TypeHandle::Instance(InstanceType::new(klass.id())),
        KlassKind::Array {
            elemental,
            dimensions,
            ..
        } => TypeHandle::Array(ArrayType {
            klass: klass.id(),
            elemental: to_elemental(cx, &cx.klass(elemental)),
            dimensions,
        }),
    }
}

fn to_elemental(cx: &BridgeContext, klass: &Klass) -> ElementalType {
    match klass.kind() {
        KlassKind::Primitive(kind) => ElementalType::Primitive(cx.primitive(kind)),
        _ => ElementalType::Instance(InstanceType::new(klass.id())),
    }
}

/// Type named by `name` as seen from `accessing`
///
/// Without `resolve` nothing is loaded and no symbol is created: a type
/// that is not loaded yet comes back unresolved. With `resolve` the type is
/// loaded through `accessing`'s loader and loading failures propagate.
pub fn lookup_type(
    cx: &BridgeContext,
    name: &str,
    accessing: &InstanceType,
    resolve: bool,
) -> BridgeResult<TypeHandle> {
    cx.ensure_enabled()?;
    if name.len() == 1 {
        if let Some(kind) = JavaKind::from_descriptor(name).filter(|k| k.is_primitive()) {
            return Ok(TypeHandle::Primitive(cx.primitive(kind)));
        }
    }
    let rt = cx.runtime();
    let symbol = if resolve {
        rt.symbols()
            .get_or_create_valid_type(name)
            .ok_or_else(|| BridgeError::InvalidDescriptor(name.to_string()))?
    } else {
        match rt.symbols().lookup_valid_type(name) {
            Some(symbol) => symbol,
            None => return to_unresolved_type(name).map(TypeHandle::Unresolved),
        }
    };

    let loader = cx.instance_klass(accessing).loader();
    if let Some(klass) = rt.find_loaded(&symbol, loader) {
        return Ok(type_of(cx, &klass));
    }
    if !resolve {
        return to_unresolved_type(&symbol).map(TypeHandle::Unresolved);
    }
    debug!(name, "loading type for compiler");
    let klass = rt.load_class(&symbol, loader)?;
    Ok(type_of(cx, &klass))
}

/// Unresolved handle for a class or array descriptor; never loads anything
pub fn to_unresolved_type(descriptor: &str) -> BridgeResult<UnresolvedType> {
    if descriptor::is_reference_descriptor(descriptor) && descriptor::is_valid_field_descriptor(descriptor) {
        Ok(UnresolvedType::new_unchecked(descriptor))
    } else {
        Err(BridgeError::InvalidDescriptor(descriptor.to_string()))
    }
}

impl InstanceType {
    pub(crate) fn new(klass: KlassId) -> Self {
        Self { klass }
    }

    pub fn klass_id(&self) -> KlassId {
        self.klass
    }

    pub fn is_object(&self) -> bool {
        self.klass == well_known::OBJECT
    }

    pub fn constant_pool(&self) -> ConstantPoolHandle {
        ConstantPoolHandle::new(*self)
    }

    /// Methods declared here, constructors and the class initializer excluded
    pub fn declared_methods(&self, cx: &BridgeContext) -> BridgeResult<Vec<MethodHandle>> {
        self.methods_where(cx, |m| !m.is_constructor() && !m.is_class_initializer())
    }

    /// Constructors declared here
    pub fn declared_constructors(&self, cx: &BridgeContext) -> BridgeResult<Vec<MethodHandle>> {
        self.methods_where(cx, |m| m.is_constructor())
    }

    /// The `<clinit>` method, if declared
    pub fn class_initializer(&self, cx: &BridgeContext) -> BridgeResult<Option<MethodHandle>> {
        Ok(self.methods_where(cx, |m| m.is_class_initializer())?.into_iter().next())
    }

    fn methods_where(
        &self,
        cx: &BridgeContext,
        keep: impl Fn(&vmci_runtime::Method) -> bool,
    ) -> BridgeResult<Vec<MethodHandle>> {
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        Ok(cx
            .instance_klass(self)
            .methods()
            .iter()
            .filter(|&&id| keep(&rt.method(id)))
            .map(|&id| method::method_of(cx, id, Some(self)))
            .collect())
    }

    /// Method declared here with exactly this name and signature
    pub fn find_method(&self, cx: &BridgeContext, name: &str, signature: &str) -> BridgeResult<Option<MethodHandle>> {
        cx.ensure_enabled()?;
        let klass = cx.instance_klass(self);
        Ok(cx
            .runtime()
            .declared_method(&klass, name, signature)
            .map(|id| method::method_of(cx, id, Some(self))))
    }

    /// Instance fields, superclass fields first when requested
    pub fn instance_fields(&self, cx: &BridgeContext, include_superclasses: bool) -> BridgeResult<Vec<FieldHandle>> {
        cx.ensure_enabled()?;
        let klass = cx.instance_klass(self);
        let mut out = match klass.super_klass() {
            Some(super_id) if include_superclasses && !klass.is_interface() => {
                InstanceType::new(super_id).instance_fields(cx, true)?
            }
            _ => Vec::new(),
        };
        out.extend(self.fields_where(cx, false));
        Ok(out)
    }

    pub fn static_fields(&self, cx: &BridgeContext) -> BridgeResult<Vec<FieldHandle>> {
        cx.ensure_enabled()?;
        Ok(self.fields_where(cx, true))
    }

    fn fields_where(&self, cx: &BridgeContext, statics: bool) -> Vec<FieldHandle> {
        let rt = cx.runtime();
        cx.instance_klass(self)
            .fields()
            .iter()
            .filter(|&&id| rt.field(id).is_static() == statics)
            .map(|&id| field::field_of(cx, id, Some(self)))
            .collect()
    }

    /// Length of the virtual method table, `None` until linked
    pub fn vtable_length(&self, cx: &BridgeContext) -> Option<usize> {
        cx.instance_klass(self).vtable().map(|t| t.len())
    }

    /// The only loaded class implementing this interface
    pub fn single_implementor(&self, cx: &BridgeContext) -> BridgeResult<Option<Assumption<InstanceType>>> {
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        Ok(rt
            .single_implementor_of(&cx.instance_klass(self))
            .map(|id| Assumption {
                result: InstanceType::new(id),
                requires_assumption: true,
            }))
    }
}

impl PrimitiveType {
    pub(crate) fn new(kind: JavaKind, klass: KlassId) -> Self {
        Self { kind, klass }
    }

    pub fn kind(&self) -> JavaKind {
        self.kind
    }

    pub fn klass_id(&self) -> KlassId {
        self.klass
    }
}

impl ElementalType {
    pub fn klass_id(&self) -> KlassId {
        match self {
            ElementalType::Instance(t) => t.klass_id(),
            ElementalType::Primitive(p) => p.klass_id(),
        }
    }
}

impl From<ElementalType> for TypeHandle {
    fn from(elemental: ElementalType) -> Self {
        match elemental {
            ElementalType::Instance(t) => TypeHandle::Instance(t),
            ElementalType::Primitive(p) => TypeHandle::Primitive(p),
        }
    }
}

impl ArrayType {
    pub fn klass_id(&self) -> KlassId {
        self.klass
    }

    pub fn elemental(&self) -> ElementalType {
        self.elemental
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

impl UnresolvedType {
    pub(crate) fn new_unchecked(descriptor: &str) -> Self {
        Self {
            descriptor: Arc::from(descriptor),
        }
    }

    /// Unresolved handle for a `CONSTANT_Class` name (`p/A`, `[I`)
    pub(crate) fn from_class_name(name: &str) -> BridgeResult<Self> {
        to_unresolved_type(&descriptor::class_name_to_descriptor(name))
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Whether `other` is this very handle rather than an equal copy
    pub fn same_handle(&self, other: &UnresolvedType) -> bool {
        Arc::ptr_eq(&self.descriptor, &other.descriptor)
    }

    /// Look the type up again from `accessing`, loading it if `resolve` is set
    pub fn resolve(&self, cx: &BridgeContext, accessing: &InstanceType, resolve: bool) -> BridgeResult<TypeHandle> {
        lookup_type(cx, &self.descriptor, accessing, resolve)
    }
}

impl PartialEq for UnresolvedType {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl Eq for UnresolvedType {}

impl Hash for UnresolvedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.descriptor.hash(state)
    }
}

impl fmt::Debug for UnresolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnresolvedType({})", self.descriptor)
    }
}

impl TypeHandle {
    /// Class backing this handle; `None` when unresolved
    pub fn klass_id(&self) -> Option<KlassId> {
        match self {
            TypeHandle::Instance(t) => Some(t.klass_id()),
            TypeHandle::Array(a) => Some(a.klass_id()),
            TypeHandle::Primitive(p) => Some(p.klass_id()),
            TypeHandle::Unresolved(_) => None,
        }
    }

    pub fn klass(&self, cx: &BridgeContext) -> Option<Arc<Klass>> {
        self.klass_id().map(|id| cx.klass(id))
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, TypeHandle::Unresolved(_))
    }

    pub fn as_instance(&self) -> Option<&InstanceType> {
        match self {
            TypeHandle::Instance(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_unresolved(&self) -> Option<&UnresolvedType> {
        match self {
            TypeHandle::Unresolved(u) => Some(u),
            _ => None,
        }
    }

    /// Type descriptor (`Lp/A;`, `[I`, `I`)
    pub fn name(&self, cx: &BridgeContext) -> Arc<str> {
        match self {
            TypeHandle::Unresolved(u) => u.descriptor.clone(),
            _ => match self.klass(cx) {
                Some(klass) => klass.name().as_arc().clone(),
                None => Arc::from(""),
            },
        }
    }

    pub fn java_kind(&self) -> JavaKind {
        match self {
            TypeHandle::Primitive(p) => p.kind(),
            _ => JavaKind::Object,
        }
    }

    /// Class modifiers; none for unresolved types
    pub fn modifiers(&self, cx: &BridgeContext) -> AccessFlags {
        match self.klass(cx) {
            Some(klass) => klass.flags().intersection(AccessFlags::JVM_MODIFIERS),
            None => AccessFlags::NONE,
        }
    }

    pub fn is_interface(&self, cx: &BridgeContext) -> bool {
        self.as_instance()
            .is_some_and(|t| cx.instance_klass(t).is_interface())
    }

    /// Class that is neither an interface nor an array nor a primitive
    pub fn is_instance_class(&self, cx: &BridgeContext) -> bool {
        self.as_instance()
            .is_some_and(|t| !cx.instance_klass(t).is_interface())
    }

    pub fn is_array(&self) -> bool {
        match self {
            TypeHandle::Array(_) => true,
            TypeHandle::Unresolved(u) => u.descriptor.starts_with('['),
            _ => false,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeHandle::Primitive(_))
    }

    pub fn is_linked(&self, cx: &BridgeContext) -> bool {
        self.klass(cx).is_some_and(|k| k.is_linked())
    }

    pub fn is_initialized(&self, cx: &BridgeContext) -> bool {
        self.klass(cx).is_some_and(|k| k.is_initialized())
    }

    /// Link the backing class
    pub fn link(&self, cx: &BridgeContext) -> BridgeResult<()> {
        cx.ensure_enabled()?;
        let klass = self.require_klass(cx)?;
        cx.runtime().link(&klass)?;
        Ok(())
    }

    /// Initialize the backing class
    pub fn initialize(&self, cx: &BridgeContext) -> BridgeResult<()> {
        cx.ensure_enabled()?;
        let klass = self.require_klass(cx)?;
        cx.runtime().initialize(&klass)?;
        Ok(())
    }

    fn require_klass(&self, cx: &BridgeContext) -> BridgeResult<Arc<Klass>> {
        self.klass(cx).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("{} is not resolved", self.name(cx)))
        })
    }

    /// Superclass; `None` for interfaces, primitives, `Object` and unresolved types
    pub fn superclass(&self, cx: &BridgeContext) -> BridgeResult<Option<TypeHandle>> {
        cx.ensure_enabled()?;
        Ok(match self {
            TypeHandle::Instance(t) => {
                let klass = cx.instance_klass(t);
                if klass.is_interface() {
                    return Ok(None);
                }
                klass.super_klass().map(|id| TypeHandle::Instance(InstanceType::new(id)))
            }
            TypeHandle::Array(_) => Some(TypeHandle::Instance(InstanceType::new(well_known::OBJECT))),
            _ => None,
        })
    }

    /// Directly implemented or extended interfaces
    pub fn interfaces(&self, cx: &BridgeContext) -> BridgeResult<Vec<InstanceType>> {
        cx.ensure_enabled()?;
        Ok(match self.as_instance() {
            Some(t) => cx
                .instance_klass(t)
                .interfaces()
                .iter()
                .map(|&id| InstanceType::new(id))
                .collect(),
            None => Vec::new(),
        })
    }

    /// Element type of an array
    pub fn component_type(&self, cx: &BridgeContext) -> BridgeResult<Option<TypeHandle>> {
        cx.ensure_enabled()?;
        Ok(match self {
            TypeHandle::Array(a) => match cx.klass(a.klass).kind() {
                KlassKind::Array { component, .. } => Some(type_of(cx, &cx.klass(component))),
                _ => None,
            },
            TypeHandle::Unresolved(u) => {
                descriptor::component_descriptor(&u.descriptor).map(|component| unresolved_or_primitive(cx, component))
            }
            _ => None,
        })
    }

    /// Innermost element type; the type itself for non-arrays
    pub fn elemental_type(&self, cx: &BridgeContext) -> BridgeResult<TypeHandle> {
        cx.ensure_enabled()?;
        Ok(match self {
            TypeHandle::Array(a) => a.elemental.into(),
            TypeHandle::Unresolved(u) if u.descriptor.starts_with('[') => {
                unresolved_or_primitive(cx, descriptor::elemental_descriptor(&u.descriptor))
            }
            other => other.clone(),
        })
    }

    /// One-dimension-larger array of this type
    ///
    /// The array class is created for resolved types; unresolved types give
    /// an unresolved array descriptor.
    pub fn array_of(&self, cx: &BridgeContext) -> BridgeResult<TypeHandle> {
        cx.ensure_enabled()?;
        match self {
            TypeHandle::Primitive(p) if p.kind() == JavaKind::Void => Err(BridgeError::InvalidArgument(
                "void has no array type".to_string(),
            )),
            TypeHandle::Unresolved(u) => {
                to_unresolved_type(&format!("[{}", u.descriptor)).map(TypeHandle::Unresolved)
            }
            _ => {
                let klass = self.require_klass(cx)?;
                let array = cx.runtime().array_of(&klass)?;
                Ok(type_of(cx, &array))
            }
        }
    }

    /// Whether a value of `other` may be stored in a slot of this type
    ///
    /// Unresolved types are only assignable from equal descriptors.
    pub fn is_assignable_from(&self, cx: &BridgeContext, other: &TypeHandle) -> bool {
        match (self.klass(cx), other.klass(cx)) {
            (Some(to), Some(from)) => cx.runtime().is_assignable(&to, &from),
            _ => self.name(cx) == other.name(cx),
        }
    }

    /// The single concrete subtype loaded so far
    pub fn find_leaf_concrete_subtype(&self, cx: &BridgeContext) -> BridgeResult<Option<Assumption<TypeHandle>>> {
        cx.ensure_enabled()?;
        let Some(klass) = self.klass(cx) else {
            return Ok(None);
        };
        let rt = cx.runtime();
        let Some(leaf) = rt.leaf_concrete_subtype(&klass) else {
            return Ok(None);
        };
        let exact = leaf == klass.id()
            && (klass.flags().is_final() || (klass.is_array() && rt.is_leaf_type(&klass)));
        Ok(Some(Assumption {
            result: type_of(cx, &cx.klass(leaf)),
            requires_assumption: !exact,
        }))
    }
}

fn unresolved_or_primitive(cx: &BridgeContext, descriptor: &str) -> TypeHandle {
    match JavaKind::from_descriptor(descriptor) {
        Some(kind) if kind.is_primitive() => TypeHandle::Primitive(cx.primitive(kind)),
        _ => TypeHandle::Unresolved(UnresolvedType::new_unchecked(descriptor)),
    }
}
