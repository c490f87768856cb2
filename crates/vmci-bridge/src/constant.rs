//! Compiler-side constants
//!
//! [`ObjectConstant`] wraps a heap reference. Equality and hashing go by
//! reference identity only, never by object contents; all null constants
//! are equal.

use std::fmt;
use std::hash::{Hash, Hasher};

use vmci_runtime::{JavaKind, ObjectRef, Payload, Value};

use crate::context::BridgeContext;
use crate::types::{self, TypeHandle};
use crate::BridgeResult;

/// Opaque reference constant
#[derive(Clone)]
pub struct ObjectConstant(Option<ObjectRef>);

/// Primitive constant; floating point values are kept by bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveConstant {
    kind: JavaKind,
    raw: i64,
}

/// Constant handed to the compiler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaConstant {
    Primitive(PrimitiveConstant),
    Object(ObjectConstant),
    /// Value of a failed dynamic constant
    Illegal,
}

impl ObjectConstant {
    pub const NULL: ObjectConstant = ObjectConstant(None);

    pub fn wrap(object: Option<ObjectRef>) -> Self {
        match object {
            Some(object) => ObjectConstant(Some(object)),
            None => Self::NULL,
        }
    }

    pub(crate) fn unwrap(&self) -> Option<&ObjectRef> {
        self.0.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Identity hash of the wrapped object, `0` for null
    pub fn identity_hash_code(&self) -> i32 {
        self.0.as_ref().map_or(0, |obj| obj.identity_hash())
    }

    /// Runtime type of the wrapped object
    pub fn object_type(&self, cx: &BridgeContext) -> BridgeResult<Option<TypeHandle>> {
        cx.ensure_enabled()?;
        Ok(self.0.as_ref().map(|obj| types::type_of(cx, &cx.klass(obj.klass()))))
    }

    pub fn array_length(&self) -> Option<usize> {
        self.0.as_ref()?.array().map(|a| a.len())
    }

    pub fn read_array_element(&self, index: usize) -> Option<JavaConstant> {
        let array = self.0.as_ref()?.array()?;
        let value = array.get(index)?;
        Some(JavaConstant::from_value(array.component_kind(), &value))
    }

    /// Contents of a wrapped `java.lang.String`
    pub fn as_string(&self) -> Option<&str> {
        self.0.as_ref()?.as_str()
    }

    /// Type mirrored by a wrapped `java.lang.Class`
    pub fn as_type(&self, cx: &BridgeContext) -> BridgeResult<Option<TypeHandle>> {
        cx.ensure_enabled()?;
        Ok(self
            .0
            .as_ref()
            .and_then(|obj| cx.runtime().klass_of_mirror(obj))
            .map(|klass| types::type_of(cx, &klass)))
    }

    /// Whether the wrapped object is a method handle
    pub fn is_method_handle(&self) -> bool {
        matches!(
            self.0.as_ref().map(|obj| obj.payload()),
            Some(Payload::MethodHandle { .. })
        )
    }
}

impl PartialEq for ObjectConstant {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => ObjectRef::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ObjectConstant {}

impl Hash for ObjectConstant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_ref().map_or(0, |obj| obj.address()).hash(state)
    }
}

impl fmt::Debug for ObjectConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("ObjectConstant(null)"),
            Some(obj) => write!(f, "ObjectConstant({:?})", obj),
        }
    }
}

impl PrimitiveConstant {
    pub fn new(kind: JavaKind, raw: i64) -> Self {
        assert!(
            kind.is_primitive() && kind != JavaKind::Void,
            "{} is not a primitive constant kind",
            kind
        );
        Self { kind, raw }
    }

    pub fn int(value: i32) -> Self {
        Self::new(JavaKind::Int, value as i64)
    }

    pub fn long(value: i64) -> Self {
        Self::new(JavaKind::Long, value)
    }

    pub fn float(value: f32) -> Self {
        Self::new(JavaKind::Float, value.to_bits() as i64)
    }

    pub fn double(value: f64) -> Self {
        Self::new(JavaKind::Double, value.to_bits() as i64)
    }

    pub fn kind(&self) -> JavaKind {
        self.kind
    }

    /// Raw bits; floats by bit pattern
    pub fn raw(&self) -> i64 {
        self.raw
    }

    pub fn as_int(&self) -> i32 {
        self.raw as i32
    }

    pub fn as_long(&self) -> i64 {
        self.raw
    }

    pub fn as_float(&self) -> f32 {
        f32::from_bits(self.raw as u32)
    }

    pub fn as_double(&self) -> f64 {
        f64::from_bits(self.raw as u64)
    }
}

impl JavaConstant {
    pub const NULL: JavaConstant = JavaConstant::Object(ObjectConstant::NULL);

    /// Constant for a value read from a slot of `kind`
    pub fn from_value(kind: JavaKind, value: &Value) -> Self {
        match value {
            Value::Ref(obj) => JavaConstant::Object(ObjectConstant::wrap(obj.clone())),
            other => match other.raw_bits() {
                Some(raw) if kind.is_primitive() && kind != JavaKind::Void => {
                    JavaConstant::Primitive(PrimitiveConstant::new(kind, raw))
                }
                _ => JavaConstant::Illegal,
            },
        }
    }

    pub fn java_kind(&self) -> JavaKind {
        match self {
            JavaConstant::Primitive(p) => p.kind(),
            JavaConstant::Object(_) => JavaKind::Object,
            JavaConstant::Illegal => JavaKind::Illegal,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectConstant> {
        match self {
            JavaConstant::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveConstant> {
        match self {
            JavaConstant::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

impl From<PrimitiveConstant> for JavaConstant {
    fn from(p: PrimitiveConstant) -> Self {
        JavaConstant::Primitive(p)
    }
}

impl From<ObjectConstant> for JavaConstant {
    fn from(obj: ObjectConstant) -> Self {
        JavaConstant::Object(obj)
    }
}
