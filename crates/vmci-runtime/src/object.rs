//! Heap objects and values
//!
//! Objects are reference counted; `ObjectRef` equality is reference
//! identity, never structural. Each object gets a stable identity hash at
//! allocation time.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::class::KlassId;
use crate::field::FieldId;
use crate::kind::JavaKind;
use crate::layout::FieldStorage;
use crate::method::MethodId;
use crate::symbol::Symbol;

/// A value held in a field, array element or constant
#[derive(Debug, Clone)]
pub enum Value {
    /// `int` and every sub-int kind
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Reference, `None` is `null`
    Ref(Option<ObjectRef>),
}

impl Value {
    /// The `null` reference
    pub const NULL: Value = Value::Ref(None);

    /// Zero value for a kind
    pub fn default_for(kind: JavaKind) -> Self {
        match kind {
            JavaKind::Long => Value::Long(0),
            JavaKind::Float => Value::Float(0.0),
            JavaKind::Double => Value::Double(0.0),
            JavaKind::Object => Value::NULL,
            _ => Value::Int(0),
        }
    }

    /// Raw bits, floats by bit pattern; references have none
    pub fn raw_bits(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            Value::Float(v) => Some(v.to_bits() as i64),
            Value::Double(v) => Some(v.to_bits() as i64),
            Value::Ref(_) => None,
        }
    }

    /// Referenced object, if this is a non-null reference
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(Some(obj)) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Ref(a), Value::Ref(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => ObjectRef::ptr_eq(a, b),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Member referenced by a method handle object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    Method(MethodId),
    Field(FieldId),
}

/// Array elements
#[derive(Debug)]
pub struct ArrayStorage {
    component: JavaKind,
    elements: RwLock<Vec<Value>>,
}

impl ArrayStorage {
    /// Kind of the elements
    pub fn component_kind(&self) -> JavaKind {
        self.component
    }

    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.elements.read().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), String> {
        let mut elements = self.elements.write();
        let len = elements.len();
        match elements.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(format!(
                "Array index {} out of bounds (length: {})",
                index, len
            )),
        }
    }
}

/// Linked invokedynamic call site
#[derive(Debug, Clone)]
pub struct CallSiteLink {
    /// Method invoked by the linked site
    pub target: MethodId,
    /// Trailing argument appended to every invocation
    pub appendix: Option<ObjectRef>,
}

/// Object body
#[derive(Debug)]
pub enum Payload {
    /// Plain instance; fields live at their layout offsets
    Instance(FieldStorage),
    /// Array of primitives or references
    Array(ArrayStorage),
    /// `java.lang.String`
    String(Arc<str>),
    /// `java.lang.Class` for a klass
    ClassMirror(KlassId),
    /// Direct method handle
    MethodHandle { ref_kind: u8, member: Member },
    /// `java.lang.invoke.MethodType`
    MethodType(Symbol),
}

/// A heap-allocated object
pub struct HeapObject {
    klass: KlassId,
    identity_hash: i32,
    payload: Payload,
}

/// Shared reference to a heap object
#[derive(Clone)]
pub struct ObjectRef(Arc<HeapObject>);

fn next_identity_hash() -> i32 {
    static NEXT_HASH: AtomicU32 = AtomicU32::new(1);
    let seq = NEXT_HASH.fetch_add(1, Ordering::Relaxed);
    // spread sequential ids and keep the result positive and non-zero
    let mixed = seq.wrapping_mul(0x9E37_79B9) >> 1;
    if mixed == 0 {
        1
    } else {
        mixed as i32
    }
}

impl ObjectRef {
    /// Allocate an object of `klass`
    pub fn new(klass: KlassId, payload: Payload) -> Self {
        ObjectRef(Arc::new(HeapObject {
            klass,
            identity_hash: next_identity_hash(),
            payload,
        }))
    }

    /// Allocate an instance with `size` bytes of field storage
    pub fn new_instance(klass: KlassId, size: u32) -> Self {
        Self::new(klass, Payload::Instance(FieldStorage::new(size)))
    }

    /// Allocate an array filled with the default value of `component`
    pub fn new_array(klass: KlassId, component: JavaKind, length: usize) -> Self {
        Self::new(
            klass,
            Payload::Array(ArrayStorage {
                component,
                elements: RwLock::new(vec![Value::default_for(component); length]),
            }),
        )
    }

    /// Reference identity
    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the object, stable for its lifetime
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn klass(&self) -> KlassId {
        self.0.klass
    }

    /// `System.identityHashCode`
    pub fn identity_hash(&self) -> i32 {
        self.0.identity_hash
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// Field storage of a plain instance
    pub fn fields(&self) -> Option<&FieldStorage> {
        match &self.0.payload {
            Payload::Instance(storage) => Some(storage),
            _ => None,
        }
    }

    /// Elements of an array
    pub fn array(&self) -> Option<&ArrayStorage> {
        match &self.0.payload {
            Payload::Array(storage) => Some(storage),
            _ => None,
        }
    }

    /// Contents of a string
    pub fn as_str(&self) -> Option<&str> {
        match &self.0.payload {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:?}@{:#x})", self.0.klass, self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_structure() {
        let a = ObjectRef::new(KlassId::from_raw(3), Payload::String(Arc::from("x")));
        let b = ObjectRef::new(KlassId::from_raw(3), Payload::String(Arc::from("x")));
        assert!(!ObjectRef::ptr_eq(&a, &b));
        assert!(ObjectRef::ptr_eq(&a, &a.clone()));
        assert_ne!(Value::Ref(Some(a.clone())), Value::Ref(Some(b)));
        assert_eq!(Value::Ref(Some(a.clone())), Value::Ref(Some(a)));
    }

    #[test]
    fn test_identity_hash_is_stable_and_positive() {
        let obj = ObjectRef::new_instance(KlassId::from_raw(0), 16);
        let h = obj.identity_hash();
        assert!(h > 0);
        assert_eq!(obj.clone().identity_hash(), h);
    }

    #[test]
    fn test_float_values_compare_by_bits() {
        assert_eq!(Value::Float(f32::NAN), Value::Float(f32::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
    }

    #[test]
    fn test_array_bounds() {
        let arr = ObjectRef::new_array(KlassId::from_raw(1), JavaKind::Int, 2);
        let storage = arr.array().unwrap();
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(1), Some(Value::Int(0)));
        storage.set(1, Value::Int(9)).unwrap();
        assert_eq!(storage.get(1), Some(Value::Int(9)));
        assert!(storage.set(2, Value::Int(1)).is_err());
    }
}
