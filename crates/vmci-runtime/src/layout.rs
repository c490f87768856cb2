//! Field storage layout
//!
//! The layout computed here is the single source of truth for field
//! offsets: the same offset is used by the interpreter's field access, by
//! [`FieldStorage`] reads and writes, and by compiler mirrors.
//!
//! Primitive values are stored little-endian in a byte buffer. References
//! reserve their slot in the buffer but live in a side table keyed by
//! offset.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::kind::JavaKind;
use crate::object::{ObjectRef, Value};

/// Bytes reserved per reference field
pub const REFERENCE_SIZE: u32 = 8;

/// Size of the instance header; the first instance field starts here
pub const OBJECT_HEADER_SIZE: u32 = 16;

/// Offset of the first static field within the statics block
pub const STATIC_BASE_OFFSET: u32 = 0;

/// Assigned offsets for one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Offset per declared field, in declaration order
    pub offsets: Vec<u32>,
    /// Instance size including superclass fields and header
    pub instance_size: u32,
    /// Size of the statics block
    pub static_size: u32,
}

fn align_up(value: u32, align: u32) -> u32 {
    if align <= 1 {
        value
    } else {
        (value + align - 1) & !(align - 1)
    }
}

/// Place `fields` (`(kind, is_static)` in declaration order) after the
/// superclass instance area
///
/// Within each area, fields are packed widest first, then by declaration
/// order, each aligned to its own width.
pub fn compute_layout(super_instance_size: u32, fields: &[(JavaKind, bool)]) -> FieldLayout {
    let mut offsets = vec![0; fields.len()];
    let mut instance_end = super_instance_size.max(OBJECT_HEADER_SIZE);
    let mut static_end = STATIC_BASE_OFFSET;

    let mut order: Vec<usize> = (0..fields.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(fields[i].0.byte_count()));

    for i in order {
        let (kind, is_static) = fields[i];
        let size = kind.byte_count().max(1);
        let end = if is_static {
            &mut static_end
        } else {
            &mut instance_end
        };
        let offset = align_up(*end, size);
        offsets[i] = offset;
        *end = offset + size;
    }

    FieldLayout {
        offsets,
        instance_size: align_up(instance_end, 8),
        static_size: align_up(static_end, 8),
    }
}

/// Raw storage for an instance or a statics block
#[derive(Debug)]
pub struct FieldStorage {
    bytes: RwLock<Vec<u8>>,
    refs: RwLock<FxHashMap<u32, ObjectRef>>,
}

impl FieldStorage {
    /// Zeroed storage of `size` bytes
    pub fn new(size: u32) -> Self {
        Self {
            bytes: RwLock::new(vec![0; size as usize]),
            refs: RwLock::new(FxHashMap::default()),
        }
    }

    /// Size in bytes
    pub fn size(&self) -> u32 {
        self.bytes.read().len() as u32
    }

    fn check(&self, offset: u32, kind: JavaKind) -> Result<(), String> {
        let width = kind.byte_count();
        if width == 0 {
            return Err(format!("cannot access a {} slot", kind));
        }
        let size = self.size();
        if offset % width != 0 || offset + width > size {
            return Err(format!(
                "{} access at offset {} outside storage of {} bytes",
                kind, offset, size
            ));
        }
        Ok(())
    }

    /// Read the value of `kind` stored at `offset`
    pub fn read(&self, offset: u32, kind: JavaKind) -> Result<Value, String> {
        self.check(offset, kind)?;
        if kind == JavaKind::Object {
            return Ok(Value::Ref(self.refs.read().get(&offset).cloned()));
        }
        let bytes = self.bytes.read();
        let at = offset as usize;
        let mut buf = [0u8; 8];
        let width = kind.byte_count() as usize;
        buf[..width].copy_from_slice(&bytes[at..at + width]);
        let value = match kind {
            JavaKind::Boolean => Value::Int((buf[0] != 0) as i32),
            JavaKind::Byte => Value::Int(buf[0] as i8 as i32),
            JavaKind::Short => Value::Int(i16::from_le_bytes([buf[0], buf[1]]) as i32),
            JavaKind::Char => Value::Int(u16::from_le_bytes([buf[0], buf[1]]) as i32),
            JavaKind::Int => Value::Int(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            JavaKind::Float => {
                Value::Float(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
            }
            JavaKind::Long => Value::Long(i64::from_le_bytes(buf)),
            JavaKind::Double => Value::Double(f64::from_le_bytes(buf)),
            _ => return Err(format!("cannot read a {} slot", kind)),
        };
        Ok(value)
    }

    /// Store `value` as `kind` at `offset`
    pub fn write(&self, offset: u32, kind: JavaKind, value: &Value) -> Result<(), String> {
        self.check(offset, kind)?;
        let encoded: Vec<u8> = match (kind, value) {
            (JavaKind::Object, Value::Ref(obj)) => {
                let mut refs = self.refs.write();
                match obj {
                    Some(obj) => refs.insert(offset, obj.clone()),
                    None => refs.remove(&offset),
                };
                return Ok(());
            }
            (JavaKind::Boolean, Value::Int(v)) => vec![(*v & 1) as u8],
            (JavaKind::Byte, Value::Int(v)) => vec![*v as u8],
            (JavaKind::Short | JavaKind::Char, Value::Int(v)) => (*v as u16).to_le_bytes().to_vec(),
            (JavaKind::Int, Value::Int(v)) => v.to_le_bytes().to_vec(),
            (JavaKind::Float, Value::Float(v)) => v.to_le_bytes().to_vec(),
            (JavaKind::Long, Value::Long(v)) => v.to_le_bytes().to_vec(),
            (JavaKind::Double, Value::Double(v)) => v.to_le_bytes().to_vec(),
            _ => return Err(format!("value {:?} does not fit a {} slot", value, kind)),
        };
        let at = offset as usize;
        self.bytes.write()[at..at + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }
}
