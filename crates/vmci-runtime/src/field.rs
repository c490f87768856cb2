//! Field records

use std::sync::Arc;

use parking_lot::RwLock;

use crate::class::KlassId;
use crate::flags::AccessFlags;
use crate::kind::JavaKind;
use crate::object::Value;
use crate::symbol::Symbol;

/// Stable identity of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u32);

impl FieldId {
    pub fn from_raw(raw: u32) -> Self {
        FieldId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Immutable field record
#[derive(Debug)]
pub struct Field {
    id: FieldId,
    declaring: KlassId,
    name: Symbol,
    descriptor: Symbol,
    flags: AccessFlags,
    kind: JavaKind,
    offset: u32,
    constant_value: Option<Value>,
}

impl Field {
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Class declaring this field
    pub fn declaring(&self) -> KlassId {
        self.declaring
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    /// Type descriptor of the field
    pub fn descriptor(&self) -> &Symbol {
        &self.descriptor
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    pub fn kind(&self) -> JavaKind {
        self.kind
    }

    /// Storage offset assigned by the layout
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    /// `ConstantValue` attribute of a static final field
    pub fn constant_value(&self) -> Option<&Value> {
        self.constant_value.as_ref()
    }
}

/// Everything needed to allocate a field record
pub(crate) struct FieldSpec {
    pub declaring: KlassId,
    pub name: Symbol,
    pub descriptor: Symbol,
    pub flags: AccessFlags,
    pub kind: JavaKind,
    pub offset: u32,
    pub constant_value: Option<Value>,
}

/// Append-only arena of fields
#[derive(Debug, Default)]
pub struct FieldArena {
    fields: RwLock<Vec<Arc<Field>>>,
}

impl FieldArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&self, spec: FieldSpec) -> FieldId {
        let mut fields = self.fields.write();
        let id = FieldId(fields.len() as u32);
        fields.push(Arc::new(Field {
            id,
            declaring: spec.declaring,
            name: spec.name,
            descriptor: spec.descriptor,
            flags: spec.flags,
            kind: spec.kind,
            offset: spec.offset,
            constant_value: spec.constant_value,
        }));
        id
    }

    pub fn get(&self, id: FieldId) -> Option<Arc<Field>> {
        self.fields.read().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}
