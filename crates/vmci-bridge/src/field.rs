//! Field mirrors
//!
//! The offset carried by a [`FieldHandle`] is the one the storage layout
//! assigned when the class was defined; reads through the handle go to the
//! same storage at the same offset the interpreter uses.

use std::sync::Arc;

use vmci_runtime::{AccessFlags, Field, FieldId, JavaKind, Symbol};

use crate::constant::{JavaConstant, ObjectConstant};
use crate::context::BridgeContext;
use crate::types::{self, InstanceType, TypeHandle, UnresolvedType};
use crate::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    field: FieldId,
    holder: InstanceType,
    offset: u32,
}

/// Mirror of `field`; a supplied `holder` must mirror its declaring class
pub fn to_field(cx: &BridgeContext, field: FieldId, holder: Option<&InstanceType>) -> BridgeResult<FieldHandle> {
    cx.ensure_enabled()?;
    Ok(field_of(cx, field, holder))
}

pub(crate) fn field_of(cx: &BridgeContext, field: FieldId, holder: Option<&InstanceType>) -> FieldHandle {
    let f = cx.runtime().field(field);
    let holder = match holder {
        Some(holder) => *holder,
        None => InstanceType::new(f.declaring()),
    };
    assert_eq!(
        holder.klass_id(),
        f.declaring(),
        "holder of field {} is not its declaring class",
        f.name()
    );
    FieldHandle {
        field,
        holder,
        offset: f.offset(),
    }
}

impl FieldHandle {
    /// Runtime identity
    pub fn id(&self) -> FieldId {
        self.field
    }

    /// Declaring class
    pub fn holder(&self) -> InstanceType {
        self.holder
    }

    /// Storage offset within the instance or the statics block
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Runtime record
    pub fn field(&self, cx: &BridgeContext) -> Arc<Field> {
        cx.runtime().field(self.field)
    }

    pub fn name(&self, cx: &BridgeContext) -> Symbol {
        self.field(cx).name().clone()
    }

    /// Modifiers visible to the compiler
    pub fn modifiers(&self, cx: &BridgeContext) -> AccessFlags {
        self.field(cx).flags().intersection(AccessFlags::JVM_MODIFIERS)
    }

    pub fn is_static(&self, cx: &BridgeContext) -> bool {
        self.field(cx).is_static()
    }

    pub fn is_final(&self, cx: &BridgeContext) -> bool {
        self.field(cx).flags().is_final()
    }

    /// Generated by the source compiler
    pub fn is_synthetic(&self, cx: &BridgeContext) -> bool {
        self.field(cx).flags().is_synthetic()
    }

    /// Storage kind of the declared type
    pub fn java_kind(&self, cx: &BridgeContext) -> JavaKind {
        self.field(cx).kind()
    }

    /// Declared type, without loading it
    ///
    /// A loaded type is returned resolved. Otherwise `hint` comes back
    /// unchanged when it names the declared type, else a fresh unresolved
    /// handle is created.
    pub fn field_type(&self, cx: &BridgeContext, hint: Option<&UnresolvedType>) -> BridgeResult<TypeHandle> {
        cx.ensure_enabled()?;
        let f = self.field(cx);
        let descriptor = f.descriptor().as_str();
        if let Some(kind) = JavaKind::from_descriptor(descriptor).filter(|k| k.is_primitive()) {
            return Ok(TypeHandle::Primitive(cx.primitive(kind)));
        }
        let loader = cx.instance_klass(&self.holder).loader();
        if let Some(klass) = cx.runtime().find_loaded(descriptor, loader) {
            return Ok(types::type_of(cx, &klass));
        }
        Ok(match hint {
            Some(hint) if hint.descriptor() == descriptor => TypeHandle::Unresolved(hint.clone()),
            _ => TypeHandle::Unresolved(UnresolvedType::new_unchecked(descriptor)),
        })
    }

    /// Current value of a static field; `None` until its class is initialized
    pub fn read_static(&self, cx: &BridgeContext) -> BridgeResult<Option<JavaConstant>> {
        cx.ensure_enabled()?;
        let f = self.field(cx);
        if !f.is_static() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} is not a static field",
                f.name()
            )));
        }
        let klass = cx.instance_klass(&self.holder);
        if !klass.is_initialized() {
            return Ok(None);
        }
        let value = klass
            .statics()
            .read(self.offset, f.kind())
            .map_err(BridgeError::InvalidArgument)?;
        Ok(Some(JavaConstant::from_value(f.kind(), &value)))
    }

    /// Current value of this instance field in `receiver`
    pub fn read_instance(&self, cx: &BridgeContext, receiver: &ObjectConstant) -> BridgeResult<JavaConstant> {
        cx.ensure_enabled()?;
        let f = self.field(cx);
        if f.is_static() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} is a static field",
                f.name()
            )));
        }
        let obj = receiver
            .unwrap()
            .ok_or_else(|| BridgeError::InvalidArgument("null receiver".to_string()))?;
        let rt = cx.runtime();
        let declaring = cx.instance_klass(&self.holder);
        if !rt.is_assignable(&declaring, &cx.klass(obj.klass())) {
            return Err(BridgeError::InvalidArgument(format!(
                "receiver is not an instance of {}",
                declaring.name()
            )));
        }
        let storage = obj.fields().ok_or_else(|| {
            BridgeError::InvalidArgument("receiver has no instance fields".to_string())
        })?;
        let value = storage
            .read(self.offset, f.kind())
            .map_err(BridgeError::InvalidArgument)?;
        Ok(JavaConstant::from_value(f.kind(), &value))
    }
}
