//! Constant pool bridge
//!
//! Reads a class's constant pool for the compiler. Lookups without
//! `resolve` only report what the interpreter already resolved; forced
//! lookups go through the interpreter's own resolution path, so the pool
//! cells only ever move from unresolved to resolved and racing callers see
//! one value.
//!
//! Operations that take an `opcode` interpret `index` the way the
//! instruction does: for `invokedynamic` it is the class's site index,
//! otherwise a constant pool index.

use std::sync::Arc;

use tracing::debug;
use vmci_runtime::bytecode::{self, INVOKEDYNAMIC};
use vmci_runtime::pool::DynamicValue;
use vmci_runtime::{
    access, well_known, ConstantPool, JavaKind, Klass, PoolEntry, PoolTag, Resolved, Symbol,
};

use crate::constant::{JavaConstant, ObjectConstant, PrimitiveConstant};
use crate::context::BridgeContext;
use crate::field::{self, FieldHandle};
use crate::method::{self, MethodHandle};
use crate::types::{self, InstanceType, TypeHandle, UnresolvedType};
use crate::{BridgeError, BridgeResult};

/// Value of a loadable constant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolConstant {
    Constant(JavaConstant),
    Type(TypeHandle),
}

/// Field referenced by an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLookup {
    Resolved(FieldHandle),
    Unresolved {
        holder: TypeHandle,
        name: Symbol,
        field_type: TypeHandle,
    },
}

/// Method referenced by an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodLookup {
    Resolved(MethodHandle),
    Unresolved {
        holder: TypeHandle,
        name: Symbol,
        signature: Symbol,
    },
}

/// Constant pool of one class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantPoolHandle {
    holder: InstanceType,
}

fn illegal_tag(index: u16, tag: Option<PoolTag>) -> BridgeError {
    match tag {
        Some(tag) => BridgeError::IllegalTag {
            index: index as u32,
            tag,
        },
        None => BridgeError::Inconsistent(format!("no entry at index {}", index)),
    }
}

/// Compiler view of a resolved dynamic constant
///
/// Sub-int values widen to `int`; a failed bootstrap is the illegal constant.
pub(crate) fn box_dynamic(value: &DynamicValue) -> JavaConstant {
    match value {
        DynamicValue::Failed(_) => JavaConstant::Illegal,
        DynamicValue::Value { kind, value } => {
            let kind = kind.stack_kind();
            match (kind, value.raw_bits()) {
                (JavaKind::Object, _) => {
                    JavaConstant::Object(ObjectConstant::wrap(value.as_object().cloned()))
                }
                (JavaKind::Int, Some(raw)) => PrimitiveConstant::int(raw as i32).into(),
                (JavaKind::Long | JavaKind::Float | JavaKind::Double, Some(raw)) => {
                    PrimitiveConstant::new(kind, raw).into()
                }
                _ => JavaConstant::Illegal,
            }
        }
    }
}

impl ConstantPoolHandle {
    pub(crate) fn new(holder: InstanceType) -> Self {
        Self { holder }
    }

    /// Class owning the pool
    pub fn holder(&self) -> InstanceType {
        self.holder
    }

    pub(crate) fn klass(&self, cx: &BridgeContext) -> Arc<Klass> {
        cx.instance_klass(&self.holder)
    }

    /// Number of entries, index 0 included
    pub fn length(&self, cx: &BridgeContext) -> usize {
        self.klass(cx).constant_pool().len()
    }

    pub(crate) fn check_index(pool: &ConstantPool, index: u32) -> BridgeResult<u16> {
        if index == 0 || index as usize >= pool.len() {
            return Err(BridgeError::IndexOutOfBounds {
                index,
                length: pool.len(),
            });
        }
        Ok(index as u16)
    }

    /// Constant pool index addressed by `index` for `opcode`
    pub(crate) fn entry_index(&self, cx: &BridgeContext, klass: &Klass, index: u32, opcode: u8) -> BridgeResult<u16> {
        if opcode == INVOKEDYNAMIC {
            let cpi = cx.indy_cpi(klass, index)?;
            Self::check_index(klass.constant_pool(), cpi as u32)
        } else {
            Self::check_index(klass.constant_pool(), index)
        }
    }

    /// Tag of the entry at `index`
    pub fn tag_at(&self, cx: &BridgeContext, index: u32) -> BridgeResult<PoolTag> {
        cx.ensure_enabled()?;
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let index = Self::check_index(pool, index)?;
        pool.tag_at(index).ok_or_else(|| illegal_tag(index, None))
    }

    pub fn lookup_utf8(&self, cx: &BridgeContext, index: u32) -> BridgeResult<Symbol> {
        cx.ensure_enabled()?;
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let index = Self::check_index(pool, index)?;
        pool.utf8_at(index)
            .cloned()
            .ok_or_else(|| illegal_tag(index, pool.tag_at(index)))
    }

    /// Name of the member or dynamic entry used by the instruction
    pub fn lookup_name(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<Symbol> {
        self.name_and_descriptor(cx, index, opcode).map(|(name, _)| name)
    }

    /// Descriptor of the member or dynamic entry used by the instruction
    pub fn lookup_signature(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<Symbol> {
        self.name_and_descriptor(cx, index, opcode).map(|(_, descriptor)| descriptor)
    }

    fn name_and_descriptor(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<(Symbol, Symbol)> {
        cx.ensure_enabled()?;
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let cpi = self.entry_index(cx, &klass, index, opcode)?;
        match pool.tag_at(cpi) {
            Some(PoolTag::FieldRef | PoolTag::MethodRef | PoolTag::InterfaceMethodRef) => pool
                .member_ref_at(cpi)
                .map(|m| (m.name.clone(), m.descriptor.clone()))
                .ok_or_else(|| BridgeError::Inconsistent(format!("malformed member reference at {}", cpi))),
            Some(PoolTag::Dynamic | PoolTag::InvokeDynamic) => pool
                .dynamic_at(cpi)
                .map(|d| (d.name.clone(), d.descriptor.clone()))
                .ok_or_else(|| BridgeError::Inconsistent(format!("malformed dynamic entry at {}", cpi))),
            Some(PoolTag::NameAndType) => pool
                .name_and_type_at(cpi)
                .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
                .ok_or_else(|| BridgeError::Inconsistent(format!("malformed name and type at {}", cpi))),
            tag => Err(illegal_tag(cpi, tag)),
        }
    }

    /// Value of the loadable constant at `index`
    ///
    /// `Ok(None)` means the entry is not resolved and `resolve` was not set.
    pub fn lookup_constant(
        &self,
        cx: &BridgeContext,
        index: u32,
        resolve: bool,
    ) -> BridgeResult<Option<PoolConstant>> {
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let cpi = Self::check_index(pool, index)?;
        let entry = pool.entry(cpi).ok_or_else(|| illegal_tag(cpi, None))?;

        let constant = match entry {
            PoolEntry::Integer(v) => PoolConstant::Constant(PrimitiveConstant::int(*v).into()),
            PoolEntry::Float(v) => PoolConstant::Constant(PrimitiveConstant::float(*v).into()),
            PoolEntry::Long(v) => PoolConstant::Constant(PrimitiveConstant::long(*v).into()),
            PoolEntry::Double(v) => PoolConstant::Constant(PrimitiveConstant::double(*v).into()),
            PoolEntry::Class { .. } => match pool.resolved_at(cpi) {
                Some(Resolved::Class(id)) => PoolConstant::Type(types::type_of(cx, &cx.klass(*id))),
                _ if resolve => {
                    debug!(class = klass.name().as_str(), index = cpi, "forcing class constant");
                    let id = rt.resolve_class(&klass, cpi)?;
                    PoolConstant::Type(types::type_of(cx, &cx.klass(id)))
                }
                _ => {
                    let name = pool
                        .class_name_at(cpi)
                        .ok_or_else(|| BridgeError::Inconsistent(format!("malformed class entry at {}", cpi)))?;
                    PoolConstant::Type(TypeHandle::Unresolved(UnresolvedType::from_class_name(name)?))
                }
            },
            PoolEntry::String { .. } => {
                let obj = match pool.resolved_at(cpi) {
                    Some(Resolved::String(obj)) => obj.clone(),
                    _ => rt.resolve_string(&klass, cpi)?,
                };
                PoolConstant::Constant(JavaConstant::Object(ObjectConstant::wrap(Some(obj))))
            }
            PoolEntry::MethodHandle { .. } | PoolEntry::MethodType { .. } => match pool.resolved_at(cpi) {
                Some(Resolved::MethodHandle(obj) | Resolved::MethodType(obj)) => {
                    PoolConstant::Constant(JavaConstant::Object(ObjectConstant::wrap(Some(obj.clone()))))
                }
                _ if resolve => {
                    return Err(BridgeError::Inconsistent(format!(
                        "{} at index {} of {} is not resolved",
                        entry.tag(),
                        cpi,
                        klass.name()
                    )))
                }
                _ => return Ok(None),
            },
            PoolEntry::Dynamic { .. } => match pool.resolved_at(cpi) {
                Some(Resolved::Dynamic(value)) => PoolConstant::Constant(box_dynamic(value)),
                _ if resolve => {
                    debug!(class = klass.name().as_str(), index = cpi, "forcing dynamic constant");
                    let outcome = rt.resolve_dynamic(&klass, cpi);
                    match (pool.resolved_at(cpi), outcome) {
                        // bootstrap failures are installed as sticky `Failed` values
                        (Some(Resolved::Dynamic(value)), _) => PoolConstant::Constant(box_dynamic(value)),
                        // malformed entry rejected before anything was installed
                        (_, Err(err)) => return Err(err.into()),
                        (_, Ok(_)) => {
                            return Err(BridgeError::Inconsistent(format!(
                                "dynamic constant at index {} of {} did not resolve",
                                cpi,
                                klass.name()
                            )))
                        }
                    }
                }
                _ => return Ok(None),
            },
            other => return Err(illegal_tag(cpi, Some(other.tag()))),
        };
        Ok(Some(constant))
    }

    /// `CONSTANT_Class` index naming the type an instruction refers to
    fn class_index(&self, pool: &ConstantPool, cpi: u16, opcode: u8) -> BridgeResult<u16> {
        let tag = pool.tag_at(cpi);
        if bytecode::references_class(opcode) || bytecode::is_ldc(opcode) {
            return match tag {
                Some(PoolTag::Class) => Ok(cpi),
                _ => Err(illegal_tag(cpi, tag)),
            };
        }
        let member_tag_fits = if bytecode::references_field(opcode) {
            tag == Some(PoolTag::FieldRef)
        } else if bytecode::references_method(opcode) {
            matches!(tag, Some(PoolTag::MethodRef | PoolTag::InterfaceMethodRef))
        } else {
            return Err(BridgeError::InvalidArgument(format!(
                "opcode {:#04x} does not reference a type",
                opcode
            )));
        };
        if !member_tag_fits {
            return Err(illegal_tag(cpi, tag));
        }
        pool.member_ref_at(cpi)
            .map(|m| m.class_index)
            .ok_or_else(|| BridgeError::Inconsistent(format!("malformed member reference at {}", cpi)))
    }

    /// Type an instruction refers to, without resolving it
    pub fn lookup_referenced_type(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<TypeHandle> {
        cx.ensure_enabled()?;
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let cpi = self.entry_index(cx, &klass, index, opcode)?;
        let class_index = self.class_index(pool, cpi, opcode)?;
        self.class_entry_type(cx, pool, class_index)
    }

    fn class_entry_type(&self, cx: &BridgeContext, pool: &ConstantPool, class_index: u16) -> BridgeResult<TypeHandle> {
        if let Some(Resolved::Class(id)) = pool.resolved_at(class_index) {
            return Ok(types::type_of(cx, &cx.klass(*id)));
        }
        let name = pool
            .class_name_at(class_index)
            .ok_or_else(|| illegal_tag(class_index, pool.tag_at(class_index)))?;
        Ok(TypeHandle::Unresolved(UnresolvedType::from_class_name(name)?))
    }

    /// Resolve the type an instruction refers to, optionally initializing it
    pub fn load_referenced_type(
        &self,
        cx: &BridgeContext,
        index: u32,
        opcode: u8,
        initialize: bool,
    ) -> BridgeResult<TypeHandle> {
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        let klass = self.klass(cx);
        let cpi = self.entry_index(cx, &klass, index, opcode)?;
        let class_index = self.class_index(klass.constant_pool(), cpi, opcode)?;
        let target = cx.klass(rt.resolve_class(&klass, class_index)?);
        if initialize && target.is_instance_klass() {
            rt.initialize(&target)?;
        }
        debug!(
            class = klass.name().as_str(),
            index = class_index,
            target = target.name().as_str(),
            "loaded referenced type"
        );
        Ok(types::type_of(cx, &target))
    }

    /// Field a field instruction refers to
    ///
    /// The field is reported resolved when the interpreter resolved the
    /// entry, or when its class is resolved and lookup plus access checking
    /// succeed; nothing is loaded or installed.
    pub fn lookup_field(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<FieldLookup> {
        cx.ensure_enabled()?;
        if !bytecode::references_field(opcode) {
            return Err(BridgeError::InvalidArgument(format!(
                "opcode {:#04x} does not reference a field",
                opcode
            )));
        }
        let rt = cx.runtime();
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let cpi = Self::check_index(pool, index)?;
        if pool.tag_at(cpi) != Some(PoolTag::FieldRef) {
            return Err(illegal_tag(cpi, pool.tag_at(cpi)));
        }
        if let Some(Resolved::Field(id)) = pool.resolved_at(cpi) {
            return Ok(FieldLookup::Resolved(field::field_of(cx, *id, None)));
        }
        let member = pool
            .member_ref_at(cpi)
            .ok_or_else(|| BridgeError::Inconsistent(format!("malformed field reference at {}", cpi)))?;
        if let Some(Resolved::Class(class_id)) = pool.resolved_at(member.class_index) {
            let found = rt
                .lookup_field(&cx.klass(*class_id), member.name, member.descriptor)
                .filter(|&id| {
                    let f = rt.field(id);
                    access::check_access(rt, &klass, &cx.klass(f.declaring()), f.flags())
                });
            if let Some(id) = found {
                return Ok(FieldLookup::Resolved(field::field_of(cx, id, None)));
            }
        }
        Ok(FieldLookup::Unresolved {
            holder: self.class_entry_type(cx, pool, member.class_index)?,
            name: member.name.clone(),
            field_type: types::lookup_type(cx, member.descriptor, &self.holder, false)?,
        })
    }

    /// Method an invoke instruction refers to
    ///
    /// For `invokedynamic` this is the linked call site's target.
    pub fn lookup_method(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<MethodLookup> {
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        let klass = self.klass(cx);
        let pool = klass.constant_pool();

        if opcode == INVOKEDYNAMIC {
            let cpi = self.entry_index(cx, &klass, index, opcode)?;
            if let Some(Resolved::CallSite(link)) = pool.resolved_at(cpi) {
                return Ok(MethodLookup::Resolved(method::method_of(cx, link.target, None)));
            }
            let site = pool
                .dynamic_at(cpi)
                .filter(|_| pool.tag_at(cpi) == Some(PoolTag::InvokeDynamic))
                .ok_or_else(|| BridgeError::Inconsistent(format!("site index {} is not an invokedynamic entry", index)))?;
            return Ok(MethodLookup::Unresolved {
                holder: TypeHandle::Instance(InstanceType::new(well_known::METHOD_HANDLE)),
                name: site.name.clone(),
                signature: site.descriptor.clone(),
            });
        }

        if !bytecode::references_method(opcode) {
            return Err(BridgeError::InvalidArgument(format!(
                "opcode {:#04x} does not reference a method",
                opcode
            )));
        }
        let cpi = Self::check_index(pool, index)?;
        let tag = pool.tag_at(cpi);
        if !matches!(tag, Some(PoolTag::MethodRef | PoolTag::InterfaceMethodRef)) {
            return Err(illegal_tag(cpi, tag));
        }
        if let Some(Resolved::Method(id)) = pool.resolved_at(cpi) {
            return Ok(MethodLookup::Resolved(method::method_of(cx, *id, None)));
        }
        let member = pool
            .member_ref_at(cpi)
            .ok_or_else(|| BridgeError::Inconsistent(format!("malformed method reference at {}", cpi)))?;
        if let Some(Resolved::Class(class_id)) = pool.resolved_at(member.class_index) {
            let target = cx.klass(*class_id);
            let found = match (tag, target.is_interface()) {
                (Some(PoolTag::InterfaceMethodRef), true) => {
                    rt.lookup_interface_method(&target, member.name, member.descriptor)
                }
                (Some(PoolTag::MethodRef), false) => rt.lookup_method(&target, member.name, member.descriptor),
                _ => None,
            };
            let found = found.filter(|&id| {
                let m = rt.method(id);
                access::check_access(rt, &klass, &cx.klass(m.declaring()), m.flags())
            });
            if let Some(id) = found {
                return Ok(MethodLookup::Resolved(method::method_of(cx, id, None)));
            }
        }
        Ok(MethodLookup::Unresolved {
            holder: self.class_entry_type(cx, pool, member.class_index)?,
            name: member.name.clone(),
            signature: member.descriptor.clone(),
        })
    }

    /// Appendix of a linked invokedynamic site
    pub fn lookup_appendix(&self, cx: &BridgeContext, index: u32, opcode: u8) -> BridgeResult<Option<ObjectConstant>> {
        cx.ensure_enabled()?;
        if opcode != INVOKEDYNAMIC {
            return Err(BridgeError::InvalidArgument(format!(
                "opcode {:#04x} has no appendix",
                opcode
            )));
        }
        let klass = self.klass(cx);
        let cpi = self.entry_index(cx, &klass, index, opcode)?;
        Ok(match klass.constant_pool().resolved_at(cpi) {
            Some(Resolved::CallSite(link)) => link.appendix.clone().map(|a| ObjectConstant::wrap(Some(a))),
            _ => None,
        })
    }
}
