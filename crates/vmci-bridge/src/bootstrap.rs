//! Bootstrap metadata recovery
//!
//! Rebuilds what a bootstrap method would receive for a dynamic constant or
//! an invokedynamic site. Static arguments are materialized, except nested
//! dynamic constants that are not resolved yet: those are left as
//! [`BootstrapArgument::PendingDynamic`] markers carrying their pool index
//! and are never resolved from here.

use tracing::debug;
use vmci_runtime::bytecode::{self, INVOKEDYNAMIC};
use vmci_runtime::object::Member;
use vmci_runtime::{JavaKind, Payload, PoolTag, Resolved, Symbol};

use crate::constant::JavaConstant;
use crate::context::BridgeContext;
use crate::method::{self, MethodHandle};
use crate::pool::{box_dynamic, ConstantPoolHandle, PoolConstant};
use crate::types::TypeHandle;
use crate::{BridgeError, BridgeResult};

/// One static argument slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapArgument {
    Constant(JavaConstant),
    Type(TypeHandle),
    /// Unresolved dynamic constant at `cpi`
    PendingDynamic { cpi: u16 },
}

impl From<PoolConstant> for BootstrapArgument {
    fn from(constant: PoolConstant) -> Self {
        match constant {
            PoolConstant::Constant(c) => BootstrapArgument::Constant(c),
            PoolConstant::Type(t) => BootstrapArgument::Type(t),
        }
    }
}

impl From<JavaConstant> for BootstrapArgument {
    fn from(constant: JavaConstant) -> Self {
        BootstrapArgument::Constant(constant)
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapInvocation {
    is_indy: bool,
    method: MethodHandle,
    name: Symbol,
    descriptor: Symbol,
    arguments: Vec<BootstrapArgument>,
    cpi: u16,
}

impl BootstrapInvocation {
    /// Call site rather than dynamic constant
    pub fn is_indy(&self) -> bool {
        self.is_indy
    }

    pub fn method(&self) -> &MethodHandle {
        &self.method
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn descriptor(&self) -> &Symbol {
        &self.descriptor
    }

    pub fn arguments(&self) -> &[BootstrapArgument] {
        &self.arguments
    }

    /// Pool index of the dynamic entry
    pub fn cpi(&self) -> u16 {
        self.cpi
    }
}

struct Identity {
    is_indy: bool,
    method: MethodHandle,
    name: Symbol,
    descriptor: Symbol,
    cpi: u16,
}

/// Collects a [`BootstrapInvocation`]
///
/// The slot count is fixed up front. Every slot is filled exactly once and
/// the bootstrap identity is set exactly once; violations panic.
pub struct BootstrapInvocationBuilder {
    slots: Vec<Option<BootstrapArgument>>,
    identity: Option<Identity>,
}

impl BootstrapInvocationBuilder {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
            identity: None,
        }
    }

    pub fn set_argument(&mut self, index: usize, argument: impl Into<BootstrapArgument>) -> &mut Self {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .unwrap_or_else(|| panic!("argument slot {} out of range for {} slots", index, count));
        assert!(slot.is_none(), "argument slot {} is already set", index);
        *slot = Some(argument.into());
        self
    }

    pub fn set_pending_dynamic(&mut self, index: usize, cpi: u16) -> &mut Self {
        self.set_argument(index, BootstrapArgument::PendingDynamic { cpi })
    }

    pub fn set_bootstrap(
        &mut self,
        is_indy: bool,
        method: MethodHandle,
        name: Symbol,
        descriptor: Symbol,
        cpi: u16,
    ) -> &mut Self {
        assert!(self.identity.is_none(), "bootstrap method is already set");
        self.identity = Some(Identity {
            is_indy,
            method,
            name,
            descriptor,
            cpi,
        });
        self
    }

    pub fn build(self) -> BootstrapInvocation {
        let identity = self
            .identity
            .unwrap_or_else(|| panic!("bootstrap method was never set"));
        let arguments = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.unwrap_or_else(|| panic!("argument slot {} was never set", i)))
            .collect();
        BootstrapInvocation {
            is_indy: identity.is_indy,
            method: identity.method,
            name: identity.name,
            descriptor: identity.descriptor,
            arguments,
            cpi: identity.cpi,
        }
    }
}

impl ConstantPoolHandle {
    /// Bootstrap invocation behind an `ldc` of a dynamic constant or an
    /// `invokedynamic` site
    ///
    /// `Ok(None)` when an `ldc` index names something other than a dynamic
    /// constant. The bootstrap method handle is resolved; loading failures
    /// propagate.
    pub fn lookup_bootstrap_invocation(
        &self,
        cx: &BridgeContext,
        index: u32,
        opcode: u8,
    ) -> BridgeResult<Option<BootstrapInvocation>> {
        let is_indy = match opcode {
            INVOKEDYNAMIC => true,
            op if bytecode::is_ldc(op) => false,
            op => {
                return Err(BridgeError::InvalidArgument(format!(
                    "opcode {:#04x} has no bootstrap method",
                    op
                )))
            }
        };
        cx.ensure_enabled()?;
        let rt = cx.runtime();
        let klass = self.klass(cx);
        let pool = klass.constant_pool();
        let cpi = self.entry_index(cx, &klass, index, opcode)?;
        match (pool.tag_at(cpi), is_indy) {
            (Some(PoolTag::InvokeDynamic), true) | (Some(PoolTag::Dynamic), false) => {}
            (_, false) => return Ok(None),
            (tag, true) => {
                return Err(BridgeError::Inconsistent(format!(
                    "invokedynamic site {} points at {:?} entry {}",
                    index, tag, cpi
                )))
            }
        }

        let dynamic = pool
            .dynamic_at(cpi)
            .ok_or_else(|| BridgeError::Inconsistent(format!("malformed dynamic entry at {}", cpi)))?;
        let bsm = pool.bootstrap_method(dynamic.bsm_index).ok_or_else(|| {
            BridgeError::Inconsistent(format!(
                "bootstrap method {} of entry {} is missing",
                dynamic.bsm_index, cpi
            ))
        })?;
        let handle = rt.resolve_method_handle(&klass, bsm.method_handle_index)?;
        let method = match handle.payload() {
            Payload::MethodHandle {
                member: Member::Method(id),
                ..
            } => method::method_of(cx, *id, None),
            _ => {
                return Err(BridgeError::Inconsistent(format!(
                    "bootstrap method handle at {} does not name a method",
                    bsm.method_handle_index
                )))
            }
        };

        let mut builder = BootstrapInvocationBuilder::new(bsm.arguments.len());
        for (slot, &arg) in bsm.arguments.iter().enumerate() {
            match pool.tag_at(arg) {
                Some(PoolTag::Dynamic) => match pool.resolved_at(arg) {
                    Some(Resolved::Dynamic(value)) => {
                        builder.set_argument(slot, box_dynamic(value));
                    }
                    _ => {
                        builder.set_pending_dynamic(slot, arg);
                    }
                },
                Some(PoolTag::MethodHandle | PoolTag::MethodType) => {
                    let value = rt.resolve_loadable(&klass, arg)?;
                    builder.set_argument(slot, JavaConstant::from_value(JavaKind::Object, &value));
                }
                _ => {
                    let constant = self.lookup_constant(cx, arg as u32, true)?.ok_or_else(|| {
                        BridgeError::Inconsistent(format!("static argument {} did not resolve", arg))
                    })?;
                    builder.set_argument(slot, constant);
                }
            }
        }
        builder.set_bootstrap(is_indy, method, dynamic.name.clone(), dynamic.descriptor.clone(), cpi);

        debug!(
            class = klass.name().as_str(),
            cpi,
            indy = is_indy,
            arguments = bsm.arguments.len(),
            "recovered bootstrap invocation"
        );
        Ok(Some(builder.build()))
    }
}
