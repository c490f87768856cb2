//! Dispatch resolution
//!
//! Answers which implementation a virtual or interface call on a given
//! receiver type reaches. Every path that cannot prove a single target
//! returns `None`; the compiler then keeps the call virtual.

use tracing::trace;
use vmci_runtime::access;

use crate::context::BridgeContext;
use crate::method::{self, MethodHandle};
use crate::types::{InstanceType, TypeHandle};
use crate::{BridgeError, BridgeResult};

/// Implementation of `method` selected for calls on `receiver`
///
/// `receiver` must be a resolved reference type. No resolution is found for
/// signature-polymorphic or static methods, for unlinked or interface
/// receivers, or when `accessing` cannot see `method`.
pub fn resolve_method(
    cx: &BridgeContext,
    receiver: &TypeHandle,
    method: &MethodHandle,
    accessing: &InstanceType,
) -> BridgeResult<Option<MethodHandle>> {
    cx.ensure_enabled()?;
    let receiver_klass = match receiver {
        TypeHandle::Instance(_) | TypeHandle::Array(_) => receiver.klass(cx),
        _ => None,
    }
    .ok_or_else(|| BridgeError::InvalidArgument(format!("receiver {:?} is not a resolved reference type", receiver)))?;

    let resolved = select(cx, &receiver_klass, method, accessing);
    if cx.config().trace_resolution {
        let rt = cx.runtime();
        let m = method.method(cx);
        let target = format!("{}.{}{}", rt.klass(m.declaring()).name(), m.name(), m.signature());
        trace!(
            receiver = receiver_klass.name().as_str(),
            method = target.as_str(),
            resolved = ?resolved,
            "resolve_method"
        );
    }
    Ok(resolved.map(|found| holder_for(cx, found, receiver, accessing)))
}

fn select(
    cx: &BridgeContext,
    receiver: &vmci_runtime::Klass,
    method: &MethodHandle,
    accessing: &InstanceType,
) -> Option<vmci_runtime::MethodId> {
    let rt = cx.runtime();
    let m = method.method(cx);
    if rt.is_signature_polymorphic(&m) || !receiver.is_linked() || receiver.is_interface() || m.is_static() {
        return None;
    }

    let declaring = cx.klass(m.declaring());
    if !access::check_access(rt, &cx.instance_klass(accessing), &declaring, m.flags()) {
        return None;
    }
    if m.is_private() {
        return Some(m.id());
    }

    if !rt.is_assignable(&declaring, receiver) {
        return None;
    }
    if declaring.is_interface() {
        let found = receiver.itable_lookup_or_null(declaring.id(), m.itable_index())?;
        rt.method(found).is_public().then_some(found)
    } else {
        receiver.vtable_lookup(m.vtable_index())
    }
}

/// Mirror for `found`, reusing a holder the caller already has
fn holder_for(
    cx: &BridgeContext,
    found: vmci_runtime::MethodId,
    receiver: &TypeHandle,
    accessing: &InstanceType,
) -> MethodHandle {
    let rt = cx.runtime();
    let declaring = rt.method(rt.method(found).identity()).declaring();
    let holder = match receiver.as_instance() {
        Some(r) if r.klass_id() == declaring => Some(*r),
        _ if accessing.klass_id() == declaring => Some(*accessing),
        _ => None,
    };
    method::method_of(cx, found, holder.as_ref())
}

/// Vtable slot holding the class-level implementation of interface method
/// `method` in `resolved`, or `-1`
///
/// Slots taken by default, miranda or conflict copies count as not
/// applicable.
pub fn interface_vtable_index(cx: &BridgeContext, method: &MethodHandle, resolved: &InstanceType) -> BridgeResult<i32> {
    cx.ensure_enabled()?;
    let rt = cx.runtime();
    let m = method.method(cx);
    if !m.is_interface_method() {
        return Ok(-1);
    }
    Ok(cx
        .instance_klass(resolved)
        .itable_lookup_or_null(m.declaring(), m.itable_index())
        .map(|found| rt.method(found))
        .filter(|implementation| !implementation.is_interface_method())
        .map_or(-1, |implementation| implementation.vtable_index()))
}
