//! Dispatch table construction
//!
//! The vtable of a class starts as a copy of its superclass's vtable.
//! Declared methods that override an inherited entry take over its slot;
//! all other virtual methods are appended. Interface methods without a
//! class implementation get a copy placed in the vtable:
//!
//! - a default copy when exactly one maximally specific default exists,
//! - a poison pill when several conflicting defaults exist,
//! - a miranda (abstract) copy when there is no default at all.
//!
//! Each interface the class implements then gets an itable entry mapping
//! the interface's itable slots to the selected implementations.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::access;
use crate::class::{ItableEntry, Klass, KlassId};
use crate::method::{Method, MethodId, MethodOrigin};
use crate::runtime::Runtime;
use crate::symbol::Symbol;
use crate::{LinkageError, RuntimeResult};

type SignatureKey = (Symbol, Symbol);

fn key_of(method: &Method) -> SignatureKey {
    (method.name().clone(), method.signature().clone())
}

/// Whether `method` declared in `klass` overrides the inherited `existing`
fn can_override(klass: &Klass, existing: &Method, existing_holder: &Klass) -> bool {
    if existing.is_private() {
        return false;
    }
    if existing.is_public() || existing.flags().is_protected() {
        return true;
    }
    access::same_package(klass, existing_holder)
}

/// Build vtable and itable for `klass`; supertypes must already be linked
pub(crate) fn build_tables(
    rt: &Runtime,
    klass: &Klass,
) -> RuntimeResult<(Vec<MethodId>, Vec<ItableEntry>)> {
    let mut vtable: Vec<MethodId> = match klass.super_klass() {
        Some(super_id) => rt
            .klass(super_id)
            .vtable()
            .map(<[_]>::to_vec)
            .unwrap_or_default(),
        None => Vec::new(),
    };

    if klass.is_interface() {
        return Ok((vtable, Vec::new()));
    }

    let inherited = vtable.len();
    for &id in klass.methods() {
        let method = rt.method(id);
        if !method.is_virtual() {
            continue;
        }
        let mut slot = None;
        for (index, entry) in vtable.iter_mut().enumerate().take(inherited) {
            let existing = rt.method(*entry);
            if !existing.same_signature(&method) {
                continue;
            }
            let holder = rt.klass(existing.declaring());
            if !can_override(klass, &existing, &holder) {
                continue;
            }
            if existing.is_final() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "class {} overrides final method {}.{}{}",
                    crate::descriptor::to_java_name(klass.name()),
                    crate::descriptor::to_java_name(holder.name()),
                    existing.name(),
                    existing.signature()
                )));
            }
            *entry = id;
            slot.get_or_insert(index);
        }
        let slot = match slot {
            Some(slot) => slot,
            None => {
                vtable.push(id);
                vtable.len() - 1
            }
        };
        method.set_vtable_index(slot as i32);
    }

    let interfaces = rt.all_interfaces(klass);
    let mut copies: FxHashMap<SignatureKey, MethodId> = FxHashMap::default();
    let mut itable = Vec::with_capacity(interfaces.len());
    for &iface_id in &interfaces {
        let iface = rt.klass(iface_id);
        let mut slots: Vec<(i32, MethodId)> = Vec::new();
        for &id in iface.methods() {
            let declared = rt.method(id);
            if declared.itable_index() < 0 {
                continue;
            }
            let selected = select(rt, &interfaces, &mut vtable, &mut copies, &declared);
            slots.push((declared.itable_index(), selected));
        }
        slots.sort_by_key(|(index, _)| *index);
        itable.push(ItableEntry {
            interface: iface_id,
            methods: slots.into_iter().map(|(_, id)| id).collect(),
        });
    }

    trace!(
        class = klass.name().as_str(),
        vtable = vtable.len(),
        interfaces = itable.len(),
        copies = copies.len(),
        "built dispatch tables"
    );
    Ok((vtable, itable))
}

/// Implementation of `declared` (an interface method) for the class whose
/// vtable is being built
fn select(
    rt: &Runtime,
    interfaces: &[KlassId],
    vtable: &mut Vec<MethodId>,
    copies: &mut FxHashMap<SignatureKey, MethodId>,
    declared: &Method,
) -> MethodId {
    let mut inherited_copy = None;
    for (slot, &id) in vtable.iter().enumerate() {
        let candidate = rt.method(id);
        if !candidate.same_signature(declared) {
            continue;
        }
        if candidate.origin() == MethodOrigin::Declared && !candidate.is_interface_method() {
            return id;
        }
        inherited_copy = Some(slot);
    }

    let key = key_of(declared);
    if let Some(&id) = copies.get(&key) {
        return id;
    }

    let defaults = maximally_specific_defaults(rt, interfaces, declared);
    let (origin, source) = match defaults.as_slice() {
        [] => (MethodOrigin::Miranda, rt.method(declared.id())),
        [only] => (MethodOrigin::DefaultCopy, only.clone()),
        [first, ..] => (MethodOrigin::PoisonPill, first.clone()),
    };

    if let Some(slot) = inherited_copy {
        let existing = rt.method(vtable[slot]);
        if existing.identity() == source.identity() && existing.origin() == origin {
            copies.insert(key, existing.id());
            return existing.id();
        }
    }

    let copy = rt.method_arena().alloc_copy(&source, origin);
    let slot = match inherited_copy {
        Some(slot) => {
            vtable[slot] = copy;
            slot
        }
        None => {
            vtable.push(copy);
            vtable.len() - 1
        }
    };
    rt.method(copy).set_vtable_index(slot as i32);
    copies.insert(key, copy);
    copy
}

/// Non-abstract methods among the maximally specific superinterface
/// methods matching `declared`
fn maximally_specific_defaults(
    rt: &Runtime,
    interfaces: &[KlassId],
    declared: &Method,
) -> Vec<Arc<Method>> {
    let candidates: Vec<Arc<Method>> = interfaces
        .iter()
        .flat_map(|&iface| rt.klass(iface).methods().to_vec())
        .map(|id| rt.method(id))
        .filter(|m| m.same_signature(declared) && !m.is_static() && !m.is_private())
        .collect();

    let is_more_specific = |sub: KlassId, sup: KlassId| {
        sub != sup && rt.all_interfaces(&rt.klass(sub)).contains(&sup)
    };

    candidates
        .iter()
        .filter(|m| {
            !candidates
                .iter()
                .any(|other| is_more_specific(other.declaring(), m.declaring()))
        })
        .filter(|m| !m.is_abstract())
        .cloned()
        .collect()
}
