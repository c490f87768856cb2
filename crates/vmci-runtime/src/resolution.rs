//! Constant pool resolution
//!
//! These are the interpreter's own resolution paths. Each one returns the
//! cached value when the entry is already resolved; otherwise it computes
//! the value without holding any pool lock and installs it, adopting
//! whatever value a racing resolver installed first.
//!
//! Failures are not cached, except for dynamic constants whose bootstrap
//! failure is recorded and replayed on every later attempt.

use tracing::{debug, trace};

use crate::access;
use crate::class::{Klass, KlassId};
use crate::descriptor;
use crate::field::FieldId;
use crate::kind::JavaKind;
use crate::method::MethodId;
use crate::object::{CallSiteLink, Member, ObjectRef, Payload, Value};
use crate::pool::{
    DynamicValue, PoolEntry, PoolTag, Resolved, REF_GET_STATIC, REF_INVOKE_STATIC, REF_PUT_STATIC,
};
use crate::runtime::{well_known, BootstrapRequest, Runtime};
use crate::{LinkageError, RuntimeResult};

/// Nesting limit for dynamic constants used as bootstrap arguments
const MAX_DYNAMIC_DEPTH: usize = 64;

fn bad_entry(holder: &Klass, index: u16, expected: &str) -> LinkageError {
    LinkageError::ClassFormat(format!(
        "constant pool index {} of {} is not a {}",
        index,
        descriptor::to_java_name(holder.name()),
        expected
    ))
}

fn member_name(klass: &Klass, name: &str) -> String {
    format!("{}.{}", descriptor::to_java_name(klass.name()), name)
}

impl Runtime {
    /// Field named `name` with `descriptor` in `klass`, its superinterfaces
    /// or its superclasses
    pub fn lookup_field(&self, klass: &Klass, name: &str, descriptor: &str) -> Option<FieldId> {
        let declared = klass.fields().iter().copied().find(|&id| {
            let f = self.field(id);
            f.name().as_str() == name && f.descriptor().as_str() == descriptor
        });
        if declared.is_some() {
            return declared;
        }
        for &iface in klass.interfaces() {
            if let Some(found) = self.lookup_field(&self.klass(iface), name, descriptor) {
                return Some(found);
            }
        }
        let super_id = klass.super_klass()?;
        self.lookup_field(&self.klass(super_id), name, descriptor)
    }

    /// Method resolution against a class
    pub fn lookup_method(&self, klass: &Klass, name: &str, signature: &str) -> Option<MethodId> {
        if klass.id() == well_known::METHOD_HANDLE || klass.id() == well_known::VAR_HANDLE {
            let mut polymorphic = klass
                .methods()
                .iter()
                .copied()
                .filter(|&id| self.method(id).name().as_str() == name);
            if let (Some(id), None) = (polymorphic.next(), polymorphic.next()) {
                if self.is_signature_polymorphic(&self.method(id)) {
                    return Some(id);
                }
            }
        }

        let mut current = Some(klass.id());
        while let Some(id) = current {
            let k = self.klass(id);
            if let Some(found) = self.declared_method(&k, name, signature) {
                return Some(found);
            }
            current = k.super_klass();
        }
        self.lookup_superinterface_method(klass, name, signature)
    }

    /// Method resolution against an interface
    pub fn lookup_interface_method(&self, iface: &Klass, name: &str, signature: &str) -> Option<MethodId> {
        if let Some(found) = self.declared_method(iface, name, signature) {
            return Some(found);
        }
        let object = self.object_klass();
        if let Some(found) = self.declared_method(&object, name, signature) {
            let m = self.method(found);
            if m.is_public() && !m.is_static() {
                return Some(found);
            }
        }
        self.lookup_superinterface_method(iface, name, signature)
    }

    /// Prefers a unique non-abstract maximally specific method, then any
    fn lookup_superinterface_method(&self, klass: &Klass, name: &str, signature: &str) -> Option<MethodId> {
        let interfaces = self.all_interfaces(klass);
        let candidates: Vec<MethodId> = interfaces
            .iter()
            .filter_map(|&iface| self.declared_method(&self.klass(iface), name, signature))
            .filter(|&id| {
                let m = self.method(id);
                !m.is_private() && !m.is_static()
            })
            .collect();
        let maximal: Vec<MethodId> = candidates
            .iter()
            .copied()
            .filter(|&id| {
                let declaring = self.method(id).declaring();
                !candidates.iter().any(|&other| {
                    let other_declaring = self.method(other).declaring();
                    other_declaring != declaring
                        && self
                            .all_interfaces(&self.klass(other_declaring))
                            .contains(&declaring)
                })
            })
            .collect();
        let mut concrete = maximal.iter().copied().filter(|&id| !self.method(id).is_abstract());
        match (concrete.next(), concrete.next()) {
            (Some(only), None) => Some(only),
            _ => candidates.first().copied(),
        }
    }

    /// Resolve the `CONSTANT_Class` at `index` of `holder`'s pool
    pub fn resolve_class(&self, holder: &Klass, index: u16) -> RuntimeResult<KlassId> {
        let pool = holder.constant_pool();
        if let Some(Resolved::Class(id)) = pool.resolved_at(index) {
            return Ok(*id);
        }
        let name = pool
            .class_name_at(index)
            .ok_or_else(|| bad_entry(holder, index, "class"))?;
        let target = self.load_class(&descriptor::class_name_to_descriptor(name), holder.loader())?;
        if !access::is_class_accessible(self, holder, &target) {
            return Err(LinkageError::IllegalAccess(format!(
                "failed to access class {} from class {}",
                descriptor::to_java_name(target.name()),
                descriptor::to_java_name(holder.name())
            )));
        }
        debug!(
            holder = holder.name().as_str(),
            index,
            class = target.name().as_str(),
            "resolved class"
        );
        match pool.install(index, Resolved::Class(target.id())) {
            Some(Resolved::Class(id)) => Ok(*id),
            _ => Ok(target.id()),
        }
    }

    /// Resolve the `CONSTANT_String` at `index`
    pub fn resolve_string(&self, holder: &Klass, index: u16) -> RuntimeResult<ObjectRef> {
        let pool = holder.constant_pool();
        if let Some(Resolved::String(obj)) = pool.resolved_at(index) {
            return Ok(obj.clone());
        }
        let text = pool
            .string_at(index)
            .ok_or_else(|| bad_entry(holder, index, "string"))?;
        let obj = self.intern_string(text);
        match pool.install(index, Resolved::String(obj.clone())) {
            Some(Resolved::String(winner)) => Ok(winner.clone()),
            _ => Ok(obj),
        }
    }

    /// Resolve the `CONSTANT_Fieldref` at `index`
    pub fn resolve_field_ref(&self, holder: &Klass, index: u16) -> RuntimeResult<FieldId> {
        let pool = holder.constant_pool();
        if let Some(Resolved::Field(id)) = pool.resolved_at(index) {
            return Ok(*id);
        }
        if pool.tag_at(index) != Some(PoolTag::FieldRef) {
            return Err(bad_entry(holder, index, "field reference"));
        }
        let member = pool
            .member_ref_at(index)
            .ok_or_else(|| bad_entry(holder, index, "field reference"))?;
        let klass = self.klass(self.resolve_class(holder, member.class_index)?);
        let found = self
            .lookup_field(&klass, member.name, member.descriptor)
            .ok_or_else(|| LinkageError::NoSuchField(member_name(&klass, member.name)))?;
        let field = self.field(found);
        let declaring = self.klass(field.declaring());
        if !access::check_access(self, holder, &declaring, field.flags()) {
            return Err(LinkageError::IllegalAccess(format!(
                "class {} tried to access field {}",
                descriptor::to_java_name(holder.name()),
                member_name(&declaring, field.name())
            )));
        }
        match pool.install(index, Resolved::Field(found)) {
            Some(Resolved::Field(id)) => Ok(*id),
            _ => Ok(found),
        }
    }

    /// Resolve the `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref` at `index`
    pub fn resolve_method_ref(&self, holder: &Klass, index: u16) -> RuntimeResult<MethodId> {
        let pool = holder.constant_pool();
        if let Some(Resolved::Method(id)) = pool.resolved_at(index) {
            return Ok(*id);
        }
        let tag = pool.tag_at(index);
        if tag != Some(PoolTag::MethodRef) && tag != Some(PoolTag::InterfaceMethodRef) {
            return Err(bad_entry(holder, index, "method reference"));
        }
        let member = pool
            .member_ref_at(index)
            .ok_or_else(|| bad_entry(holder, index, "method reference"))?;
        let klass = self.klass(self.resolve_class(holder, member.class_index)?);

        let found = if tag == Some(PoolTag::InterfaceMethodRef) {
            if !klass.is_interface() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "Found class {}, but interface was expected",
                    descriptor::to_java_name(klass.name())
                )));
            }
            self.lookup_interface_method(&klass, member.name, member.descriptor)
        } else {
            if klass.is_interface() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "Found interface {}, but class was expected",
                    descriptor::to_java_name(klass.name())
                )));
            }
            self.lookup_method(&klass, member.name, member.descriptor)
        };
        let found = found.ok_or_else(|| {
            LinkageError::NoSuchMethod(format!(
                "{}{}",
                member_name(&klass, member.name),
                member.descriptor
            ))
        })?;

        let method = self.method(found);
        let declaring = self.klass(method.declaring());
        if !access::check_access(self, holder, &declaring, method.flags()) {
            return Err(LinkageError::IllegalAccess(format!(
                "class {} tried to access method {}{}",
                descriptor::to_java_name(holder.name()),
                member_name(&declaring, method.name()),
                method.signature()
            )));
        }
        debug!(
            holder = holder.name().as_str(),
            index,
            method = method.name().as_str(),
            "resolved method reference"
        );
        match pool.install(index, Resolved::Method(found)) {
            Some(Resolved::Method(id)) => Ok(*id),
            _ => Ok(found),
        }
    }

    /// Resolve the `CONSTANT_MethodHandle` at `index` to a direct method handle
    pub fn resolve_method_handle(&self, holder: &Klass, index: u16) -> RuntimeResult<ObjectRef> {
        let pool = holder.constant_pool();
        if let Some(Resolved::MethodHandle(obj)) = pool.resolved_at(index) {
            return Ok(obj.clone());
        }
        let (ref_kind, ref_index) = match pool.entry(index) {
            Some(PoolEntry::MethodHandle {
                ref_kind,
                ref_index,
            }) => (*ref_kind, *ref_index),
            _ => return Err(bad_entry(holder, index, "method handle")),
        };
        let member = match ref_kind {
            1..=4 => {
                let id = self.resolve_field_ref(holder, ref_index)?;
                let wants_static = ref_kind == REF_GET_STATIC || ref_kind == REF_PUT_STATIC;
                let field = self.field(id);
                if field.is_static() != wants_static {
                    return Err(LinkageError::IncompatibleClassChange(format!(
                        "method handle kind {} does not match field {}",
                        ref_kind,
                        field.name()
                    )));
                }
                Member::Field(id)
            }
            5..=9 => {
                let id = self.resolve_method_ref(holder, ref_index)?;
                let method = self.method(id);
                if method.is_static() != (ref_kind == REF_INVOKE_STATIC) {
                    return Err(LinkageError::IncompatibleClassChange(format!(
                        "method handle kind {} does not match method {}",
                        ref_kind,
                        method.name()
                    )));
                }
                Member::Method(id)
            }
            _ => return Err(bad_entry(holder, index, "method handle with a valid kind")),
        };
        let obj = ObjectRef::new(
            well_known::METHOD_HANDLE,
            Payload::MethodHandle { ref_kind, member },
        );
        match pool.install(index, Resolved::MethodHandle(obj.clone())) {
            Some(Resolved::MethodHandle(winner)) => Ok(winner.clone()),
            _ => Ok(obj),
        }
    }

    /// Resolve the `CONSTANT_MethodType` at `index`; the types it mentions are loaded
    pub fn resolve_method_type(&self, holder: &Klass, index: u16) -> RuntimeResult<ObjectRef> {
        let pool = holder.constant_pool();
        if let Some(Resolved::MethodType(obj)) = pool.resolved_at(index) {
            return Ok(obj.clone());
        }
        let signature = pool
            .method_type_at(index)
            .ok_or_else(|| bad_entry(holder, index, "method type"))?;
        let parsed = descriptor::parse_signature(signature)
            .ok_or_else(|| bad_entry(holder, index, "well-formed method type"))?;
        for ty in parsed.parameters.iter().chain(std::iter::once(&parsed.return_type)) {
            if descriptor::is_reference_descriptor(ty) {
                self.load_class(ty, holder.loader())?;
            }
        }
        let obj = ObjectRef::new(well_known::METHOD_TYPE, Payload::MethodType(signature.clone()));
        match pool.install(index, Resolved::MethodType(obj.clone())) {
            Some(Resolved::MethodType(winner)) => Ok(winner.clone()),
            _ => Ok(obj),
        }
    }

    /// Value of the loadable constant at `index`, resolving it if needed
    pub fn resolve_loadable(&self, holder: &Klass, index: u16) -> RuntimeResult<Value> {
        self.resolve_loadable_at(holder, index, 0)
    }

    fn resolve_loadable_at(&self, holder: &Klass, index: u16, depth: usize) -> RuntimeResult<Value> {
        let pool = holder.constant_pool();
        match pool.entry(index) {
            Some(PoolEntry::Integer(v)) => Ok(Value::Int(*v)),
            Some(PoolEntry::Float(v)) => Ok(Value::Float(*v)),
            Some(PoolEntry::Long(v)) => Ok(Value::Long(*v)),
            Some(PoolEntry::Double(v)) => Ok(Value::Double(*v)),
            Some(PoolEntry::Class { .. }) => {
                let klass = self.klass(self.resolve_class(holder, index)?);
                Ok(Value::Ref(Some(self.mirror_of(&klass))))
            }
            Some(PoolEntry::String { .. }) => Ok(Value::Ref(Some(self.resolve_string(holder, index)?))),
            Some(PoolEntry::MethodHandle { .. }) => {
                Ok(Value::Ref(Some(self.resolve_method_handle(holder, index)?)))
            }
            Some(PoolEntry::MethodType { .. }) => {
                Ok(Value::Ref(Some(self.resolve_method_type(holder, index)?)))
            }
            Some(PoolEntry::Dynamic { .. }) => self
                .resolve_dynamic_at(holder, index, depth)
                .map(|(_, value)| value),
            _ => Err(bad_entry(holder, index, "loadable constant")),
        }
    }

    /// Resolve the `CONSTANT_Dynamic` at `index` by running its bootstrap method
    pub fn resolve_dynamic(&self, holder: &Klass, index: u16) -> RuntimeResult<(JavaKind, Value)> {
        self.resolve_dynamic_at(holder, index, 0)
    }

    fn resolve_dynamic_at(
        &self,
        holder: &Klass,
        index: u16,
        depth: usize,
    ) -> RuntimeResult<(JavaKind, Value)> {
        let pool = holder.constant_pool();
        if let Some(Resolved::Dynamic(value)) = pool.resolved_at(index) {
            return replay(value);
        }
        if pool.tag_at(index) != Some(PoolTag::Dynamic) {
            return Err(bad_entry(holder, index, "dynamic constant"));
        }
        let dynamic = pool
            .dynamic_at(index)
            .ok_or_else(|| bad_entry(holder, index, "dynamic constant"))?;
        if !descriptor::is_valid_field_descriptor(dynamic.descriptor) {
            return Err(bad_entry(holder, index, "dynamic constant with a field type"));
        }
        let kind = JavaKind::from_descriptor(dynamic.descriptor).unwrap_or(JavaKind::Object);

        let outcome = self
            .bootstrap_request(holder, index, dynamic.bsm_index, dynamic.name, dynamic.descriptor, depth)
            .and_then(|request| self.bootstrapper().bootstrap_constant(self, &request))
            .and_then(|value| check_kind(kind, value, dynamic.name));
        let outcome = match outcome {
            Ok(value) => DynamicValue::Value { kind, value },
            Err(err) => {
                debug!(
                    holder = holder.name().as_str(),
                    index,
                    error = %err,
                    "dynamic constant failed"
                );
                DynamicValue::Failed(err)
            }
        };
        match pool.install(index, Resolved::Dynamic(outcome)) {
            Some(Resolved::Dynamic(winner)) => replay(winner),
            _ => Err(bad_entry(holder, index, "dynamic constant")),
        }
    }

    /// Link the invokedynamic call site described by the entry at `index`
    pub fn link_call_site(&self, holder: &Klass, index: u16) -> RuntimeResult<CallSiteLink> {
        let pool = holder.constant_pool();
        if let Some(Resolved::CallSite(link)) = pool.resolved_at(index) {
            return Ok(link.clone());
        }
        if pool.tag_at(index) != Some(PoolTag::InvokeDynamic) {
            return Err(bad_entry(holder, index, "invokedynamic entry"));
        }
        let dynamic = pool
            .dynamic_at(index)
            .ok_or_else(|| bad_entry(holder, index, "invokedynamic entry"))?;
        if !descriptor::is_valid_method_signature(dynamic.descriptor) {
            return Err(bad_entry(holder, index, "invokedynamic entry with a method type"));
        }
        let request = self.bootstrap_request(
            holder,
            index,
            dynamic.bsm_index,
            dynamic.name,
            dynamic.descriptor,
            0,
        )?;
        let link = self.bootstrapper().bootstrap_call_site(self, &request)?;
        trace!(
            holder = holder.name().as_str(),
            index,
            target = link.target.as_u32(),
            "linked call site"
        );
        match pool.install(index, Resolved::CallSite(link.clone())) {
            Some(Resolved::CallSite(winner)) => Ok(winner.clone()),
            _ => Ok(link),
        }
    }

    fn bootstrap_request<'a>(
        &self,
        holder: &Klass,
        index: u16,
        bsm_index: u16,
        name: &'a crate::symbol::Symbol,
        descriptor: &'a crate::symbol::Symbol,
        depth: usize,
    ) -> RuntimeResult<BootstrapRequest<'a>> {
        if depth >= MAX_DYNAMIC_DEPTH {
            return Err(LinkageError::BootstrapFailed(format!(
                "dynamic constant {} nests too deeply",
                name
            )));
        }
        let pool = holder.constant_pool();
        let bsm = pool.bootstrap_method(bsm_index).ok_or_else(|| {
            LinkageError::ClassFormat(format!(
                "bootstrap method index {} out of range in {}",
                bsm_index,
                crate::descriptor::to_java_name(holder.name())
            ))
        })?;
        let bootstrap_method = self.resolve_method_handle(holder, bsm.method_handle_index)?;
        let arguments = bsm
            .arguments
            .iter()
            .map(|&arg| self.resolve_loadable_at(holder, arg, depth + 1))
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(BootstrapRequest {
            caller: holder.id(),
            cpi: index,
            bootstrap_method,
            name,
            descriptor,
            arguments,
        })
    }
}

fn replay(value: &DynamicValue) -> RuntimeResult<(JavaKind, Value)> {
    match value {
        DynamicValue::Value { kind, value } => Ok((*kind, value.clone())),
        DynamicValue::Failed(err) => Err(err.clone()),
    }
}

fn check_kind(kind: JavaKind, value: Value, name: &str) -> RuntimeResult<Value> {
    let fits = match (&value, kind.stack_kind()) {
        (Value::Int(_), JavaKind::Int) => true,
        (Value::Long(_), JavaKind::Long) => true,
        (Value::Float(_), JavaKind::Float) => true,
        (Value::Double(_), JavaKind::Double) => true,
        (Value::Ref(_), JavaKind::Object) => true,
        _ => false,
    };
    if fits {
        Ok(value)
    } else {
        Err(LinkageError::BootstrapFailed(format!(
            "bootstrap method for {} returned {:?}, expected {}",
            name, value, kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::class::{ClassDefinition, FieldDefinition, LoaderId, MethodDefinition};
    use crate::flags::AccessFlags;
    use crate::pool::{ConstantPoolBuilder, REF_INVOKE_STATIC};
    use crate::runtime::Bootstrapper;

    struct Counting {
        calls: AtomicUsize,
    }

    impl Bootstrapper for Counting {
        fn bootstrap_constant(&self, _rt: &Runtime, request: &BootstrapRequest<'_>) -> RuntimeResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.name.as_str() {
                "fail" => Err(LinkageError::BootstrapFailed("boom".into())),
                "wrong" => Ok(Value::Long(1)),
                _ => Ok(Value::Int(request.arguments.len() as i32 + 40)),
            }
        }

        fn bootstrap_call_site(
            &self,
            rt: &Runtime,
            request: &BootstrapRequest<'_>,
        ) -> RuntimeResult<CallSiteLink> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let caller = rt.klass(request.caller);
            Ok(CallSiteLink {
                target: caller.methods()[0],
                appendix: None,
            })
        }
    }

    fn setup() -> (Runtime, Arc<Counting>) {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let rt = Runtime::with_bootstrapper(counting.clone()).unwrap();
        rt.define_class(
            LoaderId::BOOT,
            ClassDefinition::new("p/Target")
                .field(FieldDefinition::new("count", "I", AccessFlags::PUBLIC))
                .field(FieldDefinition::new("secret", "I", AccessFlags::PRIVATE))
                .method(MethodDefinition::new(
                    "bsm",
                    "()Ljava/lang/Object;",
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                )),
        )
        .unwrap();
        (rt, counting)
    }

    #[test]
    fn test_member_resolution() {
        let (rt, _) = setup();
        let mut b = ConstantPoolBuilder::new();
        let count = b.field_ref("p/Target", "count", "I");
        let secret = b.field_ref("p/Target", "secret", "I");
        let missing = b.field_ref("p/Target", "missing", "I");
        let hash = b.method_ref("p/Target", "hashCode", "()I");
        let wrong_kind = b.interface_method_ref("p/Target", "hashCode", "()I");
        let user = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/User").constant_pool(b))
            .unwrap();

        let field = rt.resolve_field_ref(&user, count).unwrap();
        assert_eq!(rt.field(field).name().as_str(), "count");
        assert!(matches!(rt.resolve_field_ref(&user, secret), Err(LinkageError::IllegalAccess(_))));
        assert!(matches!(rt.resolve_field_ref(&user, missing), Err(LinkageError::NoSuchField(_))));

        let method = rt.resolve_method_ref(&user, hash).unwrap();
        assert_eq!(rt.method(method).declaring(), well_known::OBJECT);
        assert!(matches!(
            rt.resolve_method_ref(&user, wrong_kind),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            user.constant_pool().resolved_at(count),
            Some(Resolved::Field(id)) if *id == field
        ));
    }

    #[test]
    fn test_dynamic_constant_is_resolved_once() {
        let (rt, counting) = setup();
        let mut b = ConstantPoolBuilder::new();
        let bsm_ref = b.method_ref("p/Target", "bsm", "()Ljava/lang/Object;");
        let mh = b.method_handle(REF_INVOKE_STATIC, bsm_ref);
        let arg = b.integer(1);
        let bsm = b.bootstrap_method(mh, &[arg]);
        let condy = b.dynamic(bsm, "value", "B");
        let user = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/User").constant_pool(b))
            .unwrap();

        let (kind, value) = rt.resolve_dynamic(&user, condy).unwrap();
        assert_eq!(kind, JavaKind::Byte);
        assert_eq!(value, Value::Int(41));
        rt.resolve_dynamic(&user, condy).unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rt.resolve_loadable(&user, condy).unwrap(), Value::Int(41));
    }

    #[test]
    fn test_dynamic_failure_is_sticky() {
        let (rt, counting) = setup();
        let mut b = ConstantPoolBuilder::new();
        let bsm_ref = b.method_ref("p/Target", "bsm", "()Ljava/lang/Object;");
        let mh = b.method_handle(REF_INVOKE_STATIC, bsm_ref);
        let bsm = b.bootstrap_method(mh, &[]);
        let fail = b.dynamic(bsm, "fail", "I");
        let wrong = b.dynamic(bsm, "wrong", "I");
        let user = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/User").constant_pool(b))
            .unwrap();

        let first = rt.resolve_dynamic(&user, fail).unwrap_err();
        let second = rt.resolve_dynamic(&user, fail).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            rt.resolve_dynamic(&user, wrong),
            Err(LinkageError::BootstrapFailed(_))
        ));
    }

    #[test]
    fn test_self_referential_dynamic_constant_terminates() {
        let (rt, _) = setup();
        let mut b = ConstantPoolBuilder::new();
        let bsm_ref = b.method_ref("p/Target", "bsm", "()Ljava/lang/Object;");
        let mh = b.method_handle(REF_INVOKE_STATIC, bsm_ref);
        b.utf8("loop");
        b.utf8("I");
        // the name-and-type entry comes first, then the dynamic entry
        let condy = b.next_index() + 1;
        let bsm = b.bootstrap_method(mh, &[condy]);
        assert_eq!(b.dynamic(bsm, "loop", "I"), condy);
        let user = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/User").constant_pool(b))
            .unwrap();
        assert!(matches!(
            rt.resolve_dynamic(&user, condy),
            Err(LinkageError::BootstrapFailed(_))
        ));
    }

    #[test]
    fn test_call_site_linking() {
        let (rt, counting) = setup();
        let mut b = ConstantPoolBuilder::new();
        let bsm_ref = b.method_ref("p/Target", "bsm", "()Ljava/lang/Object;");
        let mh = b.method_handle(REF_INVOKE_STATIC, bsm_ref);
        let bsm = b.bootstrap_method(mh, &[]);
        let indy = b.invoke_dynamic(bsm, "run", "()V");
        let user = rt
            .define_class(
                LoaderId::BOOT,
                ClassDefinition::new("q/User")
                    .method(MethodDefinition::new("go", "()V", AccessFlags::PUBLIC))
                    .constant_pool(b),
            )
            .unwrap();
        let link = rt.link_call_site(&user, indy).unwrap();
        assert_eq!(link.target, user.methods()[0]);
        rt.link_call_site(&user, indy).unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            rt.link_call_site(&user, bsm_ref),
            Err(LinkageError::ClassFormat(_))
        ));
    }

    #[test]
    fn test_method_type_loads_mentioned_classes() {
        let (rt, _) = setup();
        let mut b = ConstantPoolBuilder::new();
        let ok = b.method_type("(Lp/Target;I)V");
        let missing = b.method_type("(Lp/Missing;)V");
        let user = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("q/User").constant_pool(b))
            .unwrap();
        let mt = rt.resolve_method_type(&user, ok).unwrap();
        assert!(matches!(mt.payload(), Payload::MethodType(sig) if sig.as_str() == "(Lp/Target;I)V"));
        assert!(matches!(
            rt.resolve_method_type(&user, missing),
            Err(LinkageError::NoClassDefFound(_))
        ));
        assert!(user.constant_pool().resolved_at(missing).is_none());
    }
}
