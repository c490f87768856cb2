//! Class loading, linking and initialization
//!
//! All three steps run under the runtime's reentrant loading lock. Lookups
//! of already loaded classes never take it.

use std::sync::Arc;

use tracing::debug;

use crate::access;
use crate::class::{ClassDefinition, ClassState, Klass, KlassId, KlassKind, KlassSpec, LoaderId};
use crate::descriptor::{self, MAX_ARRAY_DIMENSIONS};
use crate::field::FieldSpec;
use crate::flags::AccessFlags;
use crate::kind::JavaKind;
use crate::layout::{compute_layout, OBJECT_HEADER_SIZE};
use crate::linker;
use crate::method::MethodSpec;
use crate::pool::{PoolEntry, Resolved};
use crate::runtime::{well_known, Runtime};
use crate::{LinkageError, RuntimeResult};

const OBJECT_NAME: &str = "java/lang/Object";

impl Runtime {
    /// Make a class definition loadable by name through `loader`
    pub fn register_definition(&self, loader: LoaderId, def: ClassDefinition) -> RuntimeResult<()> {
        if !descriptor::is_valid_binary_name(&def.name) {
            return Err(LinkageError::ClassFormat(format!(
                "illegal class name \"{}\"",
                def.name
            )));
        }
        let name = self
            .symbols
            .intern(&descriptor::class_name_to_descriptor(&def.name));
        self.class_path.lock().insert(name, (loader, def));
        Ok(())
    }

    /// Class already defined for `descriptor`, never loading
    ///
    /// Array classes are created on demand when their elemental type is
    /// loaded. Classes of the boot loader are visible to every loader.
    pub fn find_loaded(&self, descriptor: &str, loader: LoaderId) -> Option<Arc<Klass>> {
        if descriptor.starts_with('[') {
            let dims = descriptor::array_dimensions(descriptor);
            let mut klass = self.find_loaded(descriptor::elemental_descriptor(descriptor), loader)?;
            for _ in 0..dims {
                klass = self.array_of(&klass).ok()?;
            }
            return Some(klass);
        }
        if descriptor::is_primitive_descriptor(descriptor) {
            return JavaKind::from_descriptor(descriptor).and_then(|k| self.primitive_klass(k));
        }
        let name = self.symbols.lookup(descriptor)?;
        let id = self
            .by_name
            .get(&(loader, name.clone()))
            .or_else(|| self.by_name.get(&(LoaderId::BOOT, name)))
            .map(|entry| *entry.value())?;
        self.try_klass(id)
    }

    /// Class for `descriptor`, loading it through `loader` if needed
    pub fn load_class(&self, descriptor: &str, loader: LoaderId) -> RuntimeResult<Arc<Klass>> {
        if let Some(klass) = self.find_loaded(descriptor, loader) {
            return Ok(klass);
        }
        if !descriptor::is_valid_type_descriptor(descriptor) {
            return Err(LinkageError::NoClassDefFound(descriptor.to_string()));
        }
        if descriptor.starts_with('[') {
            let dims = descriptor::array_dimensions(descriptor);
            let mut klass = self.load_class(descriptor::elemental_descriptor(descriptor), loader)?;
            for _ in 0..dims {
                klass = self.array_of(&klass)?;
            }
            return Ok(klass);
        }
        if descriptor::is_primitive_descriptor(descriptor) {
            return JavaKind::from_descriptor(descriptor)
                .and_then(|k| self.primitive_klass(k))
                .ok_or_else(|| LinkageError::NoClassDefFound(descriptor.to_string()));
        }

        let guard = self.loading.lock();
        if let Some(klass) = self.find_loaded(descriptor, loader) {
            return Ok(klass);
        }
        let class_name = descriptor::descriptor_to_class_name(descriptor);
        if guard.borrow().iter().any(|s| s.as_str() == descriptor) {
            return Err(LinkageError::ClassCircularity(class_name.to_string()));
        }
        let pending = {
            let mut class_path = self.class_path.lock();
            let key = self.symbols.lookup(descriptor);
            let visible = key.as_ref().and_then(|key| match class_path.get(key) {
                Some((owner, _)) => Some(*owner == loader || *owner == LoaderId::BOOT),
                None => None,
            });
            match (key, visible) {
                (Some(key), Some(true)) => class_path.remove(&key),
                _ => None,
            }
        };
        match pending {
            Some((owner, def)) => {
                debug!(class = class_name, loader = owner.as_u32(), "loading class");
                self.define_class(owner, def)
            }
            None => Err(LinkageError::NoClassDefFound(class_name.to_string())),
        }
    }

    /// Define a class from its definition
    pub fn define_class(&self, loader: LoaderId, def: ClassDefinition) -> RuntimeResult<Arc<Klass>> {
        if !descriptor::is_valid_binary_name(&def.name) {
            return Err(LinkageError::ClassFormat(format!(
                "illegal class name \"{}\"",
                def.name
            )));
        }
        let name = self
            .symbols
            .intern(&descriptor::class_name_to_descriptor(&def.name));

        let guard = self.loading.lock();
        if self.by_name.contains_key(&(loader, name.clone())) {
            return Err(LinkageError::ClassFormat(format!(
                "duplicate class definition for {}",
                def.name
            )));
        }
        guard.borrow_mut().push(name.clone());
        let result = self.define_locked(loader, name, def);
        guard.borrow_mut().pop();
        result
    }

    fn define_locked(
        &self,
        loader: LoaderId,
        name: crate::symbol::Symbol,
        def: ClassDefinition,
    ) -> RuntimeResult<Arc<Klass>> {
        let is_interface = def.flags.is_interface();

        let super_klass = match &def.super_name {
            Some(super_name) => {
                let super_klass =
                    self.load_class(&descriptor::class_name_to_descriptor(super_name), loader)?;
                if super_klass.is_interface() || !super_klass.is_instance_klass() {
                    return Err(LinkageError::IncompatibleClassChange(format!(
                        "class {} has interface {} as super class",
                        def.name, super_name
                    )));
                }
                if super_klass.flags().is_final() {
                    return Err(LinkageError::IncompatibleClassChange(format!(
                        "class {} cannot inherit from final class {}",
                        def.name, super_name
                    )));
                }
                if is_interface && super_klass.id() != well_known::OBJECT {
                    return Err(LinkageError::ClassFormat(format!(
                        "interface {} must extend java/lang/Object",
                        def.name
                    )));
                }
                Some(super_klass)
            }
            None if def.name == OBJECT_NAME => None,
            None => {
                return Err(LinkageError::ClassFormat(format!(
                    "class {} has no superclass",
                    def.name
                )))
            }
        };

        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for iface_name in &def.interfaces {
            let iface = self.load_class(&descriptor::class_name_to_descriptor(iface_name), loader)?;
            if !iface.is_interface() {
                return Err(LinkageError::IncompatibleClassChange(format!(
                    "class {} can not implement {}, because it is not an interface",
                    def.name, iface_name
                )));
            }
            interfaces.push(iface);
        }

        let id = KlassId::from_raw(self.klasses.read().len() as u32);

        for supertype in super_klass.iter().chain(interfaces.iter()) {
            if !access::is_accessible_from(self, loader, &name, supertype) {
                return Err(LinkageError::IllegalAccess(format!(
                    "class {} cannot access its supertype {}",
                    def.name,
                    descriptor::to_java_name(supertype.name())
                )));
            }
        }

        let mut field_kinds = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            if !descriptor::is_valid_field_descriptor(&field.descriptor) {
                return Err(LinkageError::ClassFormat(format!(
                    "field \"{}\" in class {} has illegal signature \"{}\"",
                    field.name, def.name, field.descriptor
                )));
            }
            let kind = JavaKind::from_descriptor(&field.descriptor).unwrap_or(JavaKind::Object);
            field_kinds.push((kind, field.flags.is_static()));
        }
        for method in &def.methods {
            if !descriptor::is_valid_method_signature(&method.signature) {
                return Err(LinkageError::ClassFormat(format!(
                    "method \"{}\" in class {} has illegal signature \"{}\"",
                    method.name, def.name, method.signature
                )));
            }
        }

        let super_size = super_klass
            .as_ref()
            .map_or(OBJECT_HEADER_SIZE, |s| s.instance_size());
        let layout = compute_layout(super_size, &field_kinds);

        let fields = def
            .fields
            .iter()
            .zip(field_kinds.iter())
            .zip(layout.offsets.iter())
            .map(|((field, &(kind, _)), &offset)| {
                self.field_arena().alloc(FieldSpec {
                    declaring: id,
                    name: self.symbols.intern(&field.name),
                    descriptor: self.symbols.intern(&field.descriptor),
                    flags: field.flags,
                    kind,
                    offset,
                    constant_value: field.constant_value.clone(),
                })
            })
            .collect();

        let mut next_itable_index = 0;
        let methods = def
            .methods
            .into_iter()
            .map(|method| {
                let in_itable = is_interface
                    && !method.flags.is_static()
                    && !method.flags.is_private()
                    && method.name != "<clinit>";
                let itable_index = if in_itable {
                    next_itable_index += 1;
                    next_itable_index - 1
                } else {
                    -1
                };
                self.method_arena().alloc(MethodSpec {
                    declaring: id,
                    declared_in_interface: is_interface,
                    name: self.symbols.intern(&method.name),
                    signature: self.symbols.intern(&method.signature),
                    flags: method.flags,
                    itable_index,
                    code: method.code,
                })
            })
            .collect();

        let mut pool = def.pool.build();
        pool.intern_symbols(&self.symbols);

        let klass = Arc::new(Klass::new(KlassSpec {
            id,
            name: name.clone(),
            flags: def.flags,
            loader,
            kind: KlassKind::Instance,
            super_klass: super_klass.as_ref().map(|s| s.id()),
            interfaces: interfaces.iter().map(|i| i.id()).collect(),
            methods,
            fields,
            pool,
            instance_size: layout.instance_size,
            static_size: layout.static_size,
            state: ClassState::Loaded,
        }));

        self.klasses.write().push(klass.clone());
        self.by_name.insert((loader, name), id);

        // string entries are resolved eagerly
        let pool = klass.constant_pool();
        for index in 1..pool.len() as u16 {
            if let Some(PoolEntry::String { .. }) = pool.entry(index) {
                if let Some(text) = pool.string_at(index) {
                    pool.install(index, Resolved::String(self.intern_string(text)));
                }
            }
        }

        debug!(
            class = def.name.as_str(),
            id = id.as_u32(),
            loader = loader.as_u32(),
            "defined class"
        );
        Ok(klass)
    }

    /// Array class whose component type is `component`
    pub fn array_of(&self, component: &Arc<Klass>) -> RuntimeResult<Arc<Klass>> {
        if let Some(id) = component.array_klass() {
            return Ok(self.klass(id));
        }
        let (elemental, dimensions) = match component.kind() {
            KlassKind::Primitive(JavaKind::Void) => {
                return Err(LinkageError::NoClassDefFound("[V".to_string()))
            }
            KlassKind::Primitive(_) | KlassKind::Instance => (component.id(), 1),
            KlassKind::Array {
                elemental,
                dimensions,
                ..
            } => (elemental, dimensions + 1),
        };
        if dimensions as usize > MAX_ARRAY_DIMENSIONS {
            return Err(LinkageError::ClassFormat(format!(
                "array type with more than {} dimensions",
                MAX_ARRAY_DIMENSIONS
            )));
        }

        let _guard = self.loading.lock();
        if let Some(id) = component.array_klass() {
            return Ok(self.klass(id));
        }
        let object = self.object_klass();
        let elemental_klass = self.klass(elemental);
        let flags = if elemental_klass.flags().is_public() {
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT
        } else {
            AccessFlags::FINAL | AccessFlags::ABSTRACT
        };
        let name = self.symbols.intern(&format!("[{}", component.name()));
        let mut klasses = self.klasses.write();
        let id = KlassId::from_raw(klasses.len() as u32);
        let klass = Arc::new(Klass::new(KlassSpec {
            id,
            name: name.clone(),
            flags,
            loader: component.loader(),
            kind: KlassKind::Array {
                component: component.id(),
                elemental,
                dimensions,
            },
            super_klass: Some(object.id()),
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            pool: crate::pool::ConstantPoolBuilder::new().build(),
            instance_size: OBJECT_HEADER_SIZE,
            static_size: 0,
            state: ClassState::Initialized,
        }));
        klass.install_tables(
            object.vtable().map(<[_]>::to_vec).unwrap_or_default(),
            Vec::new(),
        );
        klasses.push(klass.clone());
        drop(klasses);
        self.by_name.insert((component.loader(), name), id);
        // set while the loading lock is held, so no other creator can race
        let _ = component.array_klass_cell().set(id);
        Ok(klass)
    }

    /// Link `klass` and its supertypes, building dispatch tables
    pub fn link(&self, klass: &Arc<Klass>) -> RuntimeResult<()> {
        if klass.is_linked() {
            return Ok(());
        }
        if klass.state() == ClassState::Erroneous {
            return Err(LinkageError::NoClassDefFound(format!(
                "class {} is in an erroneous state",
                descriptor::to_java_name(klass.name())
            )));
        }
        let _guard = self.loading.lock();
        if klass.is_linked() {
            return Ok(());
        }
        if let Some(super_id) = klass.super_klass() {
            self.link(&self.klass(super_id))?;
        }
        for &iface in klass.interfaces() {
            self.link(&self.klass(iface))?;
        }
        match linker::build_tables(self, klass) {
            Ok((vtable, itable)) => {
                debug!(
                    class = klass.name().as_str(),
                    vtable = vtable.len(),
                    itable = itable.len(),
                    "linked class"
                );
                klass.install_tables(vtable, itable);
                klass.advance_state(ClassState::Linked);
                Ok(())
            }
            Err(err) => {
                klass.advance_state(ClassState::Erroneous);
                Err(err)
            }
        }
    }

    /// Link and initialize `klass`, storing `ConstantValue` statics
    ///
    /// Class initializers are not executed.
    pub fn initialize(&self, klass: &Arc<Klass>) -> RuntimeResult<()> {
        self.link(klass)?;
        if klass.is_initialized() {
            return Ok(());
        }
        let _guard = self.loading.lock();
        if klass.is_initialized() {
            return Ok(());
        }
        if let Some(super_id) = klass.super_klass() {
            self.initialize(&self.klass(super_id))?;
        }
        for &field_id in klass.fields() {
            let field = self.field(field_id);
            if let (true, Some(value)) = (field.is_static(), field.constant_value()) {
                if let Err(message) = klass.statics().write(field.offset(), field.kind(), value) {
                    klass.advance_state(ClassState::Erroneous);
                    return Err(LinkageError::ClassFormat(format!(
                        "bad ConstantValue for {}.{}: {}",
                        descriptor::to_java_name(klass.name()),
                        field.name(),
                        message
                    )));
                }
            }
        }
        klass.advance_state(ClassState::Initialized);
        debug!(class = klass.name().as_str(), "initialized class");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{FieldDefinition, MethodDefinition};
    use crate::object::Value;

    #[test]
    fn test_define_and_find() {
        let rt = Runtime::new().unwrap();
        let a = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/A"))
            .unwrap();
        assert_eq!(a.name().as_str(), "Lp/A;");
        assert_eq!(a.state(), ClassState::Loaded);
        assert_eq!(rt.find_loaded("Lp/A;", LoaderId::BOOT).unwrap().id(), a.id());
        assert_eq!(rt.find_loaded("Lp/A;", LoaderId::from_raw(3)).unwrap().id(), a.id());
        assert!(rt.find_loaded("Lp/B;", LoaderId::BOOT).is_none());
    }

    #[test]
    fn test_duplicate_definition() {
        let rt = Runtime::new().unwrap();
        rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/A"))
            .unwrap();
        assert!(matches!(
            rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/A")),
            Err(LinkageError::ClassFormat(_))
        ));
    }

    #[test]
    fn test_load_from_class_path() {
        let rt = Runtime::new().unwrap();
        rt.register_definition(LoaderId::BOOT, ClassDefinition::new("p/Base"))
            .unwrap();
        rt.register_definition(LoaderId::BOOT, ClassDefinition::new("p/Derived").extends("p/Base"))
            .unwrap();
        assert!(rt.find_loaded("Lp/Derived;", LoaderId::BOOT).is_none());

        let derived = rt.load_class("Lp/Derived;", LoaderId::BOOT).unwrap();
        let base = rt.find_loaded("Lp/Base;", LoaderId::BOOT).unwrap();
        assert_eq!(derived.super_klass(), Some(base.id()));
    }

    #[test]
    fn test_missing_class() {
        let rt = Runtime::new().unwrap();
        assert!(matches!(
            rt.load_class("Lp/Missing;", LoaderId::BOOT),
            Err(LinkageError::NoClassDefFound(name)) if name == "p/Missing"
        ));
        assert!(matches!(
            rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/A").extends("p/Missing")),
            Err(LinkageError::NoClassDefFound(_))
        ));
    }

    #[test]
    fn test_circularity() {
        let rt = Runtime::new().unwrap();
        rt.register_definition(LoaderId::BOOT, ClassDefinition::new("p/A").extends("p/B"))
            .unwrap();
        rt.register_definition(LoaderId::BOOT, ClassDefinition::new("p/B").extends("p/A"))
            .unwrap();
        assert!(matches!(
            rt.load_class("Lp/A;", LoaderId::BOOT),
            Err(LinkageError::ClassCircularity(_))
        ));
    }

    #[test]
    fn test_hierarchy_checks() {
        let rt = Runtime::new().unwrap();
        rt.define_class(LoaderId::BOOT, ClassDefinition::interface("p/I"))
            .unwrap();
        rt.define_class(
            LoaderId::BOOT,
            ClassDefinition::new("p/F").flags(AccessFlags::PUBLIC | AccessFlags::FINAL),
        )
        .unwrap();
        assert!(matches!(
            rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/A").extends("p/I")),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/B").extends("p/F")),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
        assert!(matches!(
            rt.define_class(LoaderId::BOOT, ClassDefinition::new("p/C").implements("p/F")),
            Err(LinkageError::IncompatibleClassChange(_))
        ));
    }

    #[test]
    fn test_arrays() {
        let rt = Runtime::new().unwrap();
        let ints = rt.load_class("[[I", LoaderId::BOOT).unwrap();
        assert_eq!(ints.name().as_str(), "[[I");
        assert!(ints.is_initialized());
        match ints.kind() {
            KlassKind::Array {
                elemental,
                dimensions,
                ..
            } => {
                assert_eq!(dimensions, 2);
                assert_eq!(rt.klass(elemental).java_kind(), JavaKind::Int);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        let again = rt.find_loaded("[[I", LoaderId::BOOT).unwrap();
        assert_eq!(again.id(), ints.id());
        assert!(rt.find_loaded("[Lp/Nope;", LoaderId::BOOT).is_none());
    }

    #[test]
    fn test_initialize_writes_constant_values() {
        let rt = Runtime::new().unwrap();
        let a = rt
            .define_class(
                LoaderId::BOOT,
                ClassDefinition::new("p/A")
                    .field(
                        FieldDefinition::new(
                            "LIMIT",
                            "J",
                            AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
                        )
                        .with_constant(Value::Long(42)),
                    )
                    .method(MethodDefinition::new("run", "()V", AccessFlags::PUBLIC)),
            )
            .unwrap();
        let field = rt.field(a.fields()[0]);
        assert_eq!(a.statics().read(field.offset(), JavaKind::Long).unwrap(), Value::Long(0));

        rt.initialize(&a).unwrap();
        assert!(a.is_initialized());
        assert_eq!(
            a.statics().read(field.offset(), JavaKind::Long).unwrap(),
            Value::Long(42)
        );
    }

    #[test]
    fn test_strings_resolved_at_definition() {
        let rt = Runtime::new().unwrap();
        let mut pool = crate::pool::ConstantPoolBuilder::new();
        let s = pool.string("hi");
        let a = rt
            .define_class(LoaderId::BOOT, ClassDefinition::new("p/A").constant_pool(pool))
            .unwrap();
        match a.constant_pool().resolved_at(s) {
            Some(Resolved::String(obj)) => {
                assert!(crate::object::ObjectRef::ptr_eq(obj, &rt.intern_string("hi")))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
