//! Integration tests for loading, linking and constant pool resolution

use std::sync::Arc;

use vmci_runtime::{
    AccessFlags, ClassDefinition, ConstantPoolBuilder, LinkageError, LoaderId, MethodDefinition, Resolved, Runtime,
};

const APP: LoaderId = LoaderId::from_raw(1);
const PLUGIN: LoaderId = LoaderId::from_raw(2);

fn runtime() -> Runtime {
    let rt = Runtime::new().unwrap();
    rt.register_definition(
        LoaderId::BOOT,
        ClassDefinition::interface("lib/Codec").method(MethodDefinition::new(
            "encode",
            "(I)I",
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        )),
    )
    .unwrap();
    rt.register_definition(
        APP,
        ClassDefinition::new("app/Base").method(MethodDefinition::new("run", "()V", AccessFlags::PUBLIC)),
    )
    .unwrap();
    rt.register_definition(
        APP,
        ClassDefinition::new("app/Impl")
            .extends("app/Base")
            .implements("lib/Codec")
            .method(MethodDefinition::new("encode", "(I)I", AccessFlags::PUBLIC))
            .method(MethodDefinition::new("run", "()V", AccessFlags::PUBLIC)),
    )
    .unwrap();
    rt
}

#[test]
fn test_loading_pulls_in_supertypes() {
    let rt = runtime();
    let implementation = rt.load_class("Lapp/Impl;", APP).unwrap();
    let base = rt.find_loaded("Lapp/Base;", APP).expect("superclass loaded with subclass");
    let codec = rt.find_loaded("Llib/Codec;", APP).expect("boot classes are visible everywhere");

    assert_eq!(implementation.super_klass(), Some(base.id()));
    assert!(rt.is_assignable(&codec, &implementation));
    assert!(rt.is_subclass_of(&implementation, base.id()));
    assert_eq!(rt.all_interfaces(&implementation), vec![codec.id()]);
}

#[test]
fn test_loaders_are_isolated() {
    let rt = runtime();
    rt.load_class("Lapp/Base;", APP).unwrap();
    assert!(rt.find_loaded("Lapp/Base;", PLUGIN).is_none());
    assert!(matches!(
        rt.load_class("Lapp/Impl;", PLUGIN),
        Err(LinkageError::NoClassDefFound(name)) if name == "app/Impl"
    ));
    // the failed attempt must not consume the definition
    assert!(rt.load_class("Lapp/Impl;", APP).is_ok());
}

#[test]
fn test_override_keeps_superclass_slot() {
    let rt = runtime();
    let implementation = rt.load_class("Lapp/Impl;", APP).unwrap();
    let base = rt.find_loaded("Lapp/Base;", APP).unwrap();
    rt.link(&implementation).unwrap();

    let base_run = rt.declared_method(&base, "run", "()V").unwrap();
    let impl_run = rt.declared_method(&implementation, "run", "()V").unwrap();
    let slot = rt.method(base_run).vtable_index();
    assert_eq!(slot, 5);
    assert_eq!(rt.method(impl_run).vtable_index(), slot);
    assert_eq!(implementation.vtable_lookup(slot), Some(impl_run));

    let codec = rt.find_loaded("Llib/Codec;", APP).unwrap();
    let encode = rt.declared_method(&codec, "encode", "(I)I").unwrap();
    let found = implementation
        .itable_lookup_or_null(codec.id(), rt.method(encode).itable_index())
        .unwrap();
    assert_eq!(found, rt.declared_method(&implementation, "encode", "(I)I").unwrap());
}

#[test]
fn test_hierarchy_oracles_follow_loading() {
    let rt = runtime();
    let codec = rt.load_class("Llib/Codec;", APP).unwrap();
    assert_eq!(rt.single_implementor_of(&codec), None);

    let base = rt.load_class("Lapp/Base;", APP).unwrap();
    assert!(rt.is_leaf_type(&base));
    let implementation = rt.load_class("Lapp/Impl;", APP).unwrap();
    assert!(!rt.is_leaf_type(&base));
    assert_eq!(rt.single_implementor_of(&codec), Some(implementation.id()));
}

#[test]
fn test_concurrent_loading_defines_once() {
    let rt = Arc::new(runtime());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let rt = Arc::clone(&rt);
            std::thread::spawn(move || rt.load_class("Lapp/Impl;", APP).unwrap().id())
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|&id| id == ids[0]));
}

#[test]
fn test_pool_resolution_across_loaders() {
    let rt = runtime();
    let mut b = ConstantPoolBuilder::new();
    let codec = b.class("lib/Codec");
    let base = b.class("app/Base");
    let encode = b.interface_method_ref("lib/Codec", "encode", "(I)I");
    let user = rt
        .define_class(PLUGIN, ClassDefinition::new("plugin/User").constant_pool(b))
        .unwrap();

    let codec_id = rt.resolve_class(&user, codec).unwrap();
    assert_eq!(rt.klass(codec_id).loader(), LoaderId::BOOT);
    let method = rt.resolve_method_ref(&user, encode).unwrap();
    assert!(matches!(
        user.constant_pool().resolved_at(encode),
        Some(Resolved::Method(id)) if *id == method
    ));

    let first = rt.resolve_class(&user, base).unwrap_err();
    let second = rt.resolve_class(&user, base).unwrap_err();
    assert_eq!(first, second);
    assert!(user.constant_pool().resolved_at(base).is_none());
}
