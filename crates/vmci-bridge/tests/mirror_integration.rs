//! Integration tests for type, field and object mirrors

use std::sync::Arc;

use vmci_bridge::{Bridge, BridgeConfig, BridgeError, JavaConstant, ObjectConstant, PrimitiveConstant, TypeHandle};
use vmci_runtime::{
    AccessFlags, ClassDefinition, FieldDefinition, JavaKind, LoaderId, ObjectRef, Payload, Runtime, Value,
};

fn bridge() -> Bridge {
    let rt = Runtime::new().unwrap();
    rt.define_class(
        LoaderId::BOOT,
        ClassDefinition::new("p/Base").field(FieldDefinition::new("id", "J", AccessFlags::PUBLIC)),
    )
    .unwrap();
    rt.define_class(
        LoaderId::BOOT,
        ClassDefinition::new("p/Node")
            .extends("p/Base")
            .field(FieldDefinition::new("weight", "D", AccessFlags::PRIVATE))
            .field(FieldDefinition::new("next", "Lp/Node;", AccessFlags::PUBLIC))
            .field(FieldDefinition::new("COUNT", "I", AccessFlags::PUBLIC | AccessFlags::STATIC)),
    )
    .unwrap();
    Bridge::new(Arc::new(rt), BridgeConfig::default())
}

#[test]
fn test_wrapping_preserves_identity() {
    let bridge = bridge();
    assert_eq!(bridge.wrap(None).unwrap(), bridge.wrap(None).unwrap());

    let a = ObjectRef::new(vmci_runtime::well_known::STRING, Payload::String(Arc::from("x")));
    let b = ObjectRef::new(vmci_runtime::well_known::STRING, Payload::String(Arc::from("x")));
    assert_ne!(bridge.wrap(Some(a.clone())).unwrap(), bridge.wrap(Some(b)).unwrap());
    assert_eq!(bridge.wrap(Some(a.clone())).unwrap(), bridge.wrap(Some(a)).unwrap());
}

#[test]
fn test_field_offsets_match_storage() {
    let bridge = bridge();
    let cx = bridge.context().unwrap();
    let node_klass = bridge.runtime().find_loaded("Lp/Node;", LoaderId::BOOT).unwrap();
    let node = *bridge.to_type(&node_klass).unwrap().as_instance().unwrap();

    let fields = node.instance_fields(cx, true).unwrap();
    let names: Vec<_> = fields.iter().map(|f| f.name(cx).to_string()).collect();
    assert_eq!(names, ["id", "weight", "next"]);

    let obj = ObjectRef::new_instance(node_klass.id(), node_klass.instance_size());
    let storage = obj.fields().unwrap();
    for (f, value) in fields.iter().zip([Value::Long(-9), Value::Double(0.25), Value::NULL]) {
        let again = bridge.to_field(f.id(), None).unwrap();
        assert_eq!(again.offset(), f.offset());
        assert_eq!(f.offset(), bridge.runtime().field(f.id()).offset());
        storage.write(f.offset(), f.java_kind(cx), &value).unwrap();
    }

    let receiver = bridge.wrap(Some(obj.clone())).unwrap();
    assert_eq!(
        fields[0].read_instance(cx, &receiver).unwrap(),
        JavaConstant::Primitive(PrimitiveConstant::long(-9))
    );
    assert_eq!(
        fields[1].read_instance(cx, &receiver).unwrap(),
        JavaConstant::Primitive(PrimitiveConstant::double(0.25))
    );
    assert_eq!(fields[2].read_instance(cx, &receiver).unwrap(), JavaConstant::NULL);
    assert_eq!(fields[2].java_kind(cx), JavaKind::Object);
}

#[test]
fn test_static_field_follows_initialization() {
    let bridge = bridge();
    let cx = bridge.context().unwrap();
    let object = *bridge
        .to_type(&bridge.runtime().object_klass())
        .unwrap()
        .as_instance()
        .unwrap();
    let node = *bridge
        .lookup_type("Lp/Node;", &object, false)
        .unwrap()
        .as_instance()
        .unwrap();
    let count = node.static_fields(cx).unwrap()[0];
    assert_eq!(count.read_static(cx).unwrap(), None);

    TypeHandle::Instance(node).initialize(cx).unwrap();
    let klass = cx.instance_klass(&node);
    klass.statics().write(count.offset(), JavaKind::Int, &Value::Int(3)).unwrap();
    assert_eq!(
        count.read_static(cx).unwrap(),
        Some(JavaConstant::Primitive(PrimitiveConstant::int(3)))
    );
}

#[test]
fn test_type_lookup_without_loading() {
    let bridge = bridge();
    let object = *bridge
        .to_type(&bridge.runtime().object_klass())
        .unwrap()
        .as_instance()
        .unwrap();

    let missing = bridge.lookup_type("Lp/NotThere;", &object, false).unwrap();
    assert!(!missing.is_resolved());
    assert!(bridge.runtime().symbols().lookup("Lp/NotThere;").is_none());
    assert!(matches!(
        bridge.lookup_type("Lp/NotThere;", &object, true),
        Err(BridgeError::Linkage(_))
    ));
    assert!(matches!(
        bridge.lookup_type("L;", &object, false),
        Err(BridgeError::InvalidDescriptor(_))
    ));

    let int = bridge.lookup_type("I", &object, false).unwrap();
    assert!(int.is_primitive());
    let ints = int.array_of(bridge.context().unwrap()).unwrap();
    assert_eq!(ints.name(bridge.context().unwrap()).as_ref(), "[I");
}

#[test]
fn test_disabled_bridge() {
    let bridge = bridge();
    bridge.set_enabled(false);
    assert!(matches!(bridge.wrap(None), Err(BridgeError::Disabled)));
    assert!(matches!(bridge.to_type(&bridge.runtime().object_klass()), Err(BridgeError::Disabled)));
    bridge.set_enabled(true);
    assert!(bridge.wrap(None).is_ok());
}

#[test]
fn test_disabling_stops_held_mirrors() {
    let bridge = bridge();
    let cx = bridge.context().unwrap();
    let node_klass = bridge.runtime().find_loaded("Lp/Node;", LoaderId::BOOT).unwrap();
    let node = *bridge.to_type(&node_klass).unwrap().as_instance().unwrap();
    let next = node.instance_fields(cx, false).unwrap()[1];
    bridge.set_enabled(false);

    assert!(matches!(next.field_type(cx, None), Err(BridgeError::Disabled)));
    assert!(matches!(TypeHandle::Instance(node).initialize(cx), Err(BridgeError::Disabled)));
    assert!(!TypeHandle::Instance(node).is_initialized(cx));
    assert!(matches!(node.instance_fields(cx, true), Err(BridgeError::Disabled)));
    assert!(matches!(
        ObjectConstant::wrap(Some(bridge.runtime().intern_string("s"))).object_type(cx),
        Err(BridgeError::Disabled)
    ));
    assert_eq!(next.name(cx).as_str(), "next");
}
