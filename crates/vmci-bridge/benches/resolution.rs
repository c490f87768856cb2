use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vmci_bridge::{Bridge, BridgeConfig, InstanceType, TypeHandle};
use vmci_runtime::{AccessFlags, ClassDefinition, ConstantPoolBuilder, LoaderId, MethodDefinition, Runtime};

const PUBLIC: AccessFlags = AccessFlags::PUBLIC;

/// Interface with `width` methods and one linked implementor
fn setup(width: usize) -> (Bridge, InstanceType, InstanceType) {
    let rt = Runtime::new().unwrap();
    let mut iface = ClassDefinition::interface("b/Api");
    let mut implementation = ClassDefinition::new("b/Impl").implements("b/Api");
    for i in 0..width {
        let name = format!("m{}", i);
        iface = iface.method(MethodDefinition::new(&name, "()V", PUBLIC | AccessFlags::ABSTRACT));
        implementation = implementation.method(MethodDefinition::new(&name, "()V", PUBLIC));
    }
    let mut b = ConstantPoolBuilder::new();
    for i in 0..width {
        b.integer(i as i32);
        b.class(&format!("b/Missing{}", i));
    }
    b.class("b/Api");
    let implementation = implementation.constant_pool(b);

    let api = rt.define_class(LoaderId::BOOT, iface).unwrap();
    let klass = rt.define_class(LoaderId::BOOT, implementation).unwrap();
    rt.link(&klass).unwrap();
    let bridge = Bridge::new(Arc::new(rt), BridgeConfig::default());
    let api = *bridge.to_type(&api).unwrap().as_instance().unwrap();
    let klass = *bridge.to_type(&klass).unwrap().as_instance().unwrap();
    (bridge, api, klass)
}

fn bench_resolve_method(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_method");
    for width in [4, 32, 256] {
        let (bridge, api, klass) = setup(width);
        let cx = bridge.context().unwrap();
        let last = api
            .find_method(cx, &format!("m{}", width - 1), "()V")
            .unwrap()
            .unwrap();
        let receiver = TypeHandle::Instance(klass);
        group.bench_with_input(BenchmarkId::new("interface", width), &last, |b, method| {
            b.iter(|| bridge.resolve_method(black_box(&receiver), method, &klass).unwrap());
        });
    }
    group.finish();
}

fn bench_lookup_constant(c: &mut Criterion) {
    let (bridge, _, klass) = setup(64);
    let pool = bridge.constant_pool(&klass).unwrap();
    let length = pool.length(bridge.context().unwrap()) as u32;

    c.bench_function("lookup_constant_unresolved", |b| {
        b.iter(|| {
            for index in 1..length {
                let _ = bridge.lookup_constant(&pool, black_box(index), false);
            }
        });
    });

    c.bench_function("lookup_constant_forced_class", |b| {
        b.iter(|| bridge.lookup_constant(&pool, black_box(length - 1), true).unwrap());
    });
}

criterion_group!(benches, bench_resolve_method, bench_lookup_constant);
criterion_main!(benches);
