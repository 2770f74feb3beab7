//! IC Integration Tests
//!
//! End-to-end tests verifying the complete IC pipeline:
//! - Runtime mutation events and watcher firing
//! - Resolution, installation and replay across all site kinds
//! - Concurrent access patterns
//!
//! These tests exercise multiple IC subsystems together to ensure
//! correct integration behavior.

use crate::ic::{IcContext, IcState, LoadAttrCache, LoadMethodCache, StoreAttrCache, test_context};
use cinder_core::{Value, intern};
use cinder_runtime::{
    Descriptor, InstanceRef, MethodPair, Runtime, TypeRef, TypeSpec, getter, mro_hook, setter,
};
use std::sync::Arc;
use std::thread;

fn load(cache: &LoadAttrCache, ctx: &IcContext, inst: &InstanceRef) -> Value {
    cache.probe(ctx, inst).unwrap()
}

// =============================================================================
// Type Mutation + Invalidation Tests
// =============================================================================

/// Test: mutating an ancestor invalidates the entry exactly once.
#[test]
fn test_classic_override() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let a = rt.new_type(TypeSpec::new("A").attr("foo", Value::int(42))).unwrap();
    let b = rt.new_type(TypeSpec::new("B").base(&a)).unwrap();
    let inst = rt.new_instance(&b);
    let cache = LoadAttrCache::new(intern("foo"), 0, &ctx);

    assert_eq!(load(&cache, &ctx, &inst), Value::int(42));
    assert_eq!(load(&cache, &ctx, &inst), Value::int(42));
    assert_eq!(cache.stats().hits, 1);

    rt.set_type_value(&a, "foo", Value::int(0)).unwrap();
    assert_eq!(load(&cache, &ctx, &inst), Value::int(0));
    assert_eq!(cache.stats().invalidations, 1);
    assert_eq!(load(&cache, &ctx, &inst), Value::int(0));
    assert_eq!(cache.stats().invalidations, 1);
}

/// Test: a non-data descriptor gaining and losing `__set__`.
#[test]
fn test_descriptor_kind_change() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let d = Descriptor::non_data(getter(|_| Ok(Value::str("d"))));
    let c = rt.new_type(TypeSpec::new("C").descriptor("x", &d)).unwrap();
    let inst = rt.new_instance(&c);
    let cache = LoadAttrCache::new(intern("x"), 0, &ctx);

    for _ in 0..3 {
        assert_eq!(load(&cache, &ctx, &inst), Value::str("d"));
    }

    rt.set_descriptor_setter(&d, Some(setter(|_, _| Ok(()))));
    assert_eq!(load(&cache, &ctx, &inst), Value::str("d"));

    rt.instance_dict_set(&inst, &intern("x"), Value::str("i")).unwrap();
    assert_eq!(load(&cache, &ctx, &inst), Value::str("d"));

    rt.set_descriptor_setter(&d, None);
    assert_eq!(load(&cache, &ctx, &inst), Value::str("i"));
    assert_eq!(
        load(&cache, &ctx, &inst),
        rt.get_attr(&inst, &intern("x")).unwrap()
    );
}

/// Test: `__bases__` reassignment brings in a name some instances shadow.
#[test]
fn test_bases_reassignment_shadowing() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let base1 = rt.new_type(TypeSpec::new("Base1")).unwrap();
    let base2 = rt.new_type(TypeSpec::new("Base2").attr("foo", Value::int(42))).unwrap();
    let d = rt.new_type(TypeSpec::new("D").base(&base1)).unwrap();
    let d1 = rt.new_instance(&d);
    let d2 = rt.new_instance(&d);
    rt.set_attr(&d2, &intern("foo"), Value::int(0)).unwrap();
    let cache = LoadAttrCache::new(intern("foo"), 0, &ctx);

    assert!(cache.probe(&ctx, &d1).unwrap_err().is_attribute_error());
    assert!(cache.probe(&ctx, &d1).unwrap_err().is_attribute_error());

    rt.set_bases(&d, vec![base2.clone()]).unwrap();
    assert!(d.may_shadow());
    assert_eq!(load(&cache, &ctx, &d1), Value::int(42));
    assert_eq!(load(&cache, &ctx, &d2), Value::int(0));
    assert_eq!(load(&cache, &ctx, &d1), Value::int(42));
}

/// Test: replacing a split dict with a combined dict of a new shape.
#[test]
fn test_split_keys_swap() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let a = rt.new_type(TypeSpec::new("A")).unwrap();
    let i1 = rt.new_instance(&a);
    rt.set_attr(&i1, &intern("x"), Value::int(1)).unwrap();
    let i2 = rt.new_instance(&a);
    rt.set_attr(&i2, &intern("x"), Value::int(2)).unwrap();
    assert!(i1.dict_is_split());
    assert_eq!(i1.keys_of(), i2.keys_of());
    let cache = LoadAttrCache::new(intern("x"), 0, &ctx);

    assert_eq!(load(&cache, &ctx, &i1), Value::int(1));
    assert_eq!(load(&cache, &ctx, &i2), Value::int(2));
    assert!(cache.stats().hits >= 1);

    rt.replace_instance_dict(
        &i1,
        [(intern("y"), Value::int(6)), (intern("x"), Value::int(5))],
    )
    .unwrap();
    assert!(!i1.dict_is_split());
    assert_eq!(load(&cache, &ctx, &i1), Value::int(5));
    assert_eq!(load(&cache, &ctx, &i2), Value::int(2));
}

/// Test: destroying a type under a metaclass MRO that omits it.
#[test]
fn test_destruction_with_metaclass_mro() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let object = rt.object_type().clone();
    let a = rt.new_type(TypeSpec::new("A").attr("v", Value::int(1))).unwrap();
    let attr = rt.new_type(TypeSpec::new("Attr").attr("v", Value::int(2))).unwrap();
    let unrelated = rt.new_type(TypeSpec::new("U").attr("v", Value::int(3))).unwrap();

    let hook_a = a.clone();
    let hook = mro_hook(move |_, default: &[TypeRef]| {
        if default.iter().any(|t| t.id() == hook_a.id()) {
            default.to_vec()
        } else {
            vec![hook_a.clone(), object.clone()]
        }
    });
    let sub = rt.new_type(TypeSpec::new("Sub").base(&a).mro_hook(hook)).unwrap();
    let sub_id = sub.id();
    let inst = rt.new_instance(&sub);
    let cache = LoadAttrCache::new(intern("v"), 0, &ctx);

    assert_eq!(load(&cache, &ctx, &inst), Value::int(1));
    rt.set_bases(&sub, vec![attr.clone()]).unwrap();
    assert!(!sub.mro_ids().contains(&sub_id));
    assert_eq!(load(&cache, &ctx, &inst), Value::int(1));
    assert_eq!(load(&cache, &ctx, &inst), rt.get_attr(&inst, &intern("v")).unwrap());
    assert_eq!(ctx.graph.dependents(sub_id), 1);

    drop(inst);
    drop(sub);
    assert_eq!(ctx.graph.dependents(sub_id), 0);

    let u = rt.new_instance(&unrelated);
    assert_eq!(load(&cache, &ctx, &u), Value::int(3));
    assert!(cache.stats().invalidations >= 2);
    assert_eq!(cache.len(), 1);
}

// =============================================================================
// Cross-Site Tests
// =============================================================================

/// Test: store then load through two sites sees the stored value.
#[test]
fn test_store_then_load_across_sites() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let d = Descriptor::non_data(getter(|_| Ok(Value::int(-1))));
    let c = rt
        .new_type(TypeSpec::new("C").descriptor("nd", &d).slots(&["s"]))
        .unwrap();
    let inst = rt.new_instance(&c);

    for name in ["nd", "s", "plain"] {
        let store = StoreAttrCache::new(intern(name), 0, &ctx);
        let load_site = LoadAttrCache::new(intern(name), 1, &ctx);
        for i in 0..3 {
            store.probe(&ctx, &inst, Value::int(i)).unwrap();
            assert_eq!(load(&load_site, &ctx, &inst), Value::int(i), "{name}");
        }
    }
}

/// Test: a method shadowed on one instance does not leak to others.
#[test]
fn test_method_shadow_isolated() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let c = rt.new_type(TypeSpec::new("C").method("run")).unwrap();
    let plain = rt.new_instance(&c);
    let shadowed = rt.new_instance(&c);
    let cache = LoadMethodCache::new(intern("run"), 0, &ctx);

    let unbound = cache.probe(&ctx, &plain).unwrap();
    assert!(unbound.receiver.is_some());

    rt.set_attr(&shadowed, &intern("run"), Value::int(7)).unwrap();
    assert_eq!(cache.probe(&ctx, &shadowed).unwrap(), MethodPair::attr(Value::int(7)));
    assert_eq!(cache.probe(&ctx, &plain).unwrap(), unbound);
}

/// Test: more receiver types than capacity stays correct.
#[test]
fn test_megamorphic_stays_correct() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let types: Vec<TypeRef> = (0..12)
        .map(|i| {
            rt.new_type(TypeSpec::new(&format!("T{i}")).attr("x", Value::int(i)))
                .unwrap()
        })
        .collect();
    let instances: Vec<InstanceRef> = types.iter().map(|t| rt.new_instance(t)).collect();
    let cache = LoadAttrCache::new(intern("x"), 0, &ctx);

    for _ in 0..4 {
        for (i, inst) in instances.iter().enumerate() {
            assert_eq!(load(&cache, &ctx, inst), Value::int(i as i64));
        }
    }
    assert_eq!(cache.header().state(), IcState::Megamorphic);
    assert!(cache.is_empty());

    rt.set_type_value(&types[3], "x", Value::int(99)).unwrap();
    assert_eq!(load(&cache, &ctx, &instances[3]), Value::int(99));
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

/// Test: probes racing a mutation return either side of it, and the new
/// value once the mutation has returned.
#[test]
fn test_concurrent_probe_and_mutation() {
    let rt = Runtime::new();
    let ctx = test_context(&rt);
    let a = rt.new_type(TypeSpec::new("A").attr("x", Value::int(1))).unwrap();
    let inst = rt.new_instance(&a);
    let cache = Arc::new(LoadAttrCache::new(intern("x"), 0, &ctx));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (cache, ctx, inst) = (Arc::clone(&cache), ctx.clone(), Arc::clone(&inst));
            thread::spawn(move || {
                for _ in 0..500 {
                    let v = cache.probe(&ctx, &inst).unwrap();
                    assert!(v == Value::int(1) || v == Value::int(2));
                }
            })
        })
        .collect();
    rt.set_type_value(&a, "x", Value::int(2)).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.probe(&ctx, &inst).unwrap(), Value::int(2));
}
