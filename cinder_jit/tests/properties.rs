//! Property-based tests for the inline caches.
//!
//! Random traces of type mutations, instance writes, `__class__` swaps,
//! module writes and probes run against a small class hierarchy and one
//! module. Every probe must agree with the uncached reference path at the
//! same point of the trace, including right after a mutation. Some traces
//! run with a tiny version ceiling so the counter wraps mid-trace.

#![allow(clippy::unwrap_used, reason = "Tests can panic")]

use cinder_core::{Value, intern};
use cinder_jit::{CodeObject, CompiledFunction, Dispatch, Jit, JitConfig, SiteSpec};
use cinder_runtime::{
    Descriptor, InstanceRef, ModuleRef, Runtime, RuntimeConfig, TypeRef, TypeSpec, getter,
    mro_hook, setter,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

const NAMES: [&str; 4] = ["x", "y", "d", "m"];

/// Sites per name: load, store, method, module global.
const SITES: usize = 4;

// -- Trace Model --

#[derive(Debug, Clone)]
enum Op {
    SetClassAttr { ty: usize, name: usize, value: i64 },
    DelClassAttr { ty: usize, name: usize },
    Store { inst: usize, name: usize, value: i64 },
    ReplaceDict { inst: usize, name: usize, value: i64 },
    ToggleDataDescriptor,
    SwapBases,
    Bump { ty: usize },
    SetClass { inst: usize, ty: usize },
    ModuleSet { name: usize, value: i64 },
    ModuleDel { name: usize },
    Load { inst: usize, name: usize },
    LoadMethod { inst: usize, name: usize },
    LoadModule { name: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let ty = 0..4usize;
    let inst = 0..4usize;
    let name = 0..NAMES.len();
    let value = -5i64..5;
    prop_oneof![
        1 => (ty.clone(), name.clone(), value.clone())
            .prop_map(|(ty, name, value)| Op::SetClassAttr { ty, name, value }),
        1 => (ty.clone(), name.clone()).prop_map(|(ty, name)| Op::DelClassAttr { ty, name }),
        1 => (inst.clone(), name.clone(), value.clone())
            .prop_map(|(inst, name, value)| Op::Store { inst, name, value }),
        1 => (inst.clone(), name.clone(), value.clone())
            .prop_map(|(inst, name, value)| Op::ReplaceDict { inst, name, value }),
        1 => Just(Op::ToggleDataDescriptor),
        1 => Just(Op::SwapBases),
        1 => ty.clone().prop_map(|ty| Op::Bump { ty }),
        1 => (inst.clone(), ty).prop_map(|(inst, ty)| Op::SetClass { inst, ty }),
        1 => (name.clone(), value.clone()).prop_map(|(name, value)| Op::ModuleSet { name, value }),
        1 => name.clone().prop_map(|name| Op::ModuleDel { name }),
        3 => (inst.clone(), name.clone()).prop_map(|(inst, name)| Op::Load { inst, name }),
        2 => (inst, name.clone()).prop_map(|(inst, name)| Op::LoadMethod { inst, name }),
        2 => name.prop_map(|name| Op::LoadModule { name }),
    ]
}

/// Mostly the default ceiling, sometimes one small enough to wrap.
fn max_version_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        2 => Just(u64::MAX - 1),
        1 => 4u64..48,
    ]
}

// -- Universe --

/// `A`, `B(A)`, `C(B)` with a metaclass MRO, and unrelated `D`; one
/// instance of each, and one module.
struct Universe {
    rt: Arc<Runtime>,
    jit: Jit,
    types: Vec<TypeRef>,
    instances: Vec<InstanceRef>,
    module: ModuleRef,
    descriptor: Arc<Descriptor>,
    cell: Arc<Mutex<Value>>,
    function: Arc<CompiledFunction>,
}

impl Universe {
    fn new(max_version: u64) -> Self {
        let rt = Runtime::with_config(RuntimeConfig::for_testing().with_max_version(max_version));
        let jit = Jit::new(Arc::clone(&rt), JitConfig::for_testing());

        let cell = Arc::new(Mutex::new(Value::str("cell")));
        let read = Arc::clone(&cell);
        let descriptor = Descriptor::non_data(getter(move |_| Ok(read.lock().clone())));

        let a = rt
            .new_type(TypeSpec::new("A").attr("x", Value::int(1)).descriptor("d", &descriptor))
            .unwrap();
        let b = rt.new_type(TypeSpec::new("B").base(&a).method("m")).unwrap();
        let c = rt
            .new_type(
                TypeSpec::new("C")
                    .base(&b)
                    .mro_hook(mro_hook(|_, default: &[TypeRef]| default.to_vec())),
            )
            .unwrap();
        let d = rt.new_type(TypeSpec::new("D").attr("y", Value::int(4))).unwrap();
        let types = vec![a, b, c, d];
        let instances = types.iter().map(|t| rt.new_instance(t)).collect();
        let module = rt.new_module("globals", true);
        rt.module_set(&module, "x", Value::int(0));

        let mut layout = Vec::new();
        for name in NAMES {
            layout.push(SiteSpec::load_attr(name));
            layout.push(SiteSpec::store_attr(name));
            layout.push(SiteSpec::load_method(name));
            layout.push(SiteSpec::load_module_attr(name));
        }
        let code = CodeObject::new("trace", layout);
        let function = loop {
            if let Dispatch::Compiled(f) = jit.dispatch(&code) {
                break f;
            }
        };

        Self {
            rt,
            jit,
            types,
            instances,
            module,
            descriptor,
            cell,
            function,
        }
    }

    fn apply(&self, op: &Op) -> Result<(), TestCaseError> {
        let (rt, jit, f) = (&self.rt, &self.jit, &self.function);
        match *op {
            Op::SetClassAttr { ty, name, value } => {
                rt.set_type_value(&self.types[ty], NAMES[name], Value::int(value))
                    .unwrap();
            }
            Op::DelClassAttr { ty, name } => {
                let _ = rt.del_type_attr(&self.types[ty], NAMES[name]);
            }
            Op::Store { inst, name, value } => {
                let receiver = &self.instances[inst];
                let cached = jit.probe_store_attr(f, name * SITES + 1, receiver, Value::int(value));
                prop_assert!(cached.is_ok(), "store failed: {:?}", cached);
                prop_assert_eq!(
                    rt.get_attr(receiver, &intern(NAMES[name])).unwrap(),
                    Value::int(value)
                );
            }
            Op::ReplaceDict { inst, name, value } => {
                rt.replace_instance_dict(
                    &self.instances[inst],
                    [(intern(NAMES[name]), Value::int(value))],
                )
                .unwrap();
            }
            Op::ToggleDataDescriptor => {
                if self.descriptor.is_data() {
                    rt.set_descriptor_setter(&self.descriptor, None);
                } else {
                    let write = Arc::clone(&self.cell);
                    rt.set_descriptor_setter(
                        &self.descriptor,
                        Some(setter(move |_, v| {
                            *write.lock() = v;
                            Ok(())
                        })),
                    );
                }
            }
            Op::SwapBases => {
                let c = &self.types[2];
                let next = if c.bases()[0].id() == self.types[1].id() {
                    &self.types[0]
                } else {
                    &self.types[1]
                };
                rt.set_bases(c, vec![next.clone()]).unwrap();
            }
            Op::Bump { ty } => rt.bump(&self.types[ty]),
            Op::SetClass { inst, ty } => {
                rt.set_class(&self.instances[inst], &self.types[ty]).unwrap();
            }
            Op::ModuleSet { name, value } => {
                rt.module_set(&self.module, NAMES[name], Value::int(value));
            }
            Op::ModuleDel { name } => {
                let _ = rt.module_del(&self.module, NAMES[name]);
            }
            Op::Load { inst, name } => {
                let receiver = &self.instances[inst];
                let cached = jit.probe_load_attr(f, name * SITES, receiver);
                let reference = rt.get_attr(receiver, &intern(NAMES[name]));
                prop_assert_eq!(cached, reference);
            }
            Op::LoadMethod { inst, name } => {
                let receiver = &self.instances[inst];
                let cached = jit.probe_load_method(f, name * SITES + 2, receiver);
                let reference = rt.load_method(receiver, &intern(NAMES[name]));
                prop_assert_eq!(cached, reference);
            }
            Op::LoadModule { name } => {
                let cached = jit.probe_load_module_attr(f, name * SITES + 3, &self.module);
                let reference = rt.module_get_attr(&self.module, &intern(NAMES[name]));
                prop_assert_eq!(cached, reference);
            }
        }
        Ok(())
    }

    /// Probe every site against every instance.
    fn check_all(&self) -> Result<(), TestCaseError> {
        for name in 0..NAMES.len() {
            for inst in 0..self.instances.len() {
                self.apply(&Op::Load { inst, name })?;
                self.apply(&Op::LoadMethod { inst, name })?;
            }
            self.apply(&Op::LoadModule { name })?;
        }
        Ok(())
    }
}

// -- Properties --

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Cached probes agree with uncached resolution at every point.
    #[test]
    fn probes_match_reference(
        max_version in max_version_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let universe = Universe::new(max_version);
        for op in &ops {
            universe.apply(op)?;
        }
        universe.check_all()?;
    }

    /// Once a mutation returns, every receiver sees it.
    #[test]
    fn no_stale_read_after_mutation(
        max_version in max_version_strategy(),
        warm in prop::collection::vec(op_strategy(), 0..20),
        ty in 0..4usize,
        name in 0..NAMES.len(),
        value in 10i64..20,
    ) {
        let universe = Universe::new(max_version);
        for op in &warm {
            universe.apply(op)?;
        }
        universe.check_all()?;
        universe.apply(&Op::SetClassAttr { ty, name, value })?;
        universe.check_all()?;
        universe.apply(&Op::ModuleSet { name, value })?;
        universe.check_all()?;
    }
}
