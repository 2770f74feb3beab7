//! `StoreAttr` cache: `receiver.name = value`.
//!
//! Plans that write split storage carry the receiver's keys identity in their
//! guard; growth of the type's shared keys fires the type's watchers as well.

use super::resolve::{StorePlan, resolve_store};
use super::site::TypeSite;
use super::{IcContext, IcKind};
use cinder_core::{CinderResult, InternedString, Value};
use cinder_runtime::InstanceRef;
use std::ops::Deref;

/// Attribute store site.
#[derive(Debug)]
pub struct StoreAttrCache {
    site: TypeSite<StorePlan>,
}

impl StoreAttrCache {
    /// Create an empty site.
    pub fn new(name: InternedString, index: u32, ctx: &IcContext) -> Self {
        Self {
            site: TypeSite::new(name, index, IcKind::StoreAttr, ctx),
        }
    }

    /// `probe_store_attr(site, receiver, name, value)`.
    pub fn probe(&self, ctx: &IcContext, receiver: &InstanceRef, value: Value) -> CinderResult<()> {
        let ty = receiver.type_of();
        let keys = receiver.keys_of();
        let version = ty.version();
        if let Some(plan) = self.site.lookup(&ty, keys) {
            return plan.execute(&ctx.runtime, receiver, self.site.name(), value);
        }
        let resolution = resolve_store(&ty, keys, self.site.name());
        let plan = self.site.install(ctx, &ty, version, resolution);
        plan.execute(&ctx.runtime, receiver, self.site.name(), value)
    }
}

impl Deref for StoreAttrCache {
    type Target = TypeSite<StorePlan>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.site
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic::test_context;
    use cinder_core::intern;
    use cinder_runtime::{Descriptor, Runtime, TypeSpec, getter, setter};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_store_then_load() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let a = rt.new_type(TypeSpec::new("A")).unwrap();
        let inst = rt.new_instance(&a);
        let cache = StoreAttrCache::new(intern("x"), 0, &ctx);

        for i in 0..4 {
            cache.probe(&ctx, &inst, Value::int(i)).unwrap();
            assert_eq!(rt.get_attr(&inst, &intern("x")).unwrap(), Value::int(i));
        }
        // The first store grew the shared keys; the split-index plan is
        // installed after that.
        assert!(cache.stats().hits >= 2);
    }

    #[test]
    fn test_store_through_data_descriptor() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let cell = Arc::new(Mutex::new(Value::none()));
        let (read, write) = (Arc::clone(&cell), Arc::clone(&cell));
        let d = Descriptor::data(
            getter(move |_| Ok(read.lock().clone())),
            setter(move |_, v| {
                *write.lock() = v;
                Ok(())
            }),
        );
        let c = rt.new_type(TypeSpec::new("C").descriptor("p", &d)).unwrap();
        let inst = rt.new_instance(&c);
        let cache = StoreAttrCache::new(intern("p"), 0, &ctx);

        cache.probe(&ctx, &inst, Value::int(3)).unwrap();
        cache.probe(&ctx, &inst, Value::int(4)).unwrap();
        assert_eq!(*cell.lock(), Value::int(4));
        assert!(!inst.dict_contains(&intern("p")));
    }

    #[test]
    fn test_store_read_only() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let s = rt
            .new_type(TypeSpec::new("S").attr("k", Value::int(0)).without_dict())
            .unwrap();
        let inst = rt.new_instance(&s);
        let cache = StoreAttrCache::new(intern("k"), 0, &ctx);

        let err = cache.probe(&ctx, &inst, Value::int(1)).unwrap_err();
        assert_eq!(err, rt.set_attr(&inst, &intern("k"), Value::int(1)).unwrap_err());
    }

    #[test]
    fn test_keys_growth_invalidates_split_store() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let a = rt.new_type(TypeSpec::new("A")).unwrap();
        let i1 = rt.new_instance(&a);
        let cache = StoreAttrCache::new(intern("x"), 0, &ctx);

        cache.probe(&ctx, &i1, Value::int(1)).unwrap();
        cache.probe(&ctx, &i1, Value::int(2)).unwrap();
        assert_eq!(cache.len(), 1);

        // A new name grows the shared keys and fires A's watchers.
        rt.set_attr(&i1, &intern("y"), Value::int(0)).unwrap();
        cache.probe(&ctx, &i1, Value::int(3)).unwrap();
        assert!(cache.stats().invalidations >= 1);
        assert_eq!(rt.get_attr(&i1, &intern("x")).unwrap(), Value::int(3));
        assert_eq!(rt.get_attr(&i1, &intern("y")).unwrap(), Value::int(0));
    }
}
