//! `LoadMethod` cache: `receiver.name(...)` without allocating a bound
//! method.
//!
//! The unbound `(function, receiver)` action is only installed while the
//! receiver type's shadow bit is clear. Setting the bit fires the type's
//! watchers before the shadowing value is published, so such an entry is
//! never replayed against an instance that hides the method.

use super::resolve::{MethodPlan, resolve_method};
use super::site::TypeSite;
use super::{IcContext, IcKind};
use cinder_core::{CinderResult, InternedString};
use cinder_runtime::{InstanceRef, MethodPair};
use std::ops::Deref;

/// Method load site.
#[derive(Debug)]
pub struct LoadMethodCache {
    site: TypeSite<MethodPlan>,
}

impl LoadMethodCache {
    /// Create an empty site.
    pub fn new(name: InternedString, index: u32, ctx: &IcContext) -> Self {
        Self {
            site: TypeSite::new(name, index, IcKind::LoadMethod, ctx),
        }
    }

    /// `probe_load_method(site, receiver, name)`.
    pub fn probe(&self, ctx: &IcContext, receiver: &InstanceRef) -> CinderResult<MethodPair> {
        let ty = receiver.type_of();
        let keys = receiver.keys_of();
        let version = ty.version();
        if let Some(plan) = self.site.lookup(&ty, keys) {
            return plan.execute(receiver, self.site.name());
        }
        let resolution = resolve_method(&ty, keys, self.site.name());
        let plan = self.site.install(ctx, &ty, version, resolution);
        plan.execute(receiver, self.site.name())
    }
}

impl Deref for LoadMethodCache {
    type Target = TypeSite<MethodPlan>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.site
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic::test_context;
    use cinder_core::{Value, intern};
    use cinder_runtime::{RecordedEvent, RecordingObserver, Runtime, TypeSpec};
    use std::sync::Arc;

    #[test]
    fn test_unbound_pair() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let c = rt.new_type(TypeSpec::new("C").method("f")).unwrap();
        let inst = rt.new_instance(&c);
        let cache = LoadMethodCache::new(intern("f"), 0, &ctx);

        let first = cache.probe(&ctx, &inst).unwrap();
        let second = cache.probe(&ctx, &inst).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(second.receiver.as_ref().unwrap(), &inst));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_shadowing_fires_before_publish() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let c = rt.new_type(TypeSpec::new("C").method("f")).unwrap();
        let inst = rt.new_instance(&c);
        let cache = LoadMethodCache::new(intern("f"), 0, &ctx);
        cache.probe(&ctx, &inst).unwrap();

        let rec = Arc::new(RecordingObserver::new());
        rt.register_observer(rec.clone());
        rt.set_attr(&inst, &intern("f"), Value::int(5)).unwrap();
        assert!(rec.events().iter().any(|e| matches!(
            e,
            RecordedEvent::Mutation(id, cinder_runtime::MutationKind::InstanceShadowed(_))
                if *id == c.id()
        )));

        assert_eq!(cache.probe(&ctx, &inst).unwrap(), MethodPair::attr(Value::int(5)));
        let other = rt.new_instance(&c);
        let pair = cache.probe(&ctx, &other).unwrap();
        assert_eq!(pair, rt.load_method(&other, &intern("f")).unwrap());
        assert!(pair.receiver.is_some());
    }

    #[test]
    fn test_non_function_attribute() {
        let rt = Runtime::new();
        let ctx = test_context(&rt);
        let c = rt.new_type(TypeSpec::new("C").attr("v", Value::int(8))).unwrap();
        let inst = rt.new_instance(&c);
        let cache = LoadMethodCache::new(intern("v"), 0, &ctx);

        assert_eq!(cache.probe(&ctx, &inst).unwrap(), MethodPair::attr(Value::int(8)));
        assert!(cache.probe(&ctx, &rt.new_instance(&c)).is_ok());
    }
}
