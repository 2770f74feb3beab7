//! `LoadAttr` cache: `receiver.name`.

use super::resolve::{LoadPlan, resolve_load};
use super::site::TypeSite;
use super::{IcContext, IcKind};
use cinder_core::{CinderResult, InternedString, Value};
use cinder_runtime::InstanceRef;
use std::ops::Deref;

/// Attribute load site.
#[derive(Debug)]
pub struct LoadAttrCache {
    site: TypeSite<LoadPlan>,
}

impl LoadAttrCache {
    /// Create an empty site.
    pub fn new(name: InternedString, index: u32, ctx: &IcContext) -> Self {
        Self {
            site: TypeSite::new(name, index, IcKind::LoadAttr, ctx),
        }
    }

    /// `probe_load_attr(site, receiver, name)`.
    pub fn probe(&self, ctx: &IcContext, receiver: &InstanceRef) -> CinderResult<Value> {
        let ty = receiver.type_of();
        let keys = receiver.keys_of();
        let version = ty.version();
        if let Some(plan) = self.site.lookup(&ty, keys) {
            return plan.execute(receiver, self.site.name());
        }
        let resolution = resolve_load(&ty, keys, self.site.name());
        let plan = self.site.install(ctx, &ty, version, resolution);
        plan.execute(receiver, self.site.name())
    }
}

impl Deref for LoadAttrCache {
    type Target = TypeSite<LoadPlan>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.site
    }
}
