//! Specializing inline caches for the Cinder JIT.
//!
//! Attribute access in compiled code goes through per-site polymorphic
//! caches that stay correct under arbitrary type mutation:
//! - Type watcher graph with eager deregistration
//! - Resolution oracle producing replayable plans
//! - `LoadAttr`, `StoreAttr`, `LoadMethod` and `LoadModuleAttr` caches
//! - Deoptimization on instrumentation and bulk cold sweeps
//!
//! # Usage
//!
//! ```ignore
//! use cinder_jit::{Dispatch, Jit, JitConfig};
//!
//! let jit = Jit::new(runtime, JitConfig::default());
//! if let Dispatch::Compiled(f) = jit.dispatch(&code) {
//!     let v = jit.probe_load_attr(&f, 0, &receiver)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod ic;
pub mod runtime;

pub use config::JitConfig;
pub use error::{IcError, IcResult};
pub use ic::{
    IcContext, IcKind, IcManager, IcSite, IcSiteHeader, IcState, IcStats, JitListenerStatsSnapshot,
    JitTypeListener, SiteSpec, SiteStatsSnapshot, WatcherGraph, WatcherStats,
};
pub use runtime::{
    CodeCache, CodeCacheStats, CodeId, CodeObject, CompiledFunction, DeoptCoordinator, DeoptStats,
};

use cinder_core::{CinderError, CinderResult, InternedString, Value};
use cinder_runtime::{InstanceRef, MethodPair, ModuleRef, ObserverId, Runtime, TypeRef};
use std::sync::Arc;

// =============================================================================
// Dispatch
// =============================================================================

/// How a call of a code object runs.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Run compiled, probing the function's cache sites.
    Compiled(Arc<CompiledFunction>),
    /// Run in the interpreter over the uncached reference paths.
    Interpreted,
}

impl Dispatch {
    /// Check if the call runs compiled.
    #[inline]
    pub fn is_compiled(&self) -> bool {
        matches!(self, Self::Compiled(_))
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate JIT statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitStats {
    /// Code cache counters.
    pub code_cache: CodeCacheStats,
    /// Watcher graph counters.
    pub watchers: WatcherStats,
    /// Runtime event counters.
    pub listener: JitListenerStatsSnapshot,
    /// Deoptimization counters.
    pub deopt: DeoptStats,
}

// =============================================================================
// Jit
// =============================================================================

/// The JIT attached to one runtime.
///
/// Registers its listener on creation and unregisters it on drop.
pub struct Jit {
    runtime: Arc<Runtime>,
    config: JitConfig,
    ctx: IcContext,
    code_cache: Arc<CodeCache>,
    coordinator: Arc<DeoptCoordinator>,
    listener: Arc<JitTypeListener>,
    observer: ObserverId,
}

impl Jit {
    /// Attach a JIT to `runtime`.
    pub fn new(runtime: Arc<Runtime>, config: JitConfig) -> Self {
        let graph = WatcherGraph::new();
        let code_cache = Arc::new(CodeCache::new());
        let coordinator = Arc::new(DeoptCoordinator::new(
            Arc::clone(&code_cache),
            runtime.instrumentation_active(),
        ));
        let listener = Arc::new(JitTypeListener::new(
            Arc::clone(&graph),
            Arc::clone(&coordinator),
            config.bulk_invalidation_threshold,
        ));
        let observer = runtime.register_observer(listener.clone());
        let ctx = IcContext::new(Arc::clone(&runtime), graph, &config);
        Self {
            runtime,
            config,
            ctx,
            code_cache,
            coordinator,
            listener,
            observer,
        }
    }

    /// Host runtime.
    #[inline]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Configuration.
    #[inline]
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Context shared by every site.
    #[inline]
    pub fn context(&self) -> &IcContext {
        &self.ctx
    }

    /// Watcher graph.
    #[inline]
    pub fn graph(&self) -> &Arc<WatcherGraph> {
        &self.ctx.graph
    }

    /// Compiled functions.
    #[inline]
    pub fn code_cache(&self) -> &Arc<CodeCache> {
        &self.code_cache
    }

    /// Check if new compilations may be published.
    #[inline]
    pub fn compilation_allowed(&self) -> bool {
        self.config.enabled && self.coordinator.compilation_allowed()
    }

    /// Decide how a call of `code` runs, compiling it once the call count
    /// reaches `compile_threshold`.
    pub fn dispatch(&self, code: &Arc<CodeObject>) -> Dispatch {
        let calls = code.record_call();
        if !self.compilation_allowed() {
            return Dispatch::Interpreted;
        }
        if let Some(function) = self.code_cache.lookup(code.id()) {
            return Dispatch::Compiled(function);
        }
        if calls < self.config.compile_threshold {
            return Dispatch::Interpreted;
        }

        let function = Arc::new(CompiledFunction::compile(
            code,
            &self.ctx,
            self.config.max_sites_per_function,
        ));
        self.code_cache.insert(Arc::clone(&function));
        // Instrumentation may have arrived while the sites were allocated.
        if !self.coordinator.compilation_allowed() {
            self.code_cache.remove(code.id());
            return Dispatch::Interpreted;
        }
        tracing::debug!(
            name = %code.name(),
            calls,
            sites = code.layout().len(),
            "compiled function"
        );
        Dispatch::Compiled(function)
    }

    /// `probe_load_attr(site, receiver, name)`.
    pub fn probe_load_attr(
        &self,
        function: &CompiledFunction,
        site: usize,
        receiver: &InstanceRef,
    ) -> CinderResult<Value> {
        match function.sites().and_then(|s| s.load_attr(site)) {
            Some(cache) => cache.probe(&self.ctx, receiver),
            None => {
                let name = site_name(function, site)?;
                self.runtime.get_attr(receiver, name)
            }
        }
    }

    /// `probe_store_attr(site, receiver, name, value)`.
    pub fn probe_store_attr(
        &self,
        function: &CompiledFunction,
        site: usize,
        receiver: &InstanceRef,
        value: Value,
    ) -> CinderResult<()> {
        match function.sites().and_then(|s| s.store_attr(site)) {
            Some(cache) => cache.probe(&self.ctx, receiver, value),
            None => {
                let name = site_name(function, site)?;
                self.runtime.set_attr(receiver, name, value)
            }
        }
    }

    /// `probe_load_method(site, receiver, name)`.
    pub fn probe_load_method(
        &self,
        function: &CompiledFunction,
        site: usize,
        receiver: &InstanceRef,
    ) -> CinderResult<MethodPair> {
        match function.sites().and_then(|s| s.load_method(site)) {
            Some(cache) => cache.probe(&self.ctx, receiver),
            None => {
                let name = site_name(function, site)?;
                self.runtime.load_method(receiver, name)
            }
        }
    }

    /// `probe_load_module_attr(site, module, name)`.
    pub fn probe_load_module_attr(
        &self,
        function: &CompiledFunction,
        site: usize,
        module: &ModuleRef,
    ) -> CinderResult<Value> {
        match function.sites().and_then(|s| s.load_module_attr(site)) {
            Some(cache) => cache.probe(module),
            None => {
                let name = site_name(function, site)?;
                self.runtime.module_get_attr(module, name)
            }
        }
    }

    /// Invalidate every cache entry depending on `ty`. Returns the number
    /// of entries invalidated.
    pub fn invalidate_caches_on(&self, ty: &TypeRef) -> usize {
        let count = self.ctx.graph.fire(ty.id());
        tracing::debug!(type_id = ty.id().raw(), count, "caches invalidated on request");
        count
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> JitStats {
        JitStats {
            code_cache: self.code_cache.stats(),
            watchers: self.ctx.graph.stats(),
            listener: self.listener.stats().snapshot(),
            deopt: self.coordinator.stats(),
        }
    }
}

impl Drop for Jit {
    fn drop(&mut self) {
        self.runtime.unregister_observer(self.observer);
        self.code_cache.deopt_all();
    }
}

impl std::fmt::Debug for Jit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jit")
            .field("config", &self.config)
            .field("compiled", &self.code_cache.len())
            .field("compilation_allowed", &self.compilation_allowed())
            .finish_non_exhaustive()
    }
}

/// Name declared for `site` in the function's layout.
fn site_name(function: &CompiledFunction, site: usize) -> CinderResult<&InternedString> {
    function.code().site(site).map(|s| &s.name).ok_or_else(|| {
        CinderError::internal(format!(
            "function '{}' has no cache site {site}",
            function.code().name()
        ))
    })
}

/// Cinder JIT version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
