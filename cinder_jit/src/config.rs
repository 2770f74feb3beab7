//! JIT configuration.

// =============================================================================
// JIT Configuration
// =============================================================================

/// Configuration for compilation and inline caching.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Enable JIT compilation.
    pub enabled: bool,
    /// Calls before a function is compiled.
    pub compile_threshold: u64,
    /// Entries per polymorphic cache site.
    pub poly_capacity: usize,
    /// Evictions within `eviction_window` probes that demote a site to
    /// megamorphic.
    pub megamorphic_eviction_limit: u32,
    /// Width of the eviction window, in probes of the site.
    pub eviction_window: u64,
    /// Dependents of a destroyed type above which every cache is dropped in
    /// one sweep instead of entry by entry.
    pub bulk_invalidation_threshold: usize,
    /// Cache sites allocated per compiled function; later sites run
    /// uncached.
    pub max_sites_per_function: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compile_threshold: 1_000,
            poly_capacity: 4,
            megamorphic_eviction_limit: 8,
            eviction_window: 256,
            bulk_invalidation_threshold: 4_096,
            max_sites_per_function: 256,
        }
    }
}

impl JitConfig {
    /// Create a disabled configuration.
    #[inline]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Create a configuration for testing (low thresholds, tiny tables).
    pub fn for_testing() -> Self {
        Self {
            enabled: true,
            compile_threshold: 2,
            poly_capacity: 4,
            megamorphic_eviction_limit: 3,
            eviction_window: 64,
            bulk_invalidation_threshold: 64,
            max_sites_per_function: 16,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
