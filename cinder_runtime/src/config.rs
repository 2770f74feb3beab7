//! Runtime configuration.

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Configuration for the host runtime model.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Highest version tag before the counter wraps and every cache is
    /// dropped.
    pub max_version: u64,
    /// Largest shared split-dict key array a type will grow to. Stores of
    /// further new names convert the instance dict to a combined dict.
    pub max_shared_keys: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_version: u64::MAX - 1,
            max_shared_keys: 30,
        }
    }
}

impl RuntimeConfig {
    /// Create a config for testing (small version ceiling and key limit).
    pub fn for_testing() -> Self {
        Self {
            max_version: 1 << 16,
            max_shared_keys: 8,
        }
    }

    /// Set the version ceiling. Values below
    /// [`VersionAllocator::MIN_MAX`](crate::VersionAllocator::MIN_MAX) are
    /// raised to it.
    #[must_use]
    pub fn with_max_version(mut self, max_version: u64) -> Self {
        self.max_version = max_version;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_version, u64::MAX - 1);
        assert_eq!(config.max_shared_keys, 30);
    }

    #[test]
    fn test_testing_config() {
        let config = RuntimeConfig::for_testing().with_max_version(10);
        assert_eq!(config.max_version, 10);
        assert_eq!(config.max_shared_keys, 8);
    }
}
