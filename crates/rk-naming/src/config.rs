//! Naming subsystem configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```ron
//! (strict: false, cache_capacity: 64)
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NamingError, NamingResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Block geometric rescue once topological references failed
    pub strict: bool,
    /// Heal a single index/ShapeID pair instead of failing on mismatch
    pub single_ref_pair_healing: bool,
    /// Minimum score a geometric match must exceed
    pub selector_threshold: f32,
    /// Tolerance stored in newly captured selectors
    pub selector_tolerance: f32,
    /// Quantization step of geometry fingerprints
    pub fingerprint_precision: f32,
    /// Maximum number of cached kernel results
    pub cache_capacity: usize,
    /// Time-to-live of cached kernel results
    pub cache_ttl_secs: Option<u64>,
    /// Compare before/after state and sweep orphans after every rollback
    pub validate_after_rollback: bool,
    /// Remove removable orphans found after a rollback
    pub remove_orphans_after_rollback: bool,
    /// Generations kept per body after a commit
    pub max_generations: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strict: true,
            single_ref_pair_healing: true,
            selector_threshold: crate::selector::DEFAULT_MATCH_THRESHOLD,
            selector_tolerance: 1e-3,
            fingerprint_precision: 1e-4,
            cache_capacity: 256,
            cache_ttl_secs: None,
            validate_after_rollback: true,
            remove_orphans_after_rollback: true,
            max_generations: 64,
        }
    }
}

impl NamingConfig {
    /// Relaxed policy: selectors may rescue failed topological references
    pub fn relaxed() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    /// Parse a config from ron text
    pub fn from_ron_str(text: &str) -> NamingResult<Self> {
        let config: NamingConfig =
            ron::from_str(text).map_err(|e| NamingError::Deserialize(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a ron file
    pub fn load(path: impl AsRef<Path>) -> NamingResult<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| NamingError::Io(e.to_string()))?;
        Self::from_ron_str(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> NamingResult<()> {
        if !(0.0..1.0).contains(&self.selector_threshold) {
            return Err(NamingError::Config(format!(
                "selector_threshold must be in [0, 1), got {}",
                self.selector_threshold
            )));
        }
        if self.fingerprint_precision <= 0.0 || self.selector_tolerance <= 0.0 {
            return Err(NamingError::Config(
                "fingerprint_precision and selector_tolerance must be positive".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(NamingError::Config("cache_capacity must be at least 1".into()));
        }
        if self.max_generations < 2 {
            return Err(NamingError::Config("max_generations must be at least 2".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = NamingConfig::from_ron_str("(strict: false, cache_capacity: 8)").unwrap();
        assert!(!config.strict);
        assert_eq!(config.cache_capacity, 8);
        assert!(config.single_ref_pair_healing);
        assert_eq!(config.selector_threshold, 0.6);
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(NamingConfig::from_ron_str("(selector_threshold: 1.5)").is_err());
        assert!(NamingConfig::from_ron_str("(cache_capacity: 0)").is_err());
        assert!(NamingConfig::from_ron_str("(strict: maybe)").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("naming.ron");
        std::fs::write(&path, "(cache_ttl_secs: Some(30), max_generations: 4)").unwrap();

        let config = NamingConfig::load(&path).unwrap();
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_generations, 4);
        assert!(NamingConfig::load(dir.path().join("missing.ron")).is_err());
    }
}
