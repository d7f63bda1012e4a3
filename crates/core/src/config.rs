//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use voxcel_primitives::Size3;
use voxcel_sheet::SizeLimits;

use crate::error::{EngineError, Result};

/// Tunables for one engine instance. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Committed transactions kept for undo.
    pub history_limit: usize,
    /// Largest range a formula may read or depend on.
    pub max_range_cells: u64,
    /// Per-axis size cap for any array.
    pub max_array_extent: u32,
    /// Total cell cap for any array.
    pub max_array_cells: u64,
    /// Follow-up passes a single commit may run for emitted cells and
    /// dirty globals.
    pub max_recompute_passes: usize,
    pub default_array_size: Size3,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            max_range_cells: voxcel_dag::DEFAULT_MAX_RANGE_CELLS,
            max_array_extent: 4096,
            max_array_cells: 262_144,
            max_recompute_passes: 16,
            default_array_size: Size3::new(6, 4, 6),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recompute_passes == 0 {
            return Err(EngineError::Config(
                "max_recompute_passes must be at least 1".to_string(),
            ));
        }
        let size = self.default_array_size;
        if size.x == 0 || size.y == 0 || size.z == 0 {
            return Err(EngineError::Config(format!(
                "default_array_size must be non-zero on every axis, got {size}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_extent: self.max_array_extent,
            max_cells: self.max_array_cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"history_limit": 5}"#).unwrap();
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.max_recompute_passes, 16);
        assert_eq!(config.default_array_size, Size3::new(6, 4, 6));
    }

    #[test]
    fn test_zero_passes_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_recompute_passes": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
