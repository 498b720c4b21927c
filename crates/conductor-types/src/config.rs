//! Engine configuration types for conductor.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! staleness thresholds, resolver limits and the workflow file catalog.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
///
/// Loaded from `~/.conductor/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A running execution with no update for this long is considered abandoned.
    #[serde(default = "default_stale_threshold_minutes")]
    pub stale_threshold_minutes: u64,

    /// Interval between stale-execution sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum `extends` chain length.
    #[serde(default = "default_max_inheritance_depth")]
    pub max_inheritance_depth: usize,

    /// Maximum template substitution passes per string.
    #[serde(default = "default_max_expression_passes")]
    pub max_expression_passes: usize,

    /// Directory scanned for workflow documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
}

fn default_stale_threshold_minutes() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_inheritance_depth() -> usize {
    10
}

fn default_max_expression_passes() -> usize {
    10
}

impl EngineConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_threshold_minutes as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_threshold_minutes: default_stale_threshold_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_inheritance_depth: default_max_inheritance_depth(),
            max_expression_passes: default_max_expression_passes(),
            workflows_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.stale_threshold_minutes, 30);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.max_inheritance_depth, 10);
        assert_eq!(config.max_expression_passes, 10);
        assert!(config.workflows_dir.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
stale_threshold_minutes = 5
max_inheritance_depth = 3
workflows_dir = "/srv/workflows"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stale_threshold_minutes, 5);
        assert_eq!(config.max_inheritance_depth, 3);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.workflows_dir, Some(PathBuf::from("/srv/workflows")));
        assert_eq!(config.stale_after(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = EngineConfig {
            sweep_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(1));
    }
}
