//! Engine configuration loader for conductor.
//!
//! Reads `config.toml` from the data directory (`~/.conductor/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use conductor_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparseable file: logs a warning, returns the default.
/// - Otherwise the parsed config, with `workflows_dir` resolved against
///   `data_dir` when relative.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            config.workflows_dir = config.workflows_dir.map(|dir| {
                if dir.is_relative() { data_dir.join(dir) } else { dir }
            });
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Directory scanned for workflow documents: the configured one, else
/// `{data_dir}/workflows`.
pub fn workflows_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .workflows_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("workflows"))
}
