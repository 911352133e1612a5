//! Run configuration loading.
//!
//! The run configuration lives next to the scene in `config.toml` and
//! controls how long to simulate, the seed, and where evicted messages go.

use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::simulation::types::Round;

/// Destination of messages evicted by cleanup.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    /// Keep records in memory; they are dropped at exit.
    #[default]
    Memory,
    /// Emit records through the logger at trace level.
    Log,
    /// Write one file per host into `output-dir`.
    File,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunConfig {
    /// Number of rounds to simulate.
    pub timeout: Round,
    /// Seed for the layout generator and every host's random source.
    pub seed: u64,
    pub archive: ArchiveKind,
    /// Relative paths are resolved against the scene's directory.
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: 1000,
            seed: 10,
            archive: ArchiveKind::Memory,
            output_dir: PathBuf::from("archive"),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(RunConfig)` if the file was successfully loaded, parsed and validated
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Like [`RunConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Self, String> {
        if !config_path.exists() {
            info!("No run config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        Self::load(config_path)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: RunConfig = toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("Invalid timeout 0, must be positive".to_string());
        }
        if self.archive == ArchiveKind::File && self.output_dir.as_os_str().is_empty() {
            return Err("File archive requires a non-empty output-dir".to_string());
        }
        Ok(())
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    /// Output directory with relative paths anchored at the scene file.
    pub fn resolve_output_dir(&self, scene_path: &str) -> PathBuf {
        if self.output_dir.is_absolute() {
            return self.output_dir.clone();
        }
        Path::new(scene_path).parent().unwrap_or(Path::new(".")).join(&self.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_keys_parse() {
        let config = RunConfig::parse(
            r#"
            timeout = 250
            seed = 7
            archive = "file"
            output-dir = "out/run1"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout, 250);
        assert_eq!(config.seed, 7);
        assert_eq!(config.archive, ArchiveKind::File);
        assert_eq!(config.resolve_output_dir("scenes/grid.json"), PathBuf::from("scenes/out/run1"));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        assert_eq!(RunConfig::parse("").unwrap(), RunConfig::default());
        assert_eq!(RunConfig::parse("archive = \"log\"").unwrap().timeout, 1000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RunConfig::parse("timeout = 0").unwrap_err().contains("timeout"));
        assert!(RunConfig::parse("archive = \"tape\"").is_err());
        assert!(RunConfig::parse("timeout = -3").is_err());
    }

    #[test]
    fn config_sits_next_to_the_scene() {
        assert_eq!(RunConfig::config_path_from_scene("scenes/grid.json"), PathBuf::from("scenes/config.toml"));
        assert_eq!(RunConfig::config_path_from_scene("grid.json"), PathBuf::from("config.toml"));
        let missing = RunConfig::load_or_default(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(missing, RunConfig::default());
        assert!(RunConfig::load(Path::new("/nonexistent/config.toml")).is_err());
    }
}
