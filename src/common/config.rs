//! Runtime configuration loaded from `config.toml`.
//!
//! The file sits next to the scene by default. Every key is optional.

use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Parameters of the propagation range search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RangeConfig {
    pub per_threshold: f64,
    pub tolerance_m: f64,
    pub initial_guess_m: f64,
    pub max_distance_m: f64,
    pub payload_bytes: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            per_threshold: 0.1,
            tolerance_m: 0.5,
            initial_guess_m: 100.0,
            max_distance_m: 100_000.0,
            payload_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulatorConfig {
    /// Log level for this crate (`error` .. `trace`).
    pub log_level: String,
    /// Where `run` writes its JSON report, relative to the scene directory.
    pub report_path: PathBuf,
    pub range: RangeConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            report_path: PathBuf::from("report.json"),
            range: RangeConfig::default(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Returns
    /// * `Ok(SimulatorConfig)` if the file was successfully loaded and parsed
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: SimulatorConfig = toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.level_filter()?;
        let range = &config.range;
        if !(range.per_threshold > 0.0 && range.per_threshold < 1.0) {
            return Err(format!("per-threshold {} must be in (0, 1)", range.per_threshold));
        }
        for (key, value) in [("tolerance-m", range.tolerance_m), ("initial-guess-m", range.initial_guess_m), ("max-distance-m", range.max_distance_m)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be a positive number, got {}", key, value));
            }
        }
        Ok(config)
    }

    /// Load the file if it exists, fall back to defaults otherwise.
    pub fn load_or_default(config_path: &Path) -> Result<Self, String> {
        if config_path.exists() { Self::load(config_path) } else { Ok(Self::default()) }
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &Path) -> PathBuf {
        scene_path.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn level_filter(&self) -> Result<LevelFilter, String> {
        self.log_level.parse::<LevelFilter>().map_err(|_| format!("Unknown log-level '{}'", self.log_level))
    }
}
