//! Application Configuration
//!
//! Recognition settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image acquisition settings
    pub acquisition: AcquisitionSettings,
    /// Feature extraction settings
    pub features: FeatureSettings,
    /// Dish matcher settings
    pub matcher: MatcherSettings,
    /// Model loading settings
    pub model: ModelSettings,
}

/// Image acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Edge length of the normalized square raster
    pub target_size: u32,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: u64,
    /// How long to wait for a camera to start streaming
    pub camera_ready_timeout_ms: u64,
    /// Poll interval while waiting for the camera
    pub camera_poll_interval_ms: u64,
    /// Mirror camera frames horizontally (matches the preview)
    pub mirror_camera: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            target_size: 224,
            max_upload_bytes: 15 * 1024 * 1024,
            camera_ready_timeout_ms: 15_000,
            camera_poll_interval_ms: 100,
            mirror_camera: true,
        }
    }
}

/// Feature extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Sample every Nth pixel in scan order
    pub sample_stride: usize,
    /// Sobel magnitude above which a pixel counts as an edge
    pub edge_threshold: f32,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            sample_stride: 4,
            edge_threshold: 48.0,
        }
    }
}

/// Dish matcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherSettings {
    /// Maximum number of results returned, capped at 4
    pub max_results: usize,
    /// Results below this many scored candidates get backfilled
    pub min_candidates: usize,
    /// Score a dish needs to count as a candidate
    pub min_score: f32,
    /// Top confidence needed for a confident match
    pub confidence_floor: f32,
    /// Weight of colour fractions in a dish's dominant colours
    pub dominant_weight: f32,
    /// Weight of colour fractions in a dish's secondary colours
    pub secondary_weight: f32,
    /// Bonus when the image's top colour is one of the dish's dominant colours
    pub top_color_bonus: f32,
    /// Bonus when edge density agrees with the dish texture
    pub texture_bonus: f32,
    /// Edge density above which rough/crispy dishes get the texture bonus
    pub coarse_edge_density: f32,
    /// Edge density below which smooth/creamy dishes get the texture bonus
    pub fine_edge_density: f32,
    /// Confidence multiplier per rank position
    pub rank_decay: f32,
    /// Highest confidence the heuristic path reports
    pub confidence_ceiling: f32,
    /// Upward nudge applied when a generic embedding is available
    pub embedding_boost: f32,
    /// Random score jitter amplitude (0 disables it)
    pub jitter: f32,
    /// Seed for jitter and backfill sampling; entropy when unset
    pub seed: Option<u64>,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            max_results: 4,
            min_candidates: 3,
            min_score: 0.05,
            confidence_floor: 0.45,
            dominant_weight: 1.0,
            secondary_weight: 0.5,
            top_color_bonus: 0.3,
            texture_bonus: 0.15,
            coarse_edge_density: 0.2,
            fine_edge_density: 0.08,
            rank_decay: 0.9,
            confidence_ceiling: 0.95,
            embedding_boost: 0.05,
            jitter: 0.0,
            seed: None,
        }
    }
}

/// Model loading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Try to load neural models at all
    pub enabled: bool,
    /// Base URL the model artifacts are fetched from
    pub base_url: String,
    /// Cache directory (platform data dir when unset)
    pub models_dir: Option<PathBuf>,
    /// Never download, use cached artifacts only
    pub offline: bool,
    /// Inference threads for ONNX Runtime
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:5173/model/".to_string(),
            models_dir: None,
            offline: false,
            intra_threads: 4,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.acquisition.target_size, 224);
        assert_eq!(config.acquisition.max_upload_bytes, 15 * 1024 * 1024);
        assert_eq!(config.acquisition.camera_ready_timeout_ms, 15_000);

        assert_eq!(config.features.sample_stride, 4);

        assert_eq!(config.matcher.max_results, 4);
        assert_eq!(config.matcher.min_candidates, 3);
        assert!((config.matcher.confidence_floor - 0.45).abs() < 1e-6);
        assert!(config.matcher.dominant_weight > config.matcher.secondary_weight);
        assert_eq!(config.matcher.jitter, 0.0);
        assert!(config.matcher.seed.is_none());

        assert!(config.model.enabled);
        assert!(!config.model.offline);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.matcher.jitter = 0.1;
        config.matcher.seed = Some(7);
        config.model.offline = true;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert!((parsed.matcher.jitter - 0.1).abs() < 1e-6);
        assert_eq!(parsed.matcher.seed, Some(7));
        assert!(parsed.model.offline);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[matcher]\nconfidence_floor = 0.6\n").unwrap();
        assert!((parsed.matcher.confidence_floor - 0.6).abs() < 1e-6);
        assert_eq!(parsed.matcher.max_results, 4);
        assert_eq!(parsed.acquisition.target_size, 224);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.acquisition.target_size, loaded.acquisition.target_size);
        assert_eq!(config.model.base_url, loaded.model.base_url);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
