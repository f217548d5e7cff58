//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and opening of the dish classifier, its
//! class metadata and the generic feature network.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ModelSettings;

/// Environment variable that forces offline mode
pub const OFFLINE_ENV: &str = "PADANG_LENS_OFFLINE";

/// Model artifacts fetched at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArtifact {
    /// Dish classifier trained on the catalog classes
    CustomClassifier,
    /// Class labels, accuracy and input size of the custom classifier
    CustomMetadata,
    /// Generic pretrained image-feature network (MobileNet)
    GenericFeatures,
}

impl ModelArtifact {
    /// Get the filename for this artifact
    pub fn filename(&self) -> &'static str {
        match self {
            ModelArtifact::CustomClassifier => "dish_classifier.onnx",
            ModelArtifact::CustomMetadata => "metadata.json",
            ModelArtifact::GenericFeatures => "mobilenet_v2.onnx",
        }
    }

    /// Plausible file size range for an integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelArtifact::CustomClassifier => (10_000, 200_000_000),
            ModelArtifact::CustomMetadata => (2, 1_000_000),
            ModelArtifact::GenericFeatures => (1_000_000, 100_000_000),
        }
    }

    /// Display name for logs and status output
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelArtifact::CustomClassifier => "Dish Classifier",
            ModelArtifact::CustomMetadata => "Classifier Metadata",
            ModelArtifact::GenericFeatures => "Generic Feature Network",
        }
    }

    pub fn all() -> [ModelArtifact; 3] {
        [
            ModelArtifact::CustomClassifier,
            ModelArtifact::CustomMetadata,
            ModelArtifact::GenericFeatures,
        ]
    }
}

/// Companion metadata of the trained classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Output index -> class label (dish id or model class)
    pub class_names: Vec<String>,
    /// Validation accuracy reported by training
    #[serde(default)]
    pub accuracy: Option<f32>,
    /// Expected square input size
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// Model file the metadata describes
    #[serde(default)]
    pub model_file: Option<String>,
}

/// Input edge assumed when the metadata does not declare one
pub const DEFAULT_INPUT_SIZE: u32 = 224;

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

/// Model manifest tracking downloaded artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub artifact: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches model artifacts
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: String,
    offline: bool,
}

impl ModelManager {
    /// Create a manager from settings, defaulting to the platform data dir
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let models_dir = match &settings.models_dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;

        let offline = settings.offline
            || std::env::var(OFFLINE_ENV).is_ok_and(|value| is_truthy(&value));

        Ok(Self {
            models_dir,
            base_url: settings.base_url.clone(),
            offline,
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Get the path to a specific artifact
    pub fn model_path(&self, artifact: ModelArtifact) -> PathBuf {
        self.models_dir.join(artifact.filename())
    }

    /// Download URL, relative to the configured base
    pub fn download_url(&self, artifact: ModelArtifact) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), artifact.filename())
    }

    /// Check if an artifact is cached with a plausible size
    pub fn is_model_available(&self, artifact: ModelArtifact) -> bool {
        match std::fs::metadata(self.model_path(artifact)) {
            Ok(metadata) => {
                let (min, max) = artifact.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Get status of all artifacts
    pub fn get_model_status(&self) -> Vec<(ModelArtifact, bool, Option<u64>)> {
        ModelArtifact::all()
            .iter()
            .map(|&artifact| {
                let size = std::fs::metadata(self.model_path(artifact)).ok().map(|m| m.len());
                (artifact, self.is_model_available(artifact), size)
            })
            .collect()
    }

    /// Download an artifact if it is not cached; returns its path
    pub async fn ensure_model(&self, artifact: ModelArtifact) -> Result<PathBuf> {
        let path = self.model_path(artifact);

        if self.is_model_available(artifact) {
            debug!("{} already cached at {:?}", artifact.display_name(), path);
            return Ok(path);
        }

        let url = self.download_url(artifact);
        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download {}. Place it manually at {:?} (source: {})",
                artifact.display_name(),
                path,
                url
            );
        }

        info!("Downloading {} from {}", artifact.display_name(), url);
        self.download_file(&url, &path).await?;

        if !self.is_model_available(artifact) {
            anyhow::bail!("Download of {} completed but verification failed", artifact.display_name());
        }

        self.update_manifest_for_model(artifact)?;
        info!("Successfully downloaded {}", artifact.display_name());

        Ok(path)
    }

    /// Stream a file to disk through a temp file
    async fn download_file(&self, url: &str, path: &Path) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        debug!("Download size: {:?} bytes", response.content_length());

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }

    /// Read the classifier metadata, downloading it if needed
    pub async fn load_metadata(&self) -> Result<ModelMetadata> {
        let path = self.ensure_model(ModelArtifact::CustomMetadata).await?;
        read_metadata(&path)
    }

    /// Update manifest after a successful download
    fn update_manifest_for_model(&self, artifact: ModelArtifact) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(artifact);
        let data = std::fs::read(&path)?;
        let hash = format!("{:x}", Sha256::digest(&data));

        let model_info = ModelInfo {
            artifact: format!("{:?}", artifact),
            filename: artifact.filename().to_string(),
            size_bytes: data.len() as u64,
            sha256: Some(hash),
            downloaded_at: unix_timestamp(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Interpret an environment switch such as `PADANG_LENS_OFFLINE=1`
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a metadata file
pub fn read_metadata(path: &Path) -> Result<ModelMetadata> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model metadata {:?}", path))?;
    let metadata: ModelMetadata =
        serde_json::from_str(&content).context("Malformed model metadata")?;
    if metadata.class_names.is_empty() {
        anyhow::bail!("Model metadata declares no classes");
    }
    Ok(metadata)
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Get input tensor info
    pub fn input_info(&self) -> Vec<TensorInfo> {
        self.session
            .inputs
            .iter()
            .map(|input| TensorInfo {
                name: input.name.clone(),
                shape: extract_shape(&input.input_type),
            })
            .collect()
    }
}

/// Tensor shape information
#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
}

/// Extract shape from ONNX value type
fn extract_shape(value_type: &ort::value::ValueType) -> Vec<i64> {
    value_type
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
        .unwrap_or_default()
}

/// Seconds since the Unix epoch, as a string
fn unix_timestamp() -> String {
    use std::time::SystemTime;

    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}
