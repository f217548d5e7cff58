//! Optional neural feature path
//!
//! Model state is owned by a `ModelContext` and loaded at most once, in the
//! order custom classifier -> generic feature network -> heuristic-only.
//! Load failures only downgrade the mode.

use ndarray::Array4;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::models::{ModelArtifact, ModelManager, OnnxSession, DEFAULT_INPUT_SIZE};
use super::preprocess::{to_model_input, Standardization, TensorLayout};
use crate::acquisition::RasterImage;
use crate::catalog::{ClassMap, DishCatalog};
use crate::config::ModelSettings;
use crate::error::{InferenceError, ModelLoadError};

/// What a forward pass produced
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// One probability per class, indexed like the class map
    ClassProbabilities(Vec<f32>),
    /// Generic image embedding
    Embedding(Vec<f32>),
}

/// A model that can run one forward pass on a prepared tensor
pub trait NeuralBackend: Send {
    /// Input layout the model expects
    fn layout(&self) -> TensorLayout;

    /// Input standardization the model expects
    fn standardization(&self) -> Standardization;

    fn infer(&mut self, input: Array4<f32>) -> Result<ModelOutput, InferenceError>;

    /// Prepare `raster` and run the model
    fn infer_raster(&mut self, raster: &RasterImage) -> Result<ModelOutput, InferenceError> {
        let input = to_model_input(raster, self.layout(), &self.standardization());
        self.infer(input)
    }
}

/// How the output tensor of an ONNX model is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Probabilities,
    Embedding,
}

/// ONNX Runtime backed model
pub struct OnnxBackend {
    session: OnnxSession,
    kind: OutputKind,
    layout: TensorLayout,
    standardization: Standardization,
}

impl OnnxBackend {
    pub fn new(session: OnnxSession, kind: OutputKind, standardization: Standardization) -> Self {
        let layout = session
            .input_info()
            .first()
            .map(|info| TensorLayout::from_shape(&info.shape))
            .unwrap_or(TensorLayout::Nhwc);
        debug!("ONNX backend {:?} using {:?} input", kind, layout);

        Self {
            session,
            kind,
            layout,
            standardization,
        }
    }
}

impl NeuralBackend for OnnxBackend {
    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn standardization(&self) -> Standardization {
        self.standardization
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<ModelOutput, InferenceError> {
        let runtime = |e: ort::Error| InferenceError::Runtime(e.to_string());

        let input_name = self
            .session
            .input_names()
            .first()
            .cloned()
            .ok_or_else(|| InferenceError::UnexpectedOutput("model declares no inputs".into()))?;
        let output_name = self
            .session
            .output_names()
            .first()
            .cloned()
            .ok_or_else(|| InferenceError::UnexpectedOutput("model declares no outputs".into()))?;

        let shape = input.shape().to_vec();
        let (data, _) = input.into_raw_vec_and_offset();
        let tensor = ort::value::Tensor::from_array((shape, data)).map_err(runtime)?;

        let outputs = self
            .session
            .session_mut()
            .run(ort::inputs![input_name.as_str() => tensor])
            .map_err(runtime)?;

        let output = outputs
            .get(output_name.as_str())
            .ok_or_else(|| InferenceError::UnexpectedOutput(format!("missing output '{}'", output_name)))?;
        let (_, values) = output.try_extract_tensor::<f32>().map_err(runtime)?;

        if values.is_empty() {
            return Err(InferenceError::UnexpectedOutput("empty output tensor".into()));
        }

        Ok(match self.kind {
            OutputKind::Probabilities => ModelOutput::ClassProbabilities(ensure_probabilities(values)),
            OutputKind::Embedding => ModelOutput::Embedding(values.to_vec()),
        })
    }
}

/// Softmax the values unless they already form a distribution
pub fn ensure_probabilities(values: &[f32]) -> Vec<f32> {
    let sum: f32 = values.iter().sum();
    let is_distribution = values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 0.02;
    if is_distribution {
        return values.to_vec();
    }

    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Loaded model state
pub enum ModelState {
    /// Trained dish classifier with its class mapping
    Custom {
        backend: Mutex<Box<dyn NeuralBackend>>,
        class_map: ClassMap,
        accuracy: Option<f32>,
        /// Square input edge declared by the metadata
        input_size: u32,
    },
    /// Generic feature network used to nudge heuristic scores
    Generic { backend: Mutex<Box<dyn NeuralBackend>> },
    /// No model; hand-crafted features only
    HeuristicOnly,
}

impl ModelState {
    pub fn mode(&self) -> ModelMode {
        match self {
            ModelState::Custom { .. } => ModelMode::Custom,
            ModelState::Generic { .. } => ModelMode::Generic,
            ModelState::HeuristicOnly => ModelMode::HeuristicOnly,
        }
    }

    /// Input edge the model needs, if it differs per model
    pub fn input_size(&self) -> Option<u32> {
        match self {
            ModelState::Custom { input_size, .. } => Some(*input_size),
            _ => None,
        }
    }

    /// Reported validation accuracy of the custom classifier
    pub fn accuracy(&self) -> Option<f32> {
        match self {
            ModelState::Custom { accuracy, .. } => *accuracy,
            _ => None,
        }
    }

    /// Run the loaded backend; blocks for the duration of the forward pass
    pub fn infer(&self, raster: &RasterImage) -> Result<ModelOutput, InferenceError> {
        match self {
            ModelState::Custom { backend, .. } | ModelState::Generic { backend } => {
                backend.lock().infer_raster(raster)
            }
            ModelState::HeuristicOnly => Err(InferenceError::Runtime("no model loaded".into())),
        }
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Custom {
                class_map,
                accuracy,
                input_size,
                ..
            } => f
                .debug_struct("Custom")
                .field("classes", &class_map.len())
                .field("accuracy", accuracy)
                .field("input_size", input_size)
                .finish(),
            ModelState::Generic { .. } => f.write_str("Generic"),
            ModelState::HeuristicOnly => f.write_str("HeuristicOnly"),
        }
    }
}

/// Which path produced (or will produce) a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    Custom,
    Generic,
    HeuristicOnly,
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModelMode::Custom => "custom classifier",
            ModelMode::Generic => "generic features + heuristics",
            ModelMode::HeuristicOnly => "heuristic-only",
        })
    }
}

/// Runs the fixed fallback load sequence
struct ModelLoader {
    settings: ModelSettings,
    catalog: DishCatalog,
}

impl ModelLoader {
    async fn load(&self) -> ModelState {
        if !self.settings.enabled {
            info!("Neural models disabled, running heuristic-only");
            return ModelState::HeuristicOnly;
        }

        let manager = match ModelManager::new(&self.settings) {
            Ok(manager) => manager,
            Err(e) => {
                warn!("Model cache unavailable ({:#}), running heuristic-only", e);
                return ModelState::HeuristicOnly;
            }
        };

        match self.load_custom(&manager).await {
            Ok(state) => return state,
            Err(e) => warn!("{}", e),
        }

        match self.load_generic(&manager).await {
            Ok(state) => return state,
            Err(e) => warn!("{}", e),
        }

        warn!("No model could be loaded, running heuristic-only");
        ModelState::HeuristicOnly
    }

    async fn load_custom(&self, manager: &ModelManager) -> Result<ModelState, ModelLoadError> {
        let artifact = ModelArtifact::CustomClassifier;
        let path = manager
            .ensure_model(artifact)
            .await
            .map_err(|e| ModelLoadError::new(artifact.display_name(), format!("{:#}", e)))?;

        let (class_map, accuracy, input_size) = match manager.load_metadata().await {
            Ok(metadata) => {
                info!(
                    "Classifier metadata: {} classes, accuracy {:?}, input {}px",
                    metadata.class_names.len(),
                    metadata.accuracy,
                    metadata.input_size
                );
                if metadata.input_size == 0 {
                    return Err(ModelLoadError::new(artifact.display_name(), "metadata declares a zero input size"));
                }
                if let Some(file) = metadata.model_file.as_deref() {
                    if file != artifact.filename() {
                        warn!("Metadata describes '{}' but the cached model is '{}'", file, artifact.filename());
                    }
                }
                (
                    ClassMap::from_labels(&metadata.class_names, &self.catalog),
                    metadata.accuracy,
                    metadata.input_size,
                )
            }
            Err(e) => {
                warn!("Classifier metadata unavailable ({:#}), using the catalog class table", e);
                (ClassMap::from_catalog(&self.catalog), None, DEFAULT_INPUT_SIZE)
            }
        };

        let session = self.open_session(artifact, path).await?;
        let backend = OnnxBackend::new(session, OutputKind::Probabilities, Standardization::identity());

        info!("Custom dish classifier ready ({} classes)", class_map.len());
        Ok(ModelState::Custom {
            backend: Mutex::new(Box::new(backend)),
            class_map,
            accuracy,
            input_size,
        })
    }

    async fn load_generic(&self, manager: &ModelManager) -> Result<ModelState, ModelLoadError> {
        let artifact = ModelArtifact::GenericFeatures;
        let path = manager
            .ensure_model(artifact)
            .await
            .map_err(|e| ModelLoadError::new(artifact.display_name(), format!("{:#}", e)))?;

        let session = self.open_session(artifact, path).await?;
        let backend = OnnxBackend::new(session, OutputKind::Embedding, Standardization::imagenet());

        info!("Generic feature network ready");
        Ok(ModelState::Generic {
            backend: Mutex::new(Box::new(backend)),
        })
    }

    async fn open_session(
        &self,
        artifact: ModelArtifact,
        path: std::path::PathBuf,
    ) -> Result<OnnxSession, ModelLoadError> {
        let threads = self.settings.intra_threads;
        tokio::task::spawn_blocking(move || OnnxSession::new(&path, threads))
            .await
            .map_err(|e| ModelLoadError::new(artifact.display_name(), e))?
            .map_err(|e| ModelLoadError::new(artifact.display_name(), format!("{:#}", e)))
    }
}

/// Owns the model state for one classifier instance
pub struct ModelContext {
    state: OnceCell<Arc<ModelState>>,
    loader: Option<ModelLoader>,
    load_attempts: AtomicUsize,
}

impl ModelContext {
    /// Context that loads models on first use
    pub fn new(settings: ModelSettings, catalog: DishCatalog) -> Self {
        Self {
            state: OnceCell::new(),
            loader: Some(ModelLoader { settings, catalog }),
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Context that never loads a model
    pub fn heuristic_only() -> Self {
        Self::with_state(ModelState::HeuristicOnly)
    }

    /// Context with an already loaded state
    pub fn with_state(state: ModelState) -> Self {
        Self {
            state: OnceCell::new_with(Some(Arc::new(state))),
            loader: None,
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// True while the load sequence is pending or in flight
    ///
    /// Loading starts on first use, so a fresh context reports loading until
    /// `ensure_loaded` has completed once.
    pub fn is_loading(&self) -> bool {
        !self.state.initialized()
    }

    /// Number of times the load sequence has run (0 or 1)
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Loaded state, if loading has finished
    pub fn state(&self) -> Option<Arc<ModelState>> {
        self.state.get().cloned()
    }

    /// Load once; concurrent callers wait for the same in-flight load
    pub async fn ensure_loaded(&self) -> Arc<ModelState> {
        self.state
            .get_or_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                let state = match &self.loader {
                    Some(loader) => loader.load().await,
                    None => ModelState::HeuristicOnly,
                };
                info!("Model state: {}", state.mode());
                Arc::new(state)
            })
            .await
            .clone()
    }
}
