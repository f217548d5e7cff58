//! Classification entry point
//!
//! One request runs normalize -> features -> optional neural pass -> match.
//! Inference failures only downgrade that request to heuristics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::features::{extract_features, FeatureVector};
use super::matcher::{DishMatcher, PredictionResult};
use super::neural::{ModelContext, ModelMode, ModelOutput, ModelState};
use crate::acquisition::{self, FrameSource, RasterImage, UploadedFile};
use crate::catalog::DishCatalog;
use crate::config::AppConfig;
use crate::error::ClassifyError;

/// Identifies one classification request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Single-slot in-flight guard: only the newest request may deliver
#[derive(Debug, Default)]
pub struct RequestSlot {
    latest: AtomicU64,
}

impl RequestSlot {
    /// Start a request, superseding any in flight
    pub fn begin(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }
}

/// Result of one classification
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    /// Ranked dishes, at most four
    pub results: Vec<PredictionResult>,
    /// False when the top confidence is below the floor
    pub is_confident_match: bool,
    /// Path that produced the ranking
    pub mode: ModelMode,
    /// Features of the normalized image
    #[serde(skip)]
    pub features: FeatureVector,
    /// Processing time in milliseconds
    pub elapsed_ms: u64,
    pub request_id: u64,
    /// Reported accuracy of the classifier that produced the ranking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_accuracy: Option<f32>,
}

/// Classifies photos of dishes against a catalog
pub struct FoodClassifier {
    catalog: DishCatalog,
    config: AppConfig,
    matcher: DishMatcher,
    models: ModelContext,
    slot: RequestSlot,
}

impl FoodClassifier {
    pub fn new(catalog: DishCatalog, config: AppConfig, models: ModelContext) -> Self {
        let matcher = DishMatcher::new(catalog.clone(), config.matcher.clone());
        Self {
            catalog,
            config,
            matcher,
            models,
            slot: RequestSlot::default(),
        }
    }

    pub fn catalog(&self) -> &DishCatalog {
        &self.catalog
    }

    /// Classifier that loads models per `config.model` on first use
    pub fn from_config(catalog: DishCatalog, config: AppConfig) -> Self {
        let models = ModelContext::new(config.model.clone(), catalog.clone());
        Self::new(catalog, config, models)
    }

    /// True until the model load sequence has finished
    pub fn is_loading(&self) -> bool {
        self.models.is_loading()
    }

    /// Mode of the loaded models, `None` while loading
    pub fn mode(&self) -> Option<ModelMode> {
        self.models.state().map(|state| state.mode())
    }

    /// Load models now instead of on the first request
    pub async fn warm_up(&self) -> ModelMode {
        self.models.ensure_loaded().await.mode()
    }

    /// Validate, decode and classify an uploaded file
    pub async fn classify_upload(&self, file: &UploadedFile) -> Result<Classification, ClassifyError> {
        acquisition::validate_upload(file, self.config.acquisition.max_upload_bytes)?;
        let raster = acquisition::decode_upload(file)?;
        self.classify(&raster).await
    }

    /// Wait briefly for the camera, grab a frame and classify it
    pub async fn classify_camera<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<Classification, ClassifyError> {
        let settings = &self.config.acquisition;
        acquisition::wait_for_ready(
            &*source,
            Duration::from_millis(settings.camera_ready_timeout_ms),
            Duration::from_millis(settings.camera_poll_interval_ms),
        )
        .await;

        let raster = acquisition::capture_frame(source, settings.mirror_camera)?;
        self.classify(&raster).await
    }

    /// Classify a raster as a new request
    pub async fn classify(&self, raster: &RasterImage) -> Result<Classification, ClassifyError> {
        let token = self.begin_request();
        self.classify_request(token, raster).await
    }

    /// Take a request token ahead of `classify_request`
    pub fn begin_request(&self) -> RequestToken {
        self.slot.begin()
    }

    /// Classify under an existing token; fails with `Superseded` if a newer
    /// request started meanwhile
    pub async fn classify_request(
        &self,
        token: RequestToken,
        raster: &RasterImage,
    ) -> Result<Classification, ClassifyError> {
        let start = Instant::now();

        let normalized = acquisition::normalize(raster, self.config.acquisition.target_size)?;
        let mut features = extract_features(&normalized, &self.config.features)?;

        let state = self.models.ensure_loaded().await;
        let output = match state.mode() {
            ModelMode::HeuristicOnly => None,
            _ => {
                let model_input = match state.input_size() {
                    Some(size) if normalized.dimensions() != (size, size) => {
                        acquisition::normalize(&normalized, size)?
                    }
                    _ => normalized.clone(),
                };
                run_inference(Arc::clone(&state), model_input).await
            }
        };

        let (outcome, mode) = match (state.as_ref(), output) {
            (ModelState::Custom { class_map, .. }, Some(ModelOutput::ClassProbabilities(probabilities))) => {
                let outcome = self.matcher.match_probabilities(&probabilities, class_map);
                if outcome.results.is_empty() {
                    warn!("No classifier output maps to a dish, using heuristics");
                    (self.matcher.match_features(&features), ModelMode::HeuristicOnly)
                } else {
                    (outcome, ModelMode::Custom)
                }
            }
            (_, Some(ModelOutput::Embedding(embedding))) => {
                features.embedding = Some(embedding);
                (self.matcher.match_features(&features), ModelMode::Generic)
            }
            _ => (self.matcher.match_features(&features), ModelMode::HeuristicOnly),
        };

        if !self.slot.is_current(token) {
            debug!("Dropping result of superseded request {}", token.id());
            return Err(ClassifyError::Superseded(token.id()));
        }

        let elapsed = start.elapsed();
        info!(
            "Classified in {:?} ({}): top {:?}, confident={}",
            elapsed,
            mode,
            outcome.results.first().map(|r| r.dish.id.as_str()),
            outcome.is_confident_match
        );

        Ok(Classification {
            results: outcome.results,
            is_confident_match: outcome.is_confident_match,
            mode,
            features,
            elapsed_ms: elapsed.as_millis() as u64,
            request_id: token.id(),
            model_accuracy: match mode {
                ModelMode::Custom => state.accuracy(),
                _ => None,
            },
        })
    }
}

/// One forward pass on the blocking pool; failures are logged and absorbed
async fn run_inference(state: Arc<ModelState>, raster: RasterImage) -> Option<ModelOutput> {
    match tokio::task::spawn_blocking(move || state.infer(&raster)).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            warn!("Inference failed, falling back to heuristics: {}", e);
            None
        }
        Err(e) => {
            warn!("Inference task failed, falling back to heuristics: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::ReplaySource;
    use crate::vision::features::ColorBucket;
    use crate::catalog::ClassMap;
    use crate::error::{AcquisitionError, InferenceError};
    use crate::vision::neural::NeuralBackend;
    use crate::vision::preprocess::{Standardization, TensorLayout};
    use image::{ImageFormat, Rgba, RgbaImage};
    use ndarray::Array4;
    use parking_lot::Mutex;
    use std::io::Cursor;

    type SeenShapes = Arc<Mutex<Vec<(usize, usize, usize, usize)>>>;

    struct ScriptedBackend {
        output: Result<ModelOutput, String>,
        seen: SeenShapes,
    }

    impl ScriptedBackend {
        fn boxed(output: Result<ModelOutput, String>, seen: &SeenShapes) -> Mutex<Box<dyn NeuralBackend>> {
            Mutex::new(Box::new(Self {
                output,
                seen: Arc::clone(seen),
            }))
        }
    }

    impl NeuralBackend for ScriptedBackend {
        fn layout(&self) -> TensorLayout {
            TensorLayout::Nchw
        }

        fn standardization(&self) -> Standardization {
            Standardization::identity()
        }

        fn infer(&mut self, input: Array4<f32>) -> Result<ModelOutput, InferenceError> {
            self.seen.lock().push(input.dim());
            self.output.clone().map_err(InferenceError::Runtime)
        }
    }

    fn heuristic_classifier() -> FoodClassifier {
        FoodClassifier::new(
            DishCatalog::builtin().unwrap(),
            AppConfig::default(),
            ModelContext::heuristic_only(),
        )
    }

    fn custom_classifier(output: Result<ModelOutput, String>, input_size: u32, seen: &SeenShapes) -> FoodClassifier {
        let catalog = DishCatalog::builtin().unwrap();
        let state = ModelState::Custom {
            backend: ScriptedBackend::boxed(output, seen),
            class_map: ClassMap::from_catalog(&catalog),
            accuracy: Some(0.9),
            input_size,
        };
        FoodClassifier::new(catalog, AppConfig::default(), ModelContext::with_state(state))
    }

    fn red_raster() -> RasterImage {
        RasterImage::solid(224, 224, [255, 0, 0]).unwrap()
    }

    #[tokio::test]
    async fn test_heuristic_classification_of_red_image() {
        let classifier = heuristic_classifier();
        let result = classifier.classify(&red_raster()).await.unwrap();

        assert_eq!(result.mode, ModelMode::HeuristicOnly);
        assert!((1..=4).contains(&result.results.len()));
        assert!((result.features.fraction(ColorBucket::Red) - 1.0).abs() < 1e-6);
        assert!(result.results[0].dish.id == "telur-balado" || result.results[0].dish.id == "dendeng-batokok");
        assert!(result.is_confident_match);
    }

    #[tokio::test]
    async fn test_custom_model_probabilities_drive_ranking() {
        let probs = vec![0.01, 0.01, 0.02, 0.01, 0.85, 0.05, 0.03, 0.01, 0.01];
        let seen = SeenShapes::default();
        let classifier = custom_classifier(Ok(ModelOutput::ClassProbabilities(probs)), 224, &seen);

        let result = classifier.classify(&red_raster()).await.unwrap();

        assert_eq!(*seen.lock(), vec![(1, 3, 224, 224)]);
        assert_eq!(result.mode, ModelMode::Custom);
        assert_eq!(result.model_accuracy, Some(0.9));
        assert_eq!(result.results[0].dish.id, "gulai-ikan");
        assert!((result.results[0].confidence - 0.85).abs() < 1e-6);
        assert_eq!(result.results.len(), 4);
        assert!(result.is_confident_match);
    }

    #[tokio::test]
    async fn test_inference_failure_falls_back_to_heuristics() {
        let seen = SeenShapes::default();
        let classifier = custom_classifier(Err("backend crashed".to_string()), 224, &seen);

        let result = classifier.classify(&red_raster()).await.unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(result.mode, ModelMode::HeuristicOnly);
        assert_eq!(result.model_accuracy, None);
        assert!(!result.results.is_empty());
    }

    #[tokio::test]
    async fn test_generic_embedding_path() {
        let seen = SeenShapes::default();
        let state = ModelState::Generic {
            backend: ScriptedBackend::boxed(Ok(ModelOutput::Embedding(vec![0.3; 16])), &seen),
        };
        let classifier = FoodClassifier::new(
            DishCatalog::builtin().unwrap(),
            AppConfig::default(),
            ModelContext::with_state(state),
        );

        let result = classifier.classify(&red_raster()).await.unwrap();

        assert_eq!(*seen.lock(), vec![(1, 3, 224, 224)]);
        assert_eq!(result.mode, ModelMode::Generic);
        assert!(result.features.embedding.is_some());
        assert!(result.results[0].confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_classifier_input_follows_declared_size() {
        let mut probs = vec![0.0; 9];
        probs[2] = 1.0;
        let seen = SeenShapes::default();
        let classifier = custom_classifier(Ok(ModelOutput::ClassProbabilities(probs)), 160, &seen);

        let result = classifier.classify(&red_raster()).await.unwrap();

        assert_eq!(*seen.lock(), vec![(1, 3, 160, 160)]);
        assert_eq!(result.mode, ModelMode::Custom);
        assert_eq!(result.results[0].dish.id, "rendang");
        // Features still come from the configured working size
        assert!((result.features.fraction(ColorBucket::Red) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_zero_sized_raster_rejected() {
        let raster = RasterImage {
            data: Vec::new(),
            width: 0,
            height: 0,
            captured_at: std::time::Instant::now(),
        };

        let err = heuristic_classifier().classify(&raster).await.unwrap_err();

        assert!(matches!(err, ClassifyError::Acquisition(AcquisitionError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_before_processing() {
        let classifier = heuristic_classifier();
        let file = UploadedFile::new("big.jpg", "image/jpeg", vec![0; 20 * 1024 * 1024]);

        let err = classifier.classify_upload(&file).await.unwrap_err();

        assert!(matches!(err, ClassifyError::Acquisition(AcquisitionError::Validation(_))));
    }

    #[tokio::test]
    async fn test_text_upload_rejected() {
        let classifier = heuristic_classifier();
        let file = UploadedFile::new("menu.txt", "text/plain", b"rendang".to_vec());

        let err = classifier.classify_upload(&file).await.unwrap_err();

        assert!(matches!(err, ClassifyError::Acquisition(AcquisitionError::Validation(_))));
    }

    #[tokio::test]
    async fn test_valid_upload_is_classified() {
        let img = RgbaImage::from_pixel(400, 200, Rgba([90, 50, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        let file = UploadedFile::new("rendang.png", "image/png", bytes);

        let result = heuristic_classifier().classify_upload(&file).await.unwrap();

        assert_eq!(result.results[0].dish.id, "rendang");
    }

    #[tokio::test]
    async fn test_grey_image_is_not_confident() {
        let raster = RasterImage::solid(300, 300, [128, 128, 128]).unwrap();
        let result = heuristic_classifier().classify(&raster).await.unwrap();
        assert!(!result.results.is_empty());
        assert!(!result.is_confident_match);
    }

    #[tokio::test]
    async fn test_stale_request_is_superseded() {
        let classifier = heuristic_classifier();
        let stale = classifier.begin_request();

        let fresh = classifier.classify(&red_raster()).await.unwrap();
        let err = classifier.classify_request(stale, &red_raster()).await.unwrap_err();

        assert!(matches!(err, ClassifyError::Superseded(id) if id == stale.id()));
        assert!(fresh.request_id > stale.id());
    }

    #[tokio::test]
    async fn test_camera_not_ready() {
        let mut config = AppConfig::default();
        config.acquisition.camera_ready_timeout_ms = 20;
        config.acquisition.camera_poll_interval_ms = 5;
        let classifier = FoodClassifier::new(
            DishCatalog::builtin().unwrap(),
            config,
            ModelContext::heuristic_only(),
        );
        let mut source = ReplaySource::new(red_raster()).ready_after(Duration::from_secs(60));

        let err = classifier.classify_camera(&mut source).await.unwrap_err();

        assert!(matches!(err, ClassifyError::Acquisition(AcquisitionError::DeviceNotReady)));
    }

    #[tokio::test]
    async fn test_camera_capture_classified() {
        let classifier = heuristic_classifier();
        let mut source = ReplaySource::new(red_raster());
        let result = classifier.classify_camera(&mut source).await.unwrap();
        assert!(result.is_confident_match);
    }

    #[tokio::test]
    async fn test_unreachable_models_still_classify() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.model.models_dir = Some(dir.path().to_path_buf());
        config.model.base_url = "http://127.0.0.1:9/model".to_string();
        config.model.offline = false;
        let classifier = FoodClassifier::from_config(DishCatalog::builtin().unwrap(), config);

        assert!(classifier.is_loading());
        assert_eq!(classifier.mode(), None);
        let result = classifier.classify(&red_raster()).await.unwrap();

        assert!(!classifier.is_loading());
        assert_eq!(result.mode, ModelMode::HeuristicOnly);
        assert!(!result.results.is_empty());
    }

    #[test]
    fn test_request_slot_tracks_latest() {
        let slot = RequestSlot::default();
        let a = slot.begin();
        assert!(slot.is_current(a));
        let b = slot.begin();
        assert!(!slot.is_current(a));
        assert!(slot.is_current(b));
    }
}
