//! Recognition pipeline
//!
//! Normalizes a captured image, extracts colour/texture features, runs the
//! optional neural path and ranks catalog dishes:
//! - custom classifier: class probabilities map straight to dishes
//! - generic feature network: embedding nudges heuristic confidence
//! - heuristic-only: colour and texture scoring

pub mod classifier;
pub mod features;
pub mod matcher;
pub mod models;
pub mod neural;
pub mod preprocess;

pub use classifier::{Classification, FoodClassifier, RequestSlot, RequestToken};
pub use features::{extract_features, ColorBucket, FeatureVector};
pub use matcher::{DishMatcher, MatchOutcome, PredictionResult};
pub use models::{ModelArtifact, ModelManager, ModelMetadata};
pub use neural::{ModelContext, ModelMode, ModelOutput, ModelState, NeuralBackend};
