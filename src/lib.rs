//! PadangLens - Padang dish recognition
//!
//! Classifies camera frames and uploaded photos against a catalog of Padang
//! dishes. A trained ONNX classifier is used when available, a generic
//! feature network otherwise, and colour/texture heuristics always work as
//! the last resort.

pub mod acquisition;
pub mod catalog;
pub mod config;
pub mod error;
pub mod shared;
pub mod storage;
pub mod vision;

pub use acquisition::{RasterImage, UploadedFile};
pub use catalog::{DishCatalog, DishRecord};
pub use config::AppConfig;
pub use error::{AcquisitionError, ClassifyError};
pub use vision::{Classification, FoodClassifier, ModelContext, ModelMode, PredictionResult};
