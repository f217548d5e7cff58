//! State shared between the classifier and whatever presents its results

pub mod state;

pub use state::{CaptureSession, SessionPhase, SharedSession};
