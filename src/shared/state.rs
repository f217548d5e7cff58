//! Capture session state shared with a front end

use parking_lot::RwLock;
use std::sync::Arc;

use crate::acquisition::RasterImage;
use crate::vision::{Classification, RequestToken};

/// Session state behind a lock, shared between the capture task and the view
pub type SharedSession = Arc<RwLock<CaptureSession>>;

/// Where the capture flow currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing captured yet
    Idle,
    /// A preview is shown and classification is running
    Classifying,
    /// A preview is shown together with its result
    Showing,
}

/// Preview image, latest result and the request it is waiting for
#[derive(Debug, Default)]
pub struct CaptureSession {
    /// Image shown to the user, if any
    pub preview: Option<RasterImage>,
    /// Result for the current preview
    pub result: Option<Classification>,
    /// Request whose result the session is waiting for
    pub pending_request: Option<u64>,
    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSession {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.preview, &self.result) {
            (None, _) => SessionPhase::Idle,
            (Some(_), None) => SessionPhase::Classifying,
            (Some(_), Some(_)) => SessionPhase::Showing,
        }
    }

    /// Show a new image; any previous result is discarded
    pub fn set_preview(&mut self, image: RasterImage, request: RequestToken) {
        self.preview = Some(image);
        self.result = None;
        self.pending_request = Some(request.id());
        self.last_error = None;
    }

    /// Close the preview and drop the result with it
    pub fn close_preview(&mut self) {
        self.preview = None;
        self.result = None;
        self.pending_request = None;
    }

    /// Store a result if it belongs to the pending request
    ///
    /// Returns false for stale results, which are dropped.
    pub fn accept_result(&mut self, result: Classification) -> bool {
        if self.pending_request != Some(result.request_id) {
            return false;
        }
        self.pending_request = None;
        self.result = Some(result);
        true
    }

    /// Record a failure for the pending request
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.pending_request = None;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{FeatureVector, ModelMode, RequestSlot};

    fn result_for(request_id: u64) -> Classification {
        Classification {
            results: Vec::new(),
            is_confident_match: false,
            mode: ModelMode::HeuristicOnly,
            features: FeatureVector::default(),
            elapsed_ms: 3,
            request_id,
            model_accuracy: None,
        }
    }

    fn preview() -> RasterImage {
        RasterImage::solid(8, 8, [200, 40, 20]).unwrap()
    }

    #[test]
    fn test_result_for_pending_request_is_accepted() {
        let slot = RequestSlot::default();
        let mut session = CaptureSession::new();
        let token = slot.begin();

        session.set_preview(preview(), token);
        assert_eq!(session.phase(), SessionPhase::Classifying);

        assert!(session.accept_result(result_for(token.id())));
        assert_eq!(session.phase(), SessionPhase::Showing);
        assert_eq!(session.pending_request, None);
    }

    #[test]
    fn test_new_preview_discards_old_result() {
        let slot = RequestSlot::default();
        let mut session = CaptureSession::new();
        let first = slot.begin();
        session.set_preview(preview(), first);
        session.accept_result(result_for(first.id()));

        let second = slot.begin();
        session.set_preview(preview(), second);

        assert!(session.result.is_none());
        assert!(!session.accept_result(result_for(first.id())));
        assert!(session.accept_result(result_for(second.id())));
    }

    #[test]
    fn test_close_preview_clears_everything() {
        let slot = RequestSlot::default();
        let session = CaptureSession::shared();
        let token = slot.begin();
        session.write().set_preview(preview(), token);

        session.write().close_preview();

        let guard = session.read();
        assert_eq!(guard.phase(), SessionPhase::Idle);
        assert!(guard.result.is_none());
        drop(guard);
        assert!(!session.write().accept_result(result_for(token.id())));
    }

    #[test]
    fn test_error_clears_pending() {
        let slot = RequestSlot::default();
        let mut session = CaptureSession::new();
        let token = slot.begin();
        session.set_preview(preview(), token);

        session.set_error("camera not ready");

        assert_eq!(session.last_error.as_deref(), Some("camera not ready"));
        assert!(!session.accept_result(result_for(token.id())));
    }
}
