//! Live camera capture

use image::imageops;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::frame::RasterImage;
use crate::error::AcquisitionError;

/// A live frame source such as a webcam stream
pub trait FrameSource {
    /// Whether the device is streaming and has a frame available
    fn is_ready(&self) -> bool;
    /// Current frame dimensions; (0, 0) while the stream is starting
    fn dimensions(&self) -> (u32, u32);
    /// Latest frame, if any
    fn read_frame(&mut self) -> Option<RasterImage>;
}

/// Grab the current frame, mirrored if the preview is mirrored
pub fn capture_frame<S: FrameSource + ?Sized>(
    source: &mut S,
    mirror: bool,
) -> Result<RasterImage, AcquisitionError> {
    let (width, height) = source.dimensions();
    if !source.is_ready() || width == 0 || height == 0 {
        debug!("Capture refused: ready={} dims={}x{}", source.is_ready(), width, height);
        return Err(AcquisitionError::DeviceNotReady);
    }

    let frame = source.read_frame().ok_or(AcquisitionError::DeviceNotReady)?;
    if !mirror {
        return Ok(frame);
    }

    let mut image = frame.to_rgba_image()?;
    imageops::flip_horizontal_in_place(&mut image);
    let (width, height) = image.dimensions();
    RasterImage::from_rgba(image.into_raw(), width, height)
}

/// Wait up to `timeout` for the source to become ready
///
/// Returns whether it did; callers carry on either way.
pub async fn wait_for_ready<S: FrameSource + ?Sized>(
    source: &S,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if source.is_ready() {
            return true;
        }
        if Instant::now() >= deadline {
            warn!("Camera not ready after {:?}, continuing anyway", timeout);
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Replays a still image as if it came from a camera
///
/// Reports not-ready until `ready_after` has elapsed since creation.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    frame: RasterImage,
    ready_at: Instant,
}

impl ReplaySource {
    pub fn new(frame: RasterImage) -> Self {
        Self {
            frame,
            ready_at: Instant::now(),
        }
    }

    /// Delay readiness, like a camera that is still starting
    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_at = Instant::now() + delay;
        self
    }
}

impl FrameSource for ReplaySource {
    fn is_ready(&self) -> bool {
        Instant::now() >= self.ready_at
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.is_ready() {
            self.frame.dimensions()
        } else {
            (0, 0)
        }
    }

    fn read_frame(&mut self) -> Option<RasterImage> {
        self.is_ready().then(|| self.frame.clone())
    }
}
