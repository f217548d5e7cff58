//! Raster image handed to the recognition pipeline

use image::{DynamicImage, RgbaImage};
use std::time::Instant;

use crate::error::AcquisitionError;

/// An RGBA raster captured from a camera or decoded from an upload
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// When the image was captured or decoded
    pub captured_at: Instant,
}

impl RasterImage {
    /// Wrap an RGBA buffer, checking dimensions against its length
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Result<Self, AcquisitionError> {
        if width == 0 || height == 0 {
            return Err(AcquisitionError::InvalidImage(format!(
                "zero-sized raster ({}x{})",
                width, height
            )));
        }

        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(AcquisitionError::InvalidImage(format!(
                "buffer holds {} bytes, {}x{} RGBA needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Convert a decoded image
    pub fn from_dynamic(image: DynamicImage) -> Result<Self, AcquisitionError> {
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(rgba.into_raw(), width, height)
    }

    /// A single-colour raster, handy for calibration and tests
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, AcquisitionError> {
        let data = [rgb[0], rgb[1], rgb[2], 255].repeat(width as usize * height as usize);
        Self::from_rgba(data, width, height)
    }

    /// Borrow as an `image` buffer
    pub fn to_rgba_image(&self) -> Result<RgbaImage, AcquisitionError> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| AcquisitionError::InvalidImage("buffer does not match dimensions".into()))
    }

    /// Get dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGB of the pixel at (x, y)
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}
