//! Image Acquisition Layer
//!
//! Turns camera frames and uploaded files into the fixed-size square raster
//! the feature extractor and models expect. Uploads are validated before any
//! decoding happens.

pub mod camera;
pub mod frame;

pub use camera::{capture_frame, wait_for_ready, FrameSource, ReplaySource};
pub use frame::RasterImage;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::ImageFormat;
use std::path::Path;
use tracing::debug;

use crate::error::AcquisitionError;

/// A file picked by the user, not yet decoded
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original file name
    pub name: String,
    /// MIME type as declared by the picker
    pub declared_mime: String,
    /// File contents
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, declared_mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime: declared_mime.into(),
            bytes,
        }
    }

    /// Read a file from disk, declaring a MIME type from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(name, mime_for_path(path), bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// MIME type implied by a file extension
pub fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ImageFormat::from_extension(&ext) {
        Some(format) => format.to_mime_type().to_string(),
        None if ext == "txt" => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    }
}

/// Reject uploads that are not images or exceed the size ceiling
pub fn validate_upload(file: &UploadedFile, max_bytes: u64) -> Result<(), AcquisitionError> {
    if !file.declared_mime.starts_with("image/") {
        return Err(AcquisitionError::Validation(format!(
            "'{}' is {}, not an image",
            file.name, file.declared_mime
        )));
    }

    if file.size() > max_bytes {
        return Err(AcquisitionError::Validation(format!(
            "'{}' is {:.1} MB, the limit is {:.1} MB",
            file.name,
            file.size() as f64 / (1024.0 * 1024.0),
            max_bytes as f64 / (1024.0 * 1024.0)
        )));
    }

    Ok(())
}

/// Decode an already validated upload
pub fn decode_upload(file: &UploadedFile) -> Result<RasterImage, AcquisitionError> {
    let image = image::load_from_memory(&file.bytes)
        .map_err(|e| AcquisitionError::InvalidImage(format!("'{}': {}", file.name, e)))?;
    RasterImage::from_dynamic(image)
}

/// Square region of a source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

/// Largest square centred in a `width` x `height` image
pub fn center_crop_region(width: u32, height: u32) -> CropRegion {
    let size = width.min(height);
    CropRegion {
        x: (width - size) / 2,
        y: (height - size) / 2,
        size,
    }
}

/// Centre-crop to a square and resample to `target_size` x `target_size`
pub fn normalize(raster: &RasterImage, target_size: u32) -> Result<RasterImage, AcquisitionError> {
    if target_size == 0 {
        return Err(AcquisitionError::InvalidImage("target size is zero".into()));
    }
    if raster.width == 0 || raster.height == 0 {
        return Err(AcquisitionError::InvalidImage(format!(
            "empty raster {}x{}",
            raster.width, raster.height
        )));
    }

    let image = raster.to_rgba_image()?;
    let region = center_crop_region(raster.width, raster.height);
    let cropped = imageops::crop_imm(&image, region.x, region.y, region.size, region.size).to_image();

    let resized = if region.size == target_size {
        cropped
    } else {
        imageops::resize(&cropped, target_size, target_size, FilterType::Triangle)
    };

    debug!(
        "Normalized {}x{} -> crop {:?} -> {}x{}",
        raster.width, raster.height, region, target_size, target_size
    );

    let (width, height) = resized.dimensions();
    RasterImage::from_rgba(resized.into_raw(), width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_center_crop_landscape() {
        let region = center_crop_region(400, 200);
        assert_eq!(region, CropRegion { x: 100, y: 0, size: 200 });
    }

    #[test]
    fn test_center_crop_portrait_and_square() {
        assert_eq!(center_crop_region(300, 500), CropRegion { x: 0, y: 100, size: 300 });
        assert_eq!(center_crop_region(224, 224), CropRegion { x: 0, y: 0, size: 224 });
    }

    #[test]
    fn test_normalize_keeps_centre_content() {
        // Left and right quarters blue, centre half red
        let img = RgbaImage::from_fn(400, 200, |x, _| {
            if (100..300).contains(&x) {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let raster = RasterImage::from_dynamic(image::DynamicImage::ImageRgba8(img)).unwrap();

        let normalized = normalize(&raster, 224).unwrap();

        assert_eq!(normalized.dimensions(), (224, 224));
        assert_eq!(normalized.rgb_at(0, 0), [255, 0, 0]);
        assert_eq!(normalized.rgb_at(223, 223), [255, 0, 0]);
    }

    #[test]
    fn test_normalize_rejects_empty_raster() {
        let raster = RasterImage {
            data: Vec::new(),
            width: 0,
            height: 0,
            captured_at: std::time::Instant::now(),
        };
        assert!(matches!(normalize(&raster, 224), Err(AcquisitionError::InvalidImage(_))));

        let raster = RasterImage {
            data: Vec::new(),
            width: 40,
            height: 0,
            captured_at: std::time::Instant::now(),
        };
        assert!(matches!(normalize(&raster, 224), Err(AcquisitionError::InvalidImage(_))));
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let file = UploadedFile::new("huge.jpg", "image/jpeg", vec![0; 20 * 1024 * 1024]);
        let err = validate_upload(&file, 15 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, AcquisitionError::Validation(_)));
    }

    #[test]
    fn test_non_image_upload_rejected() {
        let file = UploadedFile::new("notes.txt", mime_for_path(Path::new("notes.txt")), b"hello".to_vec());
        let err = validate_upload(&file, 15 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, AcquisitionError::Validation(_)));
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_for_path(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a.txt")), "text/plain");
        assert_eq!(mime_for_path(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_decode_valid_png() {
        let file = UploadedFile::new("dish.png", "image/png", png_bytes(8, 6));
        validate_upload(&file, 1024 * 1024).unwrap();
        let raster = decode_upload(&file).unwrap();
        assert_eq!(raster.dimensions(), (8, 6));
        assert_eq!(raster.rgb_at(4, 3), [200, 30, 30]);
    }

    #[test]
    fn test_decode_corrupt_upload() {
        let file = UploadedFile::new("broken.png", "image/png", vec![1, 2, 3, 4]);
        let err = decode_upload(&file).unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidImage(_)));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.png");
        std::fs::write(&path, png_bytes(4, 4)).unwrap();

        let file = UploadedFile::from_path(&path).unwrap();
        assert_eq!(file.name, "plate.png");
        assert_eq!(file.declared_mime, "image/png");
        assert!(validate_upload(&file, 1024).is_ok());
    }
}
