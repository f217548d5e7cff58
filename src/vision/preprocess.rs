//! Tensor preparation for the neural models
//!
//! Converts a normalized raster into the NCHW or NHWC float tensor a model
//! expects, with pixel values scaled to 0-1 and optionally standardized.

use ndarray::{Array3, Array4};

use crate::acquisition::RasterImage;

/// Memory layout a model declares for its image input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [batch, channels, height, width]
    Nchw,
    /// [batch, height, width, channels] (Keras exports)
    Nhwc,
}

impl TensorLayout {
    /// Guess the layout from a declared input shape
    pub fn from_shape(shape: &[i64]) -> Self {
        match shape {
            [_, 3, _, _] => TensorLayout::Nchw,
            _ => TensorLayout::Nhwc,
        }
    }
}

/// Per-channel standardization applied after 0-1 scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standardization {
    /// Mean values [R, G, B]
    pub mean: [f32; 3],
    /// Std values [R, G, B]
    pub std: [f32; 3],
}

impl Standardization {
    /// Plain 0-1 input, what the trained dish classifier expects
    pub fn identity() -> Self {
        Self {
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    /// ImageNet statistics used by generic pretrained feature networks
    pub fn imagenet() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Convert RGBA image data to RGB f32 array in 0-1
pub fn rgba_to_rgb_f32(data: &[u8], width: u32, height: u32) -> Array3<f32> {
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 4;
            if idx + 2 < data.len() {
                rgb[[y, x, 0]] = data[idx] as f32 / 255.0;
                rgb[[y, x, 1]] = data[idx + 1] as f32 / 255.0;
                rgb[[y, x, 2]] = data[idx + 2] as f32 / 255.0;
            }
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, stats: &Standardization) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - stats.mean[c]) / stats.std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Convert HWC image to NHWC tensor (batch size 1)
pub fn hwc_to_nhwc(image: &Array3<f32>) -> Array4<f32> {
    image.clone().insert_axis(ndarray::Axis(0))
}

/// Full preprocessing for one forward pass
pub fn to_model_input(raster: &RasterImage, layout: TensorLayout, stats: &Standardization) -> Array4<f32> {
    let rgb = rgba_to_rgb_f32(&raster.data, raster.width, raster.height);
    let normalized = normalize(&rgb, stats);

    match layout {
        TensorLayout::Nchw => hwc_to_nchw(&normalized),
        TensorLayout::Nhwc => hwc_to_nhwc(&normalized),
    }
}
