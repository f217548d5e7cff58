//! Hand-crafted visual features
//!
//! Colour-bucket histogram, brightness and Sobel edge statistics computed on
//! a strided subsample of the normalized raster. Pure and deterministic.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::acquisition::RasterImage;
use crate::config::FeatureSettings;
use crate::error::AcquisitionError;

/// Named colour categories a sampled pixel can fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorBucket {
    Red,
    Orange,
    Yellow,
    Green,
    DarkGreen,
    Brown,
    DarkBrown,
    LightBrown,
    Golden,
    White,
    Cream,
    Black,
    DarkRed,
    /// Greys and anything the rules do not cover; left out of the histogram
    Mixed,
}

impl ColorBucket {
    pub fn label(&self) -> &'static str {
        match self {
            ColorBucket::Red => "red",
            ColorBucket::Orange => "orange",
            ColorBucket::Yellow => "yellow",
            ColorBucket::Green => "green",
            ColorBucket::DarkGreen => "dark-green",
            ColorBucket::Brown => "brown",
            ColorBucket::DarkBrown => "dark-brown",
            ColorBucket::LightBrown => "light-brown",
            ColorBucket::Golden => "golden",
            ColorBucket::White => "white",
            ColorBucket::Cream => "cream",
            ColorBucket::Black => "black",
            ColorBucket::DarkRed => "dark-red",
            ColorBucket::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for ColorBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Assign an RGB pixel to a colour bucket
pub fn classify_pixel(r: u8, g: u8, b: u8) -> ColorBucket {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let brightness = (r + g + b) / 3;
    let chroma = r.max(g).max(b) - r.min(g).min(b);

    if brightness < 35 {
        return ColorBucket::Black;
    }

    // Bright, near-neutral: white or warm off-white
    if r > 190 && g > 175 && b > 150 && r >= b {
        return if r - b > 25 {
            ColorBucket::Cream
        } else {
            ColorBucket::White
        };
    }

    if chroma < 25 {
        return ColorBucket::Mixed;
    }

    if g > r + 15 && g > b + 15 {
        return if brightness < 80 {
            ColorBucket::DarkGreen
        } else {
            ColorBucket::Green
        };
    }

    if r >= 180 && g >= 160 && b < 120 && (r - g).abs() < 60 {
        return ColorBucket::Yellow;
    }

    if r > g && r > b {
        if r - g >= 90 && r - b >= 90 && g < 100 {
            return if r >= 150 {
                ColorBucket::Red
            } else {
                ColorBucket::DarkRed
            };
        }

        if r >= 180 && b < 100 {
            return if r - g >= 70 {
                ColorBucket::Orange
            } else {
                ColorBucket::Golden
            };
        }

        if r - b >= 30 {
            return if brightness < 70 {
                ColorBucket::DarkBrown
            } else if brightness < 130 {
                ColorBucket::Brown
            } else {
                ColorBucket::LightBrown
            };
        }
    }

    ColorBucket::Mixed
}

/// Feature summary of one image
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureVector {
    /// Fraction of sampled pixels per bucket (`Mixed` excluded)
    pub color_histogram: BTreeMap<ColorBucket, f32>,
    /// Mean brightness in [0, 1]
    pub brightness: f32,
    /// Fraction of sampled interior pixels whose gradient passes the threshold
    pub edge_density: f32,
    /// Mean gradient magnitude, scaled by 1/255
    pub texture_complexity: f32,
    /// Embedding from a generic feature network, when one ran
    pub embedding: Option<Vec<f32>>,
}

impl FeatureVector {
    /// Fraction of sampled pixels in `bucket`
    pub fn fraction(&self, bucket: ColorBucket) -> f32 {
        self.color_histogram.get(&bucket).copied().unwrap_or(0.0)
    }

    /// Most frequent bucket; ties go to the earlier bucket
    pub fn dominant_color(&self) -> Option<ColorBucket> {
        self.color_histogram
            .iter()
            .filter(|(_, f)| **f > 0.0)
            .fold(None, |best: Option<(ColorBucket, f32)>, (bucket, fraction)| match best {
                Some((_, best_fraction)) if best_fraction >= *fraction => best,
                _ => Some((*bucket, *fraction)),
            })
            .map(|(bucket, _)| bucket)
    }

    /// Buckets sorted by descending fraction
    pub fn ranked_colors(&self) -> Vec<(ColorBucket, f32)> {
        let mut ranked: Vec<_> = self.color_histogram.iter().map(|(b, f)| (*b, *f)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Compute the feature vector of a raster
pub fn extract_features(
    raster: &RasterImage,
    settings: &FeatureSettings,
) -> Result<FeatureVector, AcquisitionError> {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 || raster.data.len() < width as usize * height as usize * 4 {
        return Err(AcquisitionError::InvalidImage(format!(
            "cannot extract features from {}x{} raster",
            width, height
        )));
    }

    let stride = settings.sample_stride.max(1);
    let pixel_count = width as usize * height as usize;

    let mut counts: BTreeMap<ColorBucket, usize> = BTreeMap::new();
    let mut brightness_sum = 0.0f64;
    let mut sampled = 0usize;

    for index in (0..pixel_count).step_by(stride) {
        let px = &raster.data[index * 4..index * 4 + 3];
        brightness_sum += (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0;
        sampled += 1;

        let bucket = classify_pixel(px[0], px[1], px[2]);
        if bucket != ColorBucket::Mixed {
            *counts.entry(bucket).or_default() += 1;
        }
    }

    let color_histogram = counts
        .into_iter()
        .map(|(bucket, count)| (bucket, count as f32 / sampled as f32))
        .collect();

    let (edge_density, texture_complexity) = edge_statistics(raster, stride, settings.edge_threshold);

    Ok(FeatureVector {
        color_histogram,
        brightness: (brightness_sum / sampled as f64 / 255.0) as f32,
        edge_density,
        texture_complexity,
        embedding: None,
    })
}

/// Luma plane using the same (R+G+B)/3 intensity as the brightness signal
fn intensity_plane(raster: &RasterImage) -> GrayImage {
    GrayImage::from_fn(raster.width, raster.height, |x, y| {
        let [r, g, b] = raster.rgb_at(x, y);
        image::Luma([((r as u16 + g as u16 + b as u16) / 3) as u8])
    })
}

/// (edge fraction, mean magnitude / 255) over interior sampled pixels
fn edge_statistics(raster: &RasterImage, stride: usize, threshold: f32) -> (f32, f32) {
    let (width, height) = raster.dimensions();
    if width < 3 || height < 3 {
        return (0.0, 0.0);
    }

    let gray = intensity_plane(raster);
    let gx = horizontal_sobel(&gray);
    let gy = vertical_sobel(&gray);

    let mut edges = 0usize;
    let mut magnitude_sum = 0.0f64;
    let mut sampled = 0usize;

    let pixel_count = width as usize * height as usize;
    for index in (0..pixel_count).step_by(stride) {
        let x = (index % width as usize) as u32;
        let y = (index / width as usize) as u32;
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            continue;
        }

        // Sobel kernels sum to 4x the central difference
        let dx = gx.get_pixel(x, y)[0] as f32 / 4.0;
        let dy = gy.get_pixel(x, y)[0] as f32 / 4.0;
        let magnitude = (dx * dx + dy * dy).sqrt();

        magnitude_sum += magnitude as f64;
        sampled += 1;
        if magnitude > threshold {
            edges += 1;
        }
    }

    if sampled == 0 {
        return (0.0, 0.0);
    }

    (
        edges as f32 / sampled as f32,
        (magnitude_sum / sampled as f64 / 255.0) as f32,
    )
}
