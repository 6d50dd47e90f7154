use anyhow::{Context, Result};
use image::imageops::FilterType;

use crate::encode::backend::FaceEncoder;
use crate::gallery::Encoding;

const DEFAULT_GRID: u32 = 16;
const MIN_CONTRAST: f32 = 1e-3;

/// Whole-frame grayscale thumbnail encoder.
///
/// The frame is shrunk to a `width x height` grid, mean-centred and scaled
/// to unit length, so the Euclidean distance between two encodings lies in
/// `[0, 2]` and identical captures are at distance 0. A frame with no
/// contrast (lens cap, dark room) is reported as "no face".
#[derive(Clone, Copy, Debug)]
pub struct ThumbnailEncoder {
    width: u32,
    height: u32,
}

impl ThumbnailEncoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl Default for ThumbnailEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_GRID, DEFAULT_GRID)
    }
}

impl FaceEncoder for ThumbnailEncoder {
    fn name(&self) -> &'static str {
        "thumbnail"
    }

    fn encode(&self, image: &[u8]) -> Result<Option<Encoding>> {
        let decoded = image::load_from_memory(image).context("decode capture image")?;
        let gray = decoded.to_luma8();
        let small = image::imageops::resize(&gray, self.width, self.height, FilterType::Triangle);

        let mut values: Vec<f32> = small.pixels().map(|p| p[0] as f32 / 255.0).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        for v in values.iter_mut() {
            *v -= mean;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < MIN_CONTRAST {
            return Ok(None);
        }
        for v in values.iter_mut() {
            *v /= norm;
        }
        Ok(Some(values))
    }
}
