use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Largest value of an 8-bit pixel.
pub const MAX_PIXEL: f32 = 255.0;

/// An 8-bit image stored channel-major: `[channels, height, width]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    shape:  [usize; 3],
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(shape: [usize; 3], pixels: Vec<u8>) -> Result<Self, DataError> {
        let expected = shape.iter().product::<usize>();
        if pixels.len() != expected {
            return Err(DataError::BadImage { shape, expected, found: pixels.len() });
        }
        Ok(Self { shape, pixels })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn normalized(&self) -> Vec<f32> {
        img_norm(&self.pixels)
    }
}

/// Map one value in `[0, max_val]` to `[-1, 1]`.
pub fn img_norm_value(x: f32, max_val: f32) -> f32 {
    (x * (1.0 / max_val) - 0.5) * 2.0
}

/// Normalize a stack of 8-bit pixels to `[-1, 1]`.
pub fn img_norm(pixels: &[u8]) -> Vec<f32> {
    pixels
        .iter()
        .map(|&p| img_norm_value(p as f32, MAX_PIXEL))
        .collect()
}
