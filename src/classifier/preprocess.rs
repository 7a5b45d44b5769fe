//! Image decoding and normalization into the tensor layout the model expects.

use std::path::Path;

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use serde::Deserialize;

use super::error::ClassifierError;

fn default_true() -> bool {
    true
}

/// `size` appears in the wild both as a bare edge length and as an explicit
/// `{"height": .., "width": ..}` object.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    Edge(usize),
    Explicit { height: usize, width: usize },
}

impl SizeSpec {
    fn dimensions(self) -> (usize, usize) {
        match self {
            Self::Edge(edge) => (edge, edge),
            Self::Explicit { height, width } => (height, width),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProcessorConfig {
    size: SizeSpec,
    image_mean: [f32; 3],
    image_std: [f32; 3],
    #[serde(default = "default_true")]
    do_resize: bool,
    #[serde(default = "default_true")]
    do_normalize: bool,
}

/// The preprocessing transform registered with a base model.
///
/// Decodes an image file, forces 3-channel RGB (alpha dropped, grayscale
/// expanded), resizes bilinearly to the model's input resolution, rescales to
/// [0, 1] and normalizes per channel, producing a single-item
/// `(1, 3, height, width)` batch.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    height: usize,
    width: usize,
    mean: [f32; 3],
    std: [f32; 3],
    do_resize: bool,
    do_normalize: bool,
}

impl ImageProcessor {
    /// Reads the transform description from a `preprocessor_config.json`.
    ///
    /// # Errors
    /// `ClassifierError::ModelLoad`: the transform is part of the model
    /// artifact, so a missing or malformed config means the base model
    /// identity did not resolve to a usable model.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "failed to read preprocessor config {}: {}",
                path.display(),
                e
            ))
        })?;
        let raw: RawProcessorConfig = serde_json::from_str(&content).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "malformed preprocessor config {}: {}",
                path.display(),
                e
            ))
        })?;
        let (height, width) = raw.size.dimensions();
        Ok(Self {
            height,
            width,
            mean: raw.image_mean,
            std: raw.image_std,
            do_resize: raw.do_resize,
            do_normalize: raw.do_normalize,
        })
    }

    /// Input resolution as `(height, width)`.
    pub fn input_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Decodes and normalizes one image file into a single-item batch.
    ///
    /// # Errors
    /// `ClassifierError::ImageDecode` for corrupt or unsupported files;
    /// `ClassifierError::Inference` if tensor construction fails.
    pub fn preprocess(&self, path: &Path, device: &Device) -> Result<Tensor, ClassifierError> {
        let img = image::open(path).map_err(|source| ClassifierError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;
        let rgb = img.to_rgb8();
        let rgb = if self.do_resize {
            image::imageops::resize(
                &rgb,
                self.width as u32,
                self.height as u32,
                FilterType::Triangle,
            )
        } else {
            rgb
        };

        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        // Interleaved RGB u8 -> planar CHW f32.
        let mut data = vec![0f32; 3 * height * width];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                data[c * height * width + y * width + x] = if self.do_normalize {
                    (value - self.mean[c]) / self.std[c]
                } else {
                    value
                };
            }
        }

        Tensor::from_vec(data, (3, height, width), device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| ClassifierError::inference("failed to build input tensor", e))
    }
}
