use std::path::PathBuf;

/// Represents the different types of errors that can occur in the image classifier.
///
/// The first two variants are fatal to a domain run (no valid classifier can
/// exist without a mapping artifact and an assembled model); the last two are
/// per-image and are caught at the batch boundary so one bad image cannot
/// abort a whole sweep.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The mapping artifact is missing, unreadable, or violates the
    /// label/index contract, or the builder was driven with missing inputs.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The base model or adapter could not be resolved, or the two are
    /// incompatible (unknown format, mismatched shapes, wrong head size).
    #[error("model load error: {0}")]
    ModelLoad(String),
    /// The image file could not be decoded.
    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// The forward pass failed at runtime. Indicates an assembler or
    /// preprocessor contract violation rather than bad user input.
    #[error("inference error: {0}")]
    Inference(String),
}

impl ClassifierError {
    /// Wraps a candle error raised while loading or merging weights.
    pub(crate) fn model_load(context: impl Into<String>, err: candle_core::Error) -> Self {
        Self::ModelLoad(format!("{}: {}", context.into(), err))
    }

    /// Wraps a candle error raised during a forward pass.
    pub(crate) fn inference(context: impl Into<String>, err: candle_core::Error) -> Self {
        Self::Inference(format!("{}: {}", context.into(), err))
    }

    /// True for errors that should be caught per image instead of aborting
    /// the batch.
    pub fn is_per_image(&self) -> bool {
        matches!(self, Self::ImageDecode { .. } | Self::Inference(_))
    }
}
