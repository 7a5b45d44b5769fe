use std::path::Path;

use candle_core::{Device, Tensor};

use super::error::ClassifierError;
use super::mappings::LabelMappings;
use super::preprocess::ImageProcessor;
use super::vit::VitClassifier;

/// Number of ranked predictions reported per image.
pub const TOP_K: usize = 2;

/// The outcome of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Arg-max class label.
    pub predicted: String,
    /// Ranked `(label, probability)` pairs, descending, at most [`TOP_K`].
    pub top_k: Vec<(String, f32)>,
}

/// An assembled image classifier for one domain: base model with merged
/// adapter deltas, its preprocessing transform, and the label contract.
///
/// All fields are immutable after assembly and a forward pass never mutates
/// model state, so `&Classifier` can be shared freely across threads.
#[derive(Debug)]
pub struct Classifier {
    pub(crate) base_model: String,
    pub(crate) adapter_path: String,
    pub(crate) model: VitClassifier,
    pub(crate) processor: ImageProcessor,
    pub(crate) mappings: LabelMappings,
    pub(crate) device: Device,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Classifier>();
    }
};

impl Classifier {
    /// Creates a new ClassifierBuilder for fluent construction.
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    /// Returns information about the classifier's current state.
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            base_model: self.base_model.clone(),
            adapter_path: self.adapter_path.clone(),
            num_labels: self.mappings.num_labels(),
            labels: self.mappings.labels().to_vec(),
            input_size: self.processor.input_size(),
        }
    }

    /// Classifies a single image file.
    ///
    /// Runs preprocess → forward → softmax → top-k. Deterministic for an
    /// identical (model, image) pair.
    ///
    /// # Errors
    /// - `ImageDecode` if the file cannot be decoded (per-image, skippable),
    /// - `Inference` if the forward pass fails (contract violation between
    ///   preprocessor and model, not silently swallowed).
    pub fn classify(&self, image_path: &Path) -> Result<Classification, ClassifierError> {
        let input = self.processor.preprocess(image_path, &self.device)?;
        let logits = self
            .model
            .forward(&input)
            .map_err(|e| ClassifierError::inference("forward pass failed", e))?;
        rank(&logits, &self.mappings, TOP_K)
    }
}

/// Converts one row of logits into a ranked [`Classification`].
///
/// Softmax is taken across the full label set, so the probabilities sum to 1;
/// ranking sorts descending by probability with ascending class index as the
/// tie-break, which keeps the output deterministic for identical input.
pub(crate) fn rank(
    logits: &Tensor,
    mappings: &LabelMappings,
    k: usize,
) -> Result<Classification, ClassifierError> {
    let probs = candle_nn::ops::softmax(logits, candle_core::D::Minus1)
        .and_then(|p| p.squeeze(0))
        .and_then(|p| p.to_vec1::<f32>())
        .map_err(|e| ClassifierError::inference("softmax failed", e))?;

    if probs.len() != mappings.num_labels() {
        return Err(ClassifierError::Inference(format!(
            "model produced {} scores but the mapping defines {} labels",
            probs.len(),
            mappings.num_labels()
        )));
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| {
        probs[b]
            .partial_cmp(&probs[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let resolve = |id: usize| -> Result<String, ClassifierError> {
        mappings
            .label(id)
            .map(str::to_string)
            .ok_or_else(|| ClassifierError::Inference(format!("no label for class index {}", id)))
    };

    let predicted = resolve(order[0])?;
    let top_k = order
        .iter()
        .take(k)
        .map(|&id| Ok((resolve(id)?, probs[id])))
        .collect::<Result<Vec<_>, ClassifierError>>()?;

    Ok(Classification { predicted, top_k })
}
