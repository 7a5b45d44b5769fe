//! The adapter-composed inference pipeline: label mappings, adapter overlay,
//! model assembly, preprocessing, and per-image classification.

pub mod adapter;
mod builder;
#[allow(clippy::module_inception)]
mod classifier;
mod error;
mod mappings;
mod preprocess;
mod vit;

pub use adapter::{Adapter, AdapterConfig, PeftType};
pub use builder::ClassifierBuilder;
pub use classifier::{Classification, Classifier, TOP_K};
pub use error::ClassifierError;
pub use mappings::LabelMappings;
pub use preprocess::ImageProcessor;
pub use vit::{VitClassifier, VitConfig};

/// A snapshot of an assembled classifier's identity, for operator-facing
/// reporting.
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    pub base_model: String,
    pub adapter_path: String,
    pub num_labels: usize,
    pub labels: Vec<String>,
    pub input_size: (usize, usize),
}
