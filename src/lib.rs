//! Medical image classification with one shared ViT base and per-domain
//! low-rank adapters.
//!
//! A single pretrained vision transformer serves five diagnostic domains
//! (brain MRI, diabetic retinopathy, kidney ultrasound, retinal OCT,
//! dermoscopy); selecting a domain swaps in a small adapter and a label
//! mapping instead of a full model copy.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use medvit::{BaseModel, Classifier, LabelMappings};
//!
//! let mappings = LabelMappings::from_file("adapters/brain_tumor_loha/mappings.json")?;
//! let classifier = Classifier::builder()
//!     .with_base_model(BaseModel::VitBase224In21k)?
//!     .with_adapter("adapters/brain_tumor_loha")
//!     .with_mappings(mappings)
//!     .build()?;
//!
//! let result = classifier.classify("images/brain/glioma/scan_001.jpg".as_ref())?;
//! println!("Predicted: {}", result.predicted);
//! for (label, prob) in &result.top_k {
//!     println!("  {}: {:.4}", label, prob);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Batch runs
//!
//! A directory laid out as `root/<true_label>/<image>` can be swept in one
//! call; undecodable images are reported and skipped rather than aborting
//! the run:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # use medvit::{BaseModel, Classifier, LabelMappings};
//! # let mappings = LabelMappings::from_file("adapters/brain_tumor_loha/mappings.json")?;
//! # let classifier = Classifier::builder()
//! #     .with_base_model(BaseModel::VitBase224In21k)?
//! #     .with_adapter("adapters/brain_tumor_loha")
//! #     .with_mappings(mappings)
//! #     .build()?;
//! let summary = medvit::run_batch(&classifier, "images/brain".as_ref())?;
//! println!("{} classified, {} failed", summary.succeeded, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod classifier;
pub mod device;
pub mod model_manager;
pub mod models;

pub use batch::{
    collect_tasks, format_result, run_batch, run_batch_with, run_domain, BatchSummary,
    ClassificationTask, DomainConfig, IMAGE_EXTENSIONS,
};
pub use classifier::{
    Classification, Classifier, ClassifierBuilder, ClassifierError, ClassifierInfo,
    LabelMappings, TOP_K,
};
pub use device::parse_device;
pub use model_manager::{ModelError, ModelManager};
pub use models::{BaseModel, ModelInfo};

pub fn init_logger() {
    env_logger::init();
}
