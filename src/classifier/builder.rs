use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use log::{error, info};

use super::adapter::Adapter;
use super::classifier::Classifier;
use super::error::ClassifierError;
use super::mappings::LabelMappings;
use super::preprocess::ImageProcessor;
use super::vit::{VitClassifier, VitConfig};
use crate::model_manager::ModelManager;
use crate::models::{BaseModel, CONFIG_FILE, PREPROCESSOR_FILE, WEIGHTS_FILE};

/// A builder for assembling a [`Classifier`] with a fluent interface.
///
/// Assembly combines four inputs: a base model (built-in identity or local
/// directory), a domain adapter directory, a label mapping, and an execution
/// device. The adapter's parameter deltas are merged into the base weights
/// before the model is constructed, so the assembled classifier runs a plain
/// forward pass with no adapter indirection at inference time.
#[derive(Debug, Default)]
pub struct ClassifierBuilder {
    base_dir: Option<PathBuf>,
    base_name: Option<String>,
    adapter_dir: Option<PathBuf>,
    mappings: Option<LabelMappings>,
    device: Option<Device>,
}

impl ClassifierBuilder {
    /// Creates a new empty ClassifierBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the execution device. Defaults to CPU.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Selects a built-in base model, resolved through the local model cache.
    ///
    /// # Errors
    /// `ClassifierError::ModelLoad` if the cache cannot be opened or the
    /// model has not been downloaded yet.
    pub fn with_base_model(mut self, model: BaseModel) -> Result<Self, ClassifierError> {
        if self.base_dir.is_some() {
            return Err(ClassifierError::Configuration(
                "base model already set".to_string(),
            ));
        }
        let manager = ModelManager::new_default().map_err(|e| {
            ClassifierError::ModelLoad(format!("failed to open model cache: {}", e))
        })?;
        if !manager.is_model_downloaded(model) {
            return Err(ClassifierError::ModelLoad(format!(
                "Model '{:?}' is not downloaded. Please download it first using ModelManager::download_model()",
                model
            )));
        }
        self.base_dir = Some(manager.model_dir(model));
        self.base_name = Some(model.info().repo_id.to_string());
        Ok(self)
    }

    /// Uses a base model from an arbitrary local directory holding
    /// `config.json`, `preprocessor_config.json` and `model.safetensors`.
    pub fn with_base_model_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        if self.base_dir.is_some() {
            return Err(ClassifierError::Configuration(
                "base model already set".to_string(),
            ));
        }
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ClassifierError::ModelLoad(format!(
                "base model directory not found: {}",
                dir.display()
            )));
        }
        self.base_name = Some(dir.display().to_string());
        self.base_dir = Some(dir.to_path_buf());
        Ok(self)
    }

    /// Points at the domain adapter directory to overlay on the base.
    pub fn with_adapter(mut self, dir: impl AsRef<Path>) -> Self {
        self.adapter_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Supplies the domain's label mapping contract.
    pub fn with_mappings(mut self, mappings: LabelMappings) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Assembles the classifier.
    ///
    /// # Errors
    /// - `Configuration` if a required input was never provided,
    /// - `ModelLoad` if the base or adapter cannot be loaded, the adapter is
    ///   incompatible with the base, or the classification head size
    ///   disagrees with the mapping's label count.
    pub fn build(self) -> Result<Classifier, ClassifierError> {
        let base_dir = self
            .base_dir
            .ok_or_else(|| ClassifierError::Configuration("no base model set".to_string()))?;
        let adapter_dir = self
            .adapter_dir
            .ok_or_else(|| ClassifierError::Configuration("no adapter set".to_string()))?;
        let mappings = self
            .mappings
            .ok_or_else(|| ClassifierError::Configuration("no label mappings set".to_string()))?;
        let device = self.device.unwrap_or(Device::Cpu);
        let num_labels = mappings.num_labels();

        let config = VitConfig::from_file(base_dir.join(CONFIG_FILE))?;
        let processor = ImageProcessor::from_file(base_dir.join(PREPROCESSOR_FILE))?;

        let weights_path = base_dir.join(WEIGHTS_FILE);
        let mut tensors = candle_core::safetensors::load(&weights_path, &device).map_err(|e| {
            error!("Failed to load base weights: {}", e);
            ClassifierError::ModelLoad(format!(
                "failed to load base weights {}: {}",
                weights_path.display(),
                e
            ))
        })?;
        info!("Base weights loaded ({} tensors)", tensors.len());

        let adapter = Adapter::load(&adapter_dir, &device)?;
        adapter.apply(&mut tensors)?;
        info!(
            "Adapter {} overlaid ({:?}, r={})",
            adapter_dir.display(),
            adapter.config().peft_type,
            adapter.config().r
        );

        // The head must exist after the overlay and match the label space
        // exactly. Truncating or padding it would silently scramble the
        // label-index contract.
        let head = tensors.get("classifier.weight").ok_or_else(|| {
            ClassifierError::ModelLoad(
                "no classification head: the base checkpoint has none and the adapter \
                 did not provide one"
                    .to_string(),
            )
        })?;
        let head_size = head
            .dim(0)
            .map_err(|e| ClassifierError::model_load("reading head size", e))?;
        if head_size != num_labels {
            return Err(ClassifierError::ModelLoad(format!(
                "classification head has {} outputs but the mapping defines {} labels",
                head_size, num_labels
            )));
        }

        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = VitClassifier::load(&config, num_labels, vb)
            .map_err(|e| ClassifierError::model_load("constructing model", e))?;
        info!("Model assembled with {} labels", num_labels);

        Ok(Classifier {
            base_model: self.base_name.unwrap_or_default(),
            adapter_path: adapter_dir.display().to_string(),
            model,
            processor,
            mappings,
            device,
        })
    }
}
