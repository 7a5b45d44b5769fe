//! Batch classification over a directory of ground-truth-labelled images,
//! plus the per-image report formatting.
//!
//! The expected layout is `root/<label>/<image>`: the immediate parent
//! directory of each image is its ground-truth label. Enumeration goes one
//! level deep only; stray files directly under the root and files without a
//! recognized image extension are skipped.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use candle_core::Device;
use log::{info, warn};

use crate::classifier::{Classification, Classifier, ClassifierError, LabelMappings};
use crate::models::BaseModel;

/// Supported image extensions, matched case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// One image paired with the ground-truth label its directory implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationTask {
    pub image_path: PathBuf,
    pub true_label: String,
}

/// Tally of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Everything needed to run one domain's pipeline: the five domains are five
/// of these records, not five code paths.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub name: String,
    pub base_model: BaseModel,
    pub adapter_dir: PathBuf,
    pub images_root: PathBuf,
    pub mappings_path: PathBuf,
}

fn extension_is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Enumerates classification tasks under `root/<label>/<image>`.
///
/// Tasks are sorted by (label, file name) so batch output is stable across
/// runs regardless of directory-entry order.
///
/// # Errors
/// `ClassifierError::Configuration` if the root is missing or unreadable.
pub fn collect_tasks(root: &Path) -> Result<Vec<ClassificationTask>, ClassifierError> {
    let entries = std::fs::read_dir(root).map_err(|e| {
        ClassifierError::Configuration(format!(
            "failed to read images root {}: {}",
            root.display(),
            e
        ))
    })?;

    let mut tasks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            ClassifierError::Configuration(format!("failed to enumerate {}: {}", root.display(), e))
        })?;
        let label_dir = entry.path();
        if !label_dir.is_dir() {
            continue;
        }
        let true_label = entry.file_name().to_string_lossy().into_owned();
        let files = std::fs::read_dir(&label_dir).map_err(|e| {
            ClassifierError::Configuration(format!(
                "failed to read label directory {}: {}",
                label_dir.display(),
                e
            ))
        })?;
        for file in files {
            let file = file.map_err(|e| {
                ClassifierError::Configuration(format!(
                    "failed to enumerate {}: {}",
                    label_dir.display(),
                    e
                ))
            })?;
            let image_path = file.path();
            if image_path.is_dir() || !extension_is_supported(&image_path) {
                continue;
            }
            tasks.push(ClassificationTask {
                image_path,
                true_label: true_label.clone(),
            });
        }
    }

    tasks.sort_by(|a, b| {
        (&a.true_label, &a.image_path).cmp(&(&b.true_label, &b.image_path))
    });
    Ok(tasks)
}

/// Formats one classification outcome for a human reader.
pub fn format_result(true_label: &str, result: &Classification) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "True Label: {}", true_label);
    let _ = writeln!(out, "Predicted Label: {}", result.predicted);
    let _ = writeln!(out, "Confidence Scores:");
    for (label, prob) in &result.top_k {
        let _ = writeln!(out, "  {}: {:.4}", label, prob);
    }
    let _ = writeln!(out, "{}", "-".repeat(40));
    out
}

/// Dispatches every task through `classify`, reporting each outcome.
///
/// Per-image failures (`ImageDecode`, `Inference`) are reported and the
/// batch continues; one bad image never aborts the sweep.
pub fn run_batch_with<F>(tasks: &[ClassificationTask], mut classify: F) -> BatchSummary
where
    F: FnMut(&Path) -> Result<Classification, ClassifierError>,
{
    let mut summary = BatchSummary::default();
    let mut current_label: Option<&str> = None;

    for task in tasks {
        if current_label != Some(task.true_label.as_str()) {
            println!("\nClassifying images in {} folder:", task.true_label);
            current_label = Some(task.true_label.as_str());
        }
        summary.total += 1;
        match classify(&task.image_path) {
            Ok(result) => {
                summary.succeeded += 1;
                print!("{}", format_result(&task.true_label, &result));
            }
            Err(e) => {
                summary.failed += 1;
                warn!("skipping {}: {}", task.image_path.display(), e);
                eprintln!("Failed to classify {}: {}", task.image_path.display(), e);
            }
        }
    }

    info!(
        "Batch finished: {} images, {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
    summary
}

/// Sweeps a domain's image directory with an assembled classifier.
pub fn run_batch(classifier: &Classifier, root: &Path) -> Result<BatchSummary, ClassifierError> {
    let tasks = collect_tasks(root)?;
    Ok(run_batch_with(&tasks, |path| classifier.classify(path)))
}

/// The generic domain pipeline: resolve mappings, assemble the classifier,
/// sweep the image directory.
///
/// # Errors
/// `Configuration` and `ModelLoad` errors are fatal to the domain and are
/// returned to the caller; per-image errors are handled inside the batch.
pub fn run_domain(config: &DomainConfig, device: Device) -> Result<BatchSummary, ClassifierError> {
    info!("Starting {} classification", config.name);
    let mappings = LabelMappings::from_file(&config.mappings_path)?;
    let classifier = Classifier::builder()
        .with_device(device)
        .with_base_model(config.base_model)?
        .with_adapter(&config.adapter_dir)
        .with_mappings(mappings)
        .build()?;
    run_batch(&classifier, &config.images_root)
}
