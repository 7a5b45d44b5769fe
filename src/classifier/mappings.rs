use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::error::ClassifierError;

/// On-disk shape of the mapping artifact. `id2label` is string-keyed because
/// the artifact is produced by a JSON serializer that cannot key objects by
/// integers; the conversion to numeric indices happens here and nowhere else.
#[derive(Debug, Deserialize)]
struct RawMappings {
    label2id: HashMap<String, usize>,
    id2label: HashMap<String, String>,
}

/// The bidirectional label/index contract for one domain.
///
/// Invariants, enforced at load time:
/// - `label2id` and `id2label` are mutually inverse,
/// - the index set is exactly `0..num_labels` with no gaps or duplicates.
///
/// Immutable after loading; one instance is shared across a whole batch run.
#[derive(Debug, Clone)]
pub struct LabelMappings {
    label2id: HashMap<String, usize>,
    id2label: Vec<String>,
}

impl LabelMappings {
    /// Loads and validates a mapping artifact.
    ///
    /// # Errors
    /// `ClassifierError::Configuration` if the file is missing, unreadable,
    /// malformed, or the two tables are not mutually inverse over a
    /// contiguous 0-based range. This fires before any model loading.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::Configuration(format!(
                "failed to read mapping artifact {}: {}",
                path.display(),
                e
            ))
        })?;
        let raw: RawMappings = serde_json::from_str(&content).map_err(|e| {
            ClassifierError::Configuration(format!(
                "malformed mapping artifact {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawMappings) -> Result<Self, ClassifierError> {
        let num_labels = raw.id2label.len();
        if num_labels == 0 {
            return Err(ClassifierError::Configuration(
                "mapping artifact defines no labels".to_string(),
            ));
        }
        if raw.label2id.len() != num_labels {
            return Err(ClassifierError::Configuration(format!(
                "label2id has {} entries but id2label has {}",
                raw.label2id.len(),
                num_labels
            )));
        }

        // Canonicalize the string-keyed inverse table into a dense vector,
        // which also proves the index set is contiguous from 0.
        let mut id2label = vec![String::new(); num_labels];
        for (key, label) in &raw.id2label {
            let id: usize = key.parse().map_err(|_| {
                ClassifierError::Configuration(format!("id2label key '{}' is not an index", key))
            })?;
            if id >= num_labels {
                return Err(ClassifierError::Configuration(format!(
                    "id2label index {} is out of range for {} labels",
                    id, num_labels
                )));
            }
            id2label[id] = label.clone();
        }

        for (name, &id) in &raw.label2id {
            if id >= num_labels || id2label[id] != *name {
                return Err(ClassifierError::Configuration(format!(
                    "label2id and id2label disagree on '{}' (index {})",
                    name, id
                )));
            }
        }

        Ok(Self {
            label2id: raw.label2id,
            id2label,
        })
    }

    /// Number of classes in this domain's label space.
    pub fn num_labels(&self) -> usize {
        self.id2label.len()
    }

    /// Resolves a class index to its label name.
    pub fn label(&self, id: usize) -> Option<&str> {
        self.id2label.get(id).map(String::as_str)
    }

    /// Resolves a label name to its class index.
    pub fn id(&self, label: &str) -> Option<usize> {
        self.label2id.get(label).copied()
    }

    /// All label names, ordered by class index.
    pub fn labels(&self) -> &[String] {
        &self.id2label
    }
}
