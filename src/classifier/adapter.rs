//! Domain-adapter artifacts and their overlay onto base weights.
//!
//! An adapter directory holds `adapter_config.json` plus
//! `adapter_model.safetensors` with parameter deltas for a designated subset
//! of the base weight matrices. Two decompositions are supported:
//!
//! - low-rank (`lora_A`/`lora_B`): ΔW = α/r · B·A
//! - Hadamard product (`hada_w1_*`/`hada_w2_*`): ΔW = α/r · (w1a·w1b) ∘ (w2a·w2b)
//!
//! The adapter may also carry full replacement tensors for modules that were
//! trained outright, which is how the classification head reaches the
//! otherwise headless pretrained base.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use log::debug;
use serde::Deserialize;

use super::error::ClassifierError;

const CONFIG_FILE: &str = "adapter_config.json";
const WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// Adapter decomposition format, from the `peft_type` config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PeftType {
    #[serde(rename = "LORA")]
    Lora,
    #[serde(rename = "LOHA")]
    Loha,
}

/// Subset of the adapter config this runtime needs.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    pub peft_type: PeftType,
    pub r: usize,
    #[serde(alias = "lora_alpha")]
    pub alpha: f64,
}

/// Which factor of a decomposition a stored tensor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    LoraA,
    LoraB,
    HadaW1A,
    HadaW1B,
    HadaW2A,
    HadaW2B,
    Replace,
}

#[derive(Default)]
struct DeltaParts {
    lora_a: Option<Tensor>,
    lora_b: Option<Tensor>,
    hada_w1_a: Option<Tensor>,
    hada_w1_b: Option<Tensor>,
    hada_w2_a: Option<Tensor>,
    hada_w2_b: Option<Tensor>,
}

/// Strips serializer framing from a stored tensor name: the wrapper prefix
/// and the bookkeeping path segments that are not part of the base model's
/// weight naming.
fn canonical_key(raw: &str) -> String {
    let raw = raw.strip_prefix("base_model.model.").unwrap_or(raw);
    raw.split('.')
        .filter(|segment| *segment != "default" && *segment != "modules_to_save")
        .collect::<Vec<_>>()
        .join(".")
}

/// Splits a canonical key into the targeted base-module path and the factor
/// role the tensor plays.
fn split_role(key: &str) -> (String, Role) {
    const SUFFIXES: [(&str, Role); 6] = [
        (".lora_A.weight", Role::LoraA),
        (".lora_B.weight", Role::LoraB),
        (".hada_w1_a", Role::HadaW1A),
        (".hada_w1_b", Role::HadaW1B),
        (".hada_w2_a", Role::HadaW2A),
        (".hada_w2_b", Role::HadaW2B),
    ];
    for (suffix, role) in SUFFIXES {
        if let Some(target) = key.strip_suffix(suffix) {
            return (target.to_string(), role);
        }
    }
    (key.to_string(), Role::Replace)
}

/// A loaded domain adapter: configuration plus parameter deltas.
pub struct Adapter {
    config: AdapterConfig,
    deltas: HashMap<String, DeltaParts>,
    replacements: HashMap<String, Tensor>,
}

impl Adapter {
    /// Loads an adapter from its directory.
    ///
    /// # Errors
    /// `ClassifierError::ModelLoad` if the directory is missing either file,
    /// the config is malformed, or a stored tensor does not fit the declared
    /// decomposition format.
    pub fn load(dir: impl AsRef<Path>, device: &Device) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref();
        let config_path = dir.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "failed to read adapter config {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let config: AdapterConfig = serde_json::from_str(&content).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "malformed adapter config {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let weights_path = dir.join(WEIGHTS_FILE);
        let tensors = candle_core::safetensors::load(&weights_path, device).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "failed to load adapter weights {}: {}",
                weights_path.display(),
                e
            ))
        })?;
        Self::from_tensors(config, tensors)
    }

    fn from_tensors(
        config: AdapterConfig,
        tensors: HashMap<String, Tensor>,
    ) -> Result<Self, ClassifierError> {
        let mut deltas: HashMap<String, DeltaParts> = HashMap::new();
        let mut replacements = HashMap::new();

        for (raw, tensor) in tensors {
            let key = canonical_key(&raw);
            let (target, role) = split_role(&key);
            let format_ok = match role {
                Role::LoraA | Role::LoraB => config.peft_type == PeftType::Lora,
                Role::Replace => true,
                _ => config.peft_type == PeftType::Loha,
            };
            if !format_ok {
                return Err(ClassifierError::ModelLoad(format!(
                    "adapter tensor '{}' does not match declared format {:?}",
                    raw, config.peft_type
                )));
            }
            if role == Role::Replace {
                replacements.insert(target, tensor);
                continue;
            }
            let parts = deltas.entry(target).or_default();
            let slot = match role {
                Role::LoraA => &mut parts.lora_a,
                Role::LoraB => &mut parts.lora_b,
                Role::HadaW1A => &mut parts.hada_w1_a,
                Role::HadaW1B => &mut parts.hada_w1_b,
                Role::HadaW2A => &mut parts.hada_w2_a,
                Role::HadaW2B => &mut parts.hada_w2_b,
                Role::Replace => unreachable!(),
            };
            *slot = Some(tensor);
        }

        Ok(Self {
            config,
            deltas,
            replacements,
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Overlays this adapter onto a base tensor map in place.
    ///
    /// Every delta target must exist in the base with a matching shape.
    /// Replacement tensors overwrite their base counterpart, except for the
    /// classification head, which may be absent from the base checkpoint and
    /// is installed fresh.
    ///
    /// # Errors
    /// `ClassifierError::ModelLoad` for incomplete factor sets, targets the
    /// base does not have, or shape mismatches.
    pub fn apply(&self, base: &mut HashMap<String, Tensor>) -> Result<(), ClassifierError> {
        for (target, parts) in &self.deltas {
            let key = format!("{target}.weight");
            let existing = base.get(&key).ok_or_else(|| {
                ClassifierError::ModelLoad(format!(
                    "adapter targets '{}' which the base model does not have",
                    key
                ))
            })?;
            let delta = self.delta_for(target, parts)?;
            if delta.dims() != existing.dims() {
                return Err(ClassifierError::ModelLoad(format!(
                    "adapter delta for '{}' has shape {:?} but base weight is {:?}",
                    key,
                    delta.dims(),
                    existing.dims()
                )));
            }
            let merged = (existing + &delta)
                .map_err(|e| ClassifierError::model_load(format!("merging '{key}'"), e))?;
            debug!("merged adapter delta into {}", key);
            base.insert(key, merged);
        }

        for (key, tensor) in &self.replacements {
            if let Some(existing) = base.get(key) {
                if existing.dims() != tensor.dims() {
                    return Err(ClassifierError::ModelLoad(format!(
                        "adapter replacement for '{}' has shape {:?} but base weight is {:?}",
                        key,
                        tensor.dims(),
                        existing.dims()
                    )));
                }
            } else if !key.starts_with("classifier.") {
                return Err(ClassifierError::ModelLoad(format!(
                    "adapter carries unknown tensor '{}'",
                    key
                )));
            }
            debug!("installed adapter replacement for {}", key);
            base.insert(key.clone(), tensor.clone());
        }
        Ok(())
    }

    fn delta_for(&self, target: &str, parts: &DeltaParts) -> Result<Tensor, ClassifierError> {
        match self.config.peft_type {
            PeftType::Lora => {
                let (a, b) = match (&parts.lora_a, &parts.lora_b) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(ClassifierError::ModelLoad(format!(
                            "adapter is missing a lora_A/lora_B factor for '{}'",
                            target
                        )))
                    }
                };
                // Rank comes from the stored factor so per-module rank
                // overrides keep working.
                let rank = a
                    .dim(0)
                    .map_err(|e| ClassifierError::model_load("reading lora_A rank", e))?;
                let scale = self.config.alpha / rank as f64;
                b.matmul(a)
                    .and_then(|delta| delta * scale)
                    .map_err(|e| {
                        ClassifierError::model_load(format!("computing LoRA delta for '{target}'"), e)
                    })
            }
            PeftType::Loha => {
                let (w1a, w1b, w2a, w2b) = match (
                    &parts.hada_w1_a,
                    &parts.hada_w1_b,
                    &parts.hada_w2_a,
                    &parts.hada_w2_b,
                ) {
                    (Some(w1a), Some(w1b), Some(w2a), Some(w2b)) => (w1a, w1b, w2a, w2b),
                    _ => {
                        return Err(ClassifierError::ModelLoad(format!(
                            "adapter is missing a hada factor for '{}'",
                            target
                        )))
                    }
                };
                let rank = w1a
                    .dim(1)
                    .map_err(|e| ClassifierError::model_load("reading hada rank", e))?;
                let scale = self.config.alpha / rank as f64;
                w1a.matmul(w1b)
                    .and_then(|m1| Ok(m1.mul(&w2a.matmul(w2b)?)?))
                    .and_then(|delta| delta * scale)
                    .map_err(|e| {
                        ClassifierError::model_load(format!("computing LoHa delta for '{target}'"), e)
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: (usize, usize), value: f32) -> Tensor {
        Tensor::full(value, shape, &Device::Cpu).unwrap()
    }

    fn lora_config(r: usize, alpha: f64) -> AdapterConfig {
        AdapterConfig {
            peft_type: PeftType::Lora,
            r,
            alpha,
        }
    }

    #[test]
    fn keys_are_canonicalized() {
        assert_eq!(
            canonical_key("base_model.model.vit.encoder.layer.0.attention.attention.query.lora_A.weight"),
            "vit.encoder.layer.0.attention.attention.query.lora_A.weight"
        );
        assert_eq!(
            canonical_key("base_model.model.classifier.modules_to_save.default.weight"),
            "classifier.weight"
        );
    }

    #[test]
    fn roles_are_recognized() {
        let (target, role) = split_role("vit.encoder.layer.0.attention.attention.query.lora_A.weight");
        assert_eq!(target, "vit.encoder.layer.0.attention.attention.query");
        assert_eq!(role, Role::LoraA);
        let (target, role) = split_role("vit.encoder.layer.1.output.dense.hada_w2_b");
        assert_eq!(target, "vit.encoder.layer.1.output.dense");
        assert_eq!(role, Role::HadaW2B);
        let (target, role) = split_role("classifier.weight");
        assert_eq!(target, "classifier.weight");
        assert_eq!(role, Role::Replace);
    }

    #[test]
    fn lora_delta_is_scaled_matmul() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_A.weight".to_string(),
            tensor((2, 3), 1.0),
        );
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_B.weight".to_string(),
            tensor((4, 2), 1.0),
        );
        let adapter = Adapter::from_tensors(lora_config(2, 4.0), stored).unwrap();

        let mut base = HashMap::new();
        let key = "vit.encoder.layer.0.attention.attention.query.weight".to_string();
        base.insert(key.clone(), tensor((4, 3), 0.0));
        adapter.apply(&mut base).unwrap();

        // B@A gives 2.0 everywhere, scaled by alpha/r = 2.
        let merged = base[&key].to_vec2::<f32>().unwrap();
        for row in merged {
            for value in row {
                assert!((value - 4.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn loha_delta_is_scaled_hadamard_product() {
        let mut stored = HashMap::new();
        let target = "base_model.model.vit.encoder.layer.0.intermediate.dense";
        stored.insert(format!("{target}.hada_w1_a"), tensor((3, 2), 1.0));
        stored.insert(format!("{target}.hada_w1_b"), tensor((2, 3), 1.0));
        stored.insert(format!("{target}.hada_w2_a"), tensor((3, 2), 0.5));
        stored.insert(format!("{target}.hada_w2_b"), tensor((2, 3), 0.5));
        let config = AdapterConfig {
            peft_type: PeftType::Loha,
            r: 2,
            alpha: 2.0,
        };
        let adapter = Adapter::from_tensors(config, stored).unwrap();

        let mut base = HashMap::new();
        let key = "vit.encoder.layer.0.intermediate.dense.weight".to_string();
        base.insert(key.clone(), tensor((3, 3), 1.0));
        adapter.apply(&mut base).unwrap();

        // (1*1 summed over r=2) ∘ (0.5*0.5 summed over r=2) = 2 * 0.5 = 1,
        // scaled by alpha/r = 1, on top of base 1.0.
        let merged = base[&key].to_vec2::<f32>().unwrap();
        for row in merged {
            for value in row {
                assert!((value - 2.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn incomplete_factor_set_is_rejected() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_A.weight".to_string(),
            tensor((2, 3), 1.0),
        );
        let adapter = Adapter::from_tensors(lora_config(2, 4.0), stored).unwrap();
        let mut base = HashMap::new();
        base.insert(
            "vit.encoder.layer.0.attention.attention.query.weight".to_string(),
            tensor((4, 3), 0.0),
        );
        let err = adapter.apply(&mut base).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelLoad(_)));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_A.weight".to_string(),
            tensor((2, 3), 1.0),
        );
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_B.weight".to_string(),
            tensor((4, 2), 1.0),
        );
        let adapter = Adapter::from_tensors(lora_config(2, 4.0), stored).unwrap();
        let mut base = HashMap::new();
        base.insert(
            "vit.encoder.layer.0.attention.attention.query.weight".to_string(),
            tensor((5, 3), 0.0),
        );
        assert!(adapter.apply(&mut base).is_err());
    }

    #[test]
    fn classification_head_is_installed_when_base_has_none() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.classifier.modules_to_save.weight".to_string(),
            tensor((3, 8), 0.1),
        );
        let adapter = Adapter::from_tensors(lora_config(2, 4.0), stored).unwrap();
        let mut base = HashMap::new();
        adapter.apply(&mut base).unwrap();
        assert_eq!(base["classifier.weight"].dims(), &[3, 8]);
    }

    #[test]
    fn unknown_replacement_target_is_rejected() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.vit.pooler.dense.weight".to_string(),
            tensor((3, 3), 0.1),
        );
        let adapter = Adapter::from_tensors(lora_config(2, 4.0), stored).unwrap();
        let mut base = HashMap::new();
        assert!(adapter.apply(&mut base).is_err());
    }

    #[test]
    fn format_mismatch_is_rejected_at_load() {
        let mut stored = HashMap::new();
        stored.insert(
            "base_model.model.vit.encoder.layer.0.attention.attention.query.hada_w1_a".to_string(),
            tensor((4, 2), 1.0),
        );
        assert!(Adapter::from_tensors(lora_config(2, 4.0), stored).is_err());
    }

    #[test]
    fn alpha_accepts_lora_alias() {
        let config: AdapterConfig =
            serde_json::from_str(r#"{"peft_type": "LORA", "r": 8, "lora_alpha": 16}"#).unwrap();
        assert_eq!(config.r, 8);
        assert!((config.alpha - 16.0).abs() < f64::EPSILON);
    }
}
