//! Shared fixture: a synthetic base-model directory and adapter small enough
//! to assemble and run on the CPU in milliseconds.
//!
//! Every trunk weight is zero, so after layer norm the class-token features
//! are zero and the logits equal the classification head's bias exactly. That
//! makes the end-to-end prediction analytically known without a real
//! checkpoint.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use image::RgbImage;
use tempfile::TempDir;

pub const LABELS: [&str; 3] = ["glioma", "meningioma", "notumor"];

/// Installed as `classifier.bias`; index 1 dominates, so every valid image
/// classifies as "meningioma" with "glioma" in second place.
pub const HEAD_BIAS: [f32; 3] = [0.2, 2.0, -1.0];

pub struct Fixture {
    // Held for its Drop; everything lives under this directory.
    _dir: TempDir,
    pub base_dir: PathBuf,
    pub adapter_dir: PathBuf,
    pub images_root: PathBuf,
}

const HIDDEN: usize = 8;
const LAYERS: usize = 2;
const INTERMEDIATE: usize = 16;
const IMAGE_SIZE: usize = 16;
const PATCH: usize = 8;

fn zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
}

fn base_tensors() -> HashMap<String, Tensor> {
    let mut t = HashMap::new();
    let seq_len = (IMAGE_SIZE / PATCH) * (IMAGE_SIZE / PATCH) + 1;

    t.insert("vit.embeddings.cls_token".to_string(), zeros(&[1, 1, HIDDEN]));
    t.insert(
        "vit.embeddings.position_embeddings".to_string(),
        zeros(&[1, seq_len, HIDDEN]),
    );
    t.insert(
        "vit.embeddings.patch_embeddings.projection.weight".to_string(),
        zeros(&[HIDDEN, 3, PATCH, PATCH]),
    );
    t.insert(
        "vit.embeddings.patch_embeddings.projection.bias".to_string(),
        zeros(&[HIDDEN]),
    );

    for i in 0..LAYERS {
        let layer = format!("vit.encoder.layer.{i}");
        for proj in ["query", "key", "value"] {
            t.insert(
                format!("{layer}.attention.attention.{proj}.weight"),
                zeros(&[HIDDEN, HIDDEN]),
            );
            t.insert(
                format!("{layer}.attention.attention.{proj}.bias"),
                zeros(&[HIDDEN]),
            );
        }
        t.insert(
            format!("{layer}.attention.output.dense.weight"),
            zeros(&[HIDDEN, HIDDEN]),
        );
        t.insert(format!("{layer}.attention.output.dense.bias"), zeros(&[HIDDEN]));
        t.insert(
            format!("{layer}.intermediate.dense.weight"),
            zeros(&[INTERMEDIATE, HIDDEN]),
        );
        t.insert(
            format!("{layer}.intermediate.dense.bias"),
            zeros(&[INTERMEDIATE]),
        );
        t.insert(
            format!("{layer}.output.dense.weight"),
            zeros(&[HIDDEN, INTERMEDIATE]),
        );
        t.insert(format!("{layer}.output.dense.bias"), zeros(&[HIDDEN]));
        for norm in ["layernorm_before", "layernorm_after"] {
            t.insert(format!("{layer}.{norm}.weight"), zeros(&[HIDDEN]));
            t.insert(format!("{layer}.{norm}.bias"), zeros(&[HIDDEN]));
        }
    }

    t.insert("vit.layernorm.weight".to_string(), zeros(&[HIDDEN]));
    t.insert("vit.layernorm.bias".to_string(), zeros(&[HIDDEN]));
    // No classification head: the pretrained base ships without one and the
    // adapter must install it.
    t
}

fn adapter_tensors() -> HashMap<String, Tensor> {
    let mut t = HashMap::new();
    // Zero-valued low-rank factors exercise the merge path without changing
    // the analytic result.
    t.insert(
        "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_A.weight".to_string(),
        zeros(&[2, HIDDEN]),
    );
    t.insert(
        "base_model.model.vit.encoder.layer.0.attention.attention.query.lora_B.weight".to_string(),
        zeros(&[HIDDEN, 2]),
    );
    t.insert(
        "base_model.model.classifier.modules_to_save.default.weight".to_string(),
        zeros(&[LABELS.len(), HIDDEN]),
    );
    t.insert(
        "base_model.model.classifier.modules_to_save.default.bias".to_string(),
        Tensor::from_vec(HEAD_BIAS.to_vec(), LABELS.len(), &Device::Cpu).unwrap(),
    );
    t
}

pub fn write_valid_image(path: &Path) {
    RgbImage::from_pixel(20, 12, image::Rgb([90, 120, 200]))
        .save(path)
        .unwrap();
}

pub fn write_corrupt_image(path: &Path) {
    std::fs::write(path, b"this is not an image").unwrap();
}

pub fn mappings_json() -> String {
    r#"{
        "label2id": {"glioma": 0, "meningioma": 1, "notumor": 2},
        "id2label": {"0": "glioma", "1": "meningioma", "2": "notumor"}
    }"#
    .to_string()
}

/// Builds the whole fixture tree:
///
/// ```text
/// base/      config.json, preprocessor_config.json, model.safetensors
/// adapter/   adapter_config.json, adapter_model.safetensors, mappings.json
/// images/    glioma/{scan_a.png, scan_b.png}, notumor/{broken.jpg, scan_c.png}
/// ```
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();

    let base_dir = dir.path().join("base");
    std::fs::create_dir(&base_dir).unwrap();
    std::fs::write(
        base_dir.join("config.json"),
        format!(
            r#"{{"hidden_size": {HIDDEN}, "num_hidden_layers": {LAYERS},
                 "num_attention_heads": 2, "intermediate_size": {INTERMEDIATE},
                 "image_size": {IMAGE_SIZE}, "patch_size": {PATCH}}}"#
        ),
    )
    .unwrap();
    std::fs::write(
        base_dir.join("preprocessor_config.json"),
        format!(
            r#"{{"size": {IMAGE_SIZE},
                 "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5]}}"#
        ),
    )
    .unwrap();
    candle_core::safetensors::save(&base_tensors(), base_dir.join("model.safetensors")).unwrap();

    let adapter_dir = dir.path().join("adapter");
    std::fs::create_dir(&adapter_dir).unwrap();
    std::fs::write(
        adapter_dir.join("adapter_config.json"),
        r#"{"peft_type": "LORA", "r": 2, "lora_alpha": 4}"#,
    )
    .unwrap();
    candle_core::safetensors::save(
        &adapter_tensors(),
        adapter_dir.join("adapter_model.safetensors"),
    )
    .unwrap();
    std::fs::write(adapter_dir.join("mappings.json"), mappings_json()).unwrap();

    let images_root = dir.path().join("images");
    let glioma = images_root.join("glioma");
    std::fs::create_dir_all(&glioma).unwrap();
    write_valid_image(&glioma.join("scan_a.png"));
    write_valid_image(&glioma.join("scan_b.png"));
    let notumor = images_root.join("notumor");
    std::fs::create_dir_all(&notumor).unwrap();
    write_corrupt_image(&notumor.join("broken.jpg"));
    write_valid_image(&notumor.join("scan_c.png"));

    Fixture {
        _dir: dir,
        base_dir,
        adapter_dir,
        images_root,
    }
}
