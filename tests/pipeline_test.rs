//! End-to-end assembly and classification against the synthetic fixture.

mod common;

use medvit::{Classifier, ClassifierError, LabelMappings, TOP_K};

use common::{fixture, HEAD_BIAS, LABELS};

fn build(fx: &common::Fixture) -> Classifier {
    let mappings = LabelMappings::from_file(fx.adapter_dir.join("mappings.json")).unwrap();
    Classifier::builder()
        .with_base_model_dir(&fx.base_dir)
        .unwrap()
        .with_adapter(&fx.adapter_dir)
        .with_mappings(mappings)
        .build()
        .unwrap()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[test]
fn classification_matches_the_head_bias() {
    let fx = fixture();
    let classifier = build(&fx);

    // Zero trunk weights make the logits equal the head bias, so the full
    // probability vector is known in closed form.
    let result = classifier
        .classify(&fx.images_root.join("glioma").join("scan_a.png"))
        .unwrap();
    let expected = softmax(&HEAD_BIAS);

    assert_eq!(result.predicted, "meningioma");
    assert_eq!(result.top_k.len(), TOP_K);
    assert_eq!(result.top_k[0].0, "meningioma");
    assert_eq!(result.top_k[1].0, "glioma");
    assert!((result.top_k[0].1 - expected[1]).abs() < 1e-5);
    assert!((result.top_k[1].1 - expected[0]).abs() < 1e-5);
}

#[test]
fn repeated_classification_is_deterministic() {
    let fx = fixture();
    let classifier = build(&fx);
    let image = fx.images_root.join("glioma").join("scan_a.png");

    let first = classifier.classify(&image).unwrap();
    let second = classifier.classify(&image).unwrap();
    assert_eq!(first, second);

    let first = medvit::format_result("glioma", &first);
    let second = medvit::format_result("glioma", &second);
    assert_eq!(first, second);
}

#[test]
fn corrupt_image_is_a_per_image_error() {
    let fx = fixture();
    let classifier = build(&fx);

    let err = classifier
        .classify(&fx.images_root.join("notumor").join("broken.jpg"))
        .unwrap_err();
    assert!(matches!(err, ClassifierError::ImageDecode { .. }));
    assert!(err.is_per_image());
}

#[test]
fn info_reflects_the_assembled_parts() {
    let fx = fixture();
    let info = build(&fx).info();
    assert_eq!(info.num_labels, LABELS.len());
    assert_eq!(info.labels, LABELS);
    assert_eq!(info.input_size, (16, 16));
    assert!(info.adapter_path.contains("adapter"));
}

#[test]
fn head_size_must_match_the_label_count() {
    let fx = fixture();
    // Four labels against a three-output head.
    let file = fx.adapter_dir.join("wide_mappings.json");
    std::fs::write(
        &file,
        r#"{"label2id": {"a": 0, "b": 1, "c": 2, "d": 3},
            "id2label": {"0": "a", "1": "b", "2": "c", "3": "d"}}"#,
    )
    .unwrap();
    let mappings = LabelMappings::from_file(&file).unwrap();

    let err = Classifier::builder()
        .with_base_model_dir(&fx.base_dir)
        .unwrap()
        .with_adapter(&fx.adapter_dir)
        .with_mappings(mappings)
        .build()
        .unwrap_err();
    assert!(matches!(err, ClassifierError::ModelLoad(_)));
}

#[test]
fn broken_mapping_artifact_fails_before_any_model_io() {
    let fx = fixture();
    let file = fx.adapter_dir.join("half_mappings.json");
    std::fs::write(&file, r#"{"label2id": {"glioma": 0}}"#).unwrap();

    let err = LabelMappings::from_file(&file).unwrap_err();
    assert!(matches!(err, ClassifierError::Configuration(_)));
}
