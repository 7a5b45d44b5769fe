/// Files that make up a base-model checkpoint.
pub const CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_FILE: &str = "preprocessor_config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Built-in base models shared across all domains.
///
/// One base is reused by every domain; only the adapter and mapping artifact
/// change per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseModel {
    /// ViT-Base/16 pretrained on ImageNet-21k, without a fine-tuned head.
    VitBase224In21k,
}

/// Static identity of a base model: where it lives upstream and how it is
/// named in the local cache.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    /// Directory name in the local model cache.
    pub name: &'static str,
    /// Upstream repository the files are fetched from.
    pub repo_id: &'static str,
    /// Files required for assembly.
    pub files: &'static [&'static str],
    /// Native input resolution, for operator-facing reporting.
    pub image_size: usize,
}

impl BaseModel {
    pub fn info(&self) -> ModelInfo {
        match self {
            Self::VitBase224In21k => ModelInfo {
                name: "vit-base-patch16-224-in21k",
                repo_id: "google/vit-base-patch16-224-in21k",
                files: &[CONFIG_FILE, PREPROCESSOR_FILE, WEIGHTS_FILE],
                image_size: 224,
            },
        }
    }
}
