//! Vision-transformer trunk and classification head.
//!
//! The layer structure and weight names mirror the checkpoint layout of the
//! pretrained base (`vit.embeddings.*`, `vit.encoder.layer.N.*`,
//! `vit.layernorm`, `classifier`), so a tensor map loaded straight from
//! `model.safetensors` resolves without renaming. Everything in this module
//! returns candle's `Result`; callers convert at the classifier boundary.

use std::path::Path;

use candle_core::{IndexOp, Result, Tensor};
use candle_nn::{
    conv2d, layer_norm, linear, Conv2d, Conv2dConfig, LayerNorm, Linear, Module, VarBuilder,
};
use serde::Deserialize;

use super::error::ClassifierError;

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_num_channels() -> usize {
    3
}

/// Architecture hyperparameters, read from the base model's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct VitConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub image_size: usize,
    pub patch_size: usize,
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl VitConfig {
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ClassifierError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "failed to read model config {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "malformed model config {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Number of patch tokens plus the class token.
    pub fn seq_len(&self) -> usize {
        (self.image_size / self.patch_size).pow(2) + 1
    }
}

#[derive(Debug)]
struct Embeddings {
    cls_token: Tensor,
    position_embeddings: Tensor,
    projection: Conv2d,
}

impl Embeddings {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let cls_token = vb.get((1, 1, cfg.hidden_size), "cls_token")?;
        let position_embeddings =
            vb.get((1, cfg.seq_len(), cfg.hidden_size), "position_embeddings")?;
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let projection = conv2d(
            cfg.num_channels,
            cfg.hidden_size,
            cfg.patch_size,
            conv_cfg,
            vb.pp("patch_embeddings").pp("projection"),
        )?;
        Ok(Self {
            cls_token,
            position_embeddings,
            projection,
        })
    }

    fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let (batch, _, _, _) = pixels.dims4()?;
        // (b, hidden, gh, gw) -> (b, patches, hidden)
        let patches = self
            .projection
            .forward(pixels)?
            .flatten_from(2)?
            .transpose(1, 2)?;
        let hidden = self.cls_token.dim(2)?;
        let cls = self.cls_token.expand((batch, 1, hidden))?;
        Tensor::cat(&[&cls, &patches], 1)?.broadcast_add(&self.position_embeddings)
    }
}

#[derive(Debug)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let inner = vb.pp("attention");
        Ok(Self {
            query: linear(h, h, inner.pp("query"))?,
            key: linear(h, h, inner.pp("key"))?,
            value: linear(h, h, inner.pp("value"))?,
            output: linear(h, h, vb.pp("output").pp("dense"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: h / cfg.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, n, _) = xs.dims3()?;
        xs.reshape((b, n, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, n, h) = xs.dims3()?;
        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scale = (self.head_dim as f64).powf(-0.5);
        let attn = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let context = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, h))?;
        self.output.forward(&context)
    }
}

#[derive(Debug)]
struct EncoderLayer {
    attention: Attention,
    intermediate: Linear,
    output: Linear,
    layernorm_before: LayerNorm,
    layernorm_after: LayerNorm,
}

impl EncoderLayer {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: Attention::load(cfg, vb.pp("attention"))?,
            intermediate: linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            output: linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            layernorm_before: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layernorm_before"),
            )?,
            layernorm_after: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layernorm_after"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // Pre-norm residual blocks, as in the original ViT.
        let attn = self.attention.forward(&self.layernorm_before.forward(xs)?)?;
        let xs = (xs + attn)?;
        let mlp = self
            .intermediate
            .forward(&self.layernorm_after.forward(&xs)?)?
            .gelu_erf()?;
        &xs + self.output.forward(&mlp)?
    }
}

/// ViT trunk plus a linear classification head sized to the domain's label
/// space. Holds only immutable weights; a forward pass never mutates state.
#[derive(Debug)]
pub struct VitClassifier {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    layernorm: LayerNorm,
    classifier: Linear,
}

impl VitClassifier {
    pub fn load(cfg: &VitConfig, num_labels: usize, vb: VarBuilder) -> Result<Self> {
        let trunk = vb.pp("vit");
        let embeddings = Embeddings::load(cfg, trunk.pp("embeddings"))?;
        let encoder = trunk.pp("encoder").pp("layer");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| EncoderLayer::load(cfg, encoder.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        let layernorm = layer_norm(cfg.hidden_size, cfg.layer_norm_eps, trunk.pp("layernorm"))?;
        let classifier = linear(cfg.hidden_size, num_labels, vb.pp("classifier"))?;
        Ok(Self {
            embeddings,
            layers,
            layernorm,
            classifier,
        })
    }

    /// Maps a `(batch, channels, height, width)` pixel tensor to per-class
    /// logits of shape `(batch, num_labels)`.
    pub fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let mut xs = self.embeddings.forward(pixels)?;
        for layer in &self.layers {
            xs = layer.forward(&xs)?;
        }
        let xs = self.layernorm.forward(&xs)?;
        // Classify from the class token.
        let cls = xs.i((.., 0))?;
        self.classifier.forward(&cls)
    }
}
