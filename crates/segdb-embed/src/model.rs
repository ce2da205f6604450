use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use segdb_core::config::{expand_path, EmbeddingSettings};
use segdb_core::traits::Embedder;
use segdb_core::{Error, Result};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

/// BGE-M3 dense embeddings on candle's XLM-RoBERTa, mean pooled and L2 normalised.
pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    id: String,
    dim: usize,
    max_len: usize,
}

impl BgeM3Embedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        Self::load(settings).map_err(|e| Error::Embedding(format!("{e:#}")))
    }

    fn load(settings: &EmbeddingSettings) -> anyhow::Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
        info!(dir = %model_dir.display(), "loading BGE-M3");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let raw = std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw)?;
        let dim = config.hidden_size;
        if dim != settings.dim {
            anyhow::bail!("configured embedding dim {} does not match model hidden size {}", settings.dim, dim);
        }

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights: HashMap<String, Tensor> = candle_core::pickle::read_all(&weights_path)
            .with_context(|| format!("reading {}", weights_path.display()))?
            .into_iter()
            .collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(dim, max_len = settings.max_len, "BGE-M3 ready");

        Ok(Self { model, tokenizer, device, id: format!("bge-m3:d{dim}"), dim, max_len: settings.max_len })
    }

    fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let v: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if v.len() != self.dim {
            anyhow::bail!("model produced {} values, expected {}", v.len(), self.dim);
        }
        let ms = start.elapsed().as_millis();
        if ms > 100 {
            warn!(ms, "slow embedding");
        }
        Ok(v)
    }
}

impl Embedder for BgeM3Embedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(batch = texts.len(), "embedding batch");
        texts.iter().map(|t| self.embed_one(t).map_err(|e| Error::Embedding(format!("{e:#}")))).collect()
    }
}

fn resolve_model_dir(configured: Option<&str>) -> anyhow::Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(["APP_MODEL_DIR", "MODEL_DIR"].iter().filter_map(|var| std::env::var(var).ok().map(PathBuf::from)))
        .chain([Path::new("../models/bge-m3").to_path_buf(), Path::new("models/bge-m3").to_path_buf()]);
    for dir in candidates {
        if dir.exists() {
            return Ok(dir);
        }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
