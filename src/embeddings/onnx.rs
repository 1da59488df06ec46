//! ONNX-backed [`Embedder`] behind the `onnx-embeddings` feature. Loads a
//! sentence-transformer-style model (`model.onnx` + `tokenizer.json` in the
//! same directory) and mean-pools `last_hidden_state` over the attention
//! mask, matching the pooling the teacher's own ONNX embedder performs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tokenizers::Tokenizer;

use super::Embedder;
use crate::error::{Error, Result};

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Arc<Tokenizer>,
    dimension: usize,
    max_length: usize,
}

impl OnnxEmbedder {
    /// `model_dir` must contain `model.onnx` and `tokenizer.json`.
    pub fn load(model_dir: &Path, dimension: usize) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::backend(format!("failed to load tokenizer: {e}")))?;

        let num_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let session = Session::builder()
            .map_err(|e| Error::backend(format!("onnx session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::backend(format!("onnx optimization level: {e}")))?
            .with_intra_threads(num_threads)
            .map_err(|e| Error::backend(format!("onnx intra threads: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::backend(format!("failed to load model {}: {e}", model_path.display())))?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Arc::new(tokenizer),
            dimension,
            max_length: 512,
        })
    }

    fn run_one(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::backend(format!("tokenization failed: {e}")))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mut mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        ids.truncate(self.max_length);
        mask.truncate(self.max_length);
        let seq_len = ids.len();

        let shape = vec![1usize, seq_len];
        let input_ids = Value::from_array((shape.clone(), ids))
            .map_err(|e| Error::backend(format!("input_ids tensor: {e}")))?;
        let attention_mask = Value::from_array((shape, mask.clone()))
            .map_err(|e| Error::backend(format!("attention_mask tensor: {e}")))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs!["input_ids" => input_ids, "attention_mask" => attention_mask])
            .map_err(|e| Error::backend(format!("onnx inference failed: {e}")))?;

        let output_name = outputs
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "sentence_embedding")
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| Error::backend("model produced no recognizable output tensor"))?;

        let (shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::backend(format!("failed to extract output tensor: {e}")))?;

        let embedding = if shape.len() == 2 {
            data.to_vec()
        } else {
            let hidden_dim = shape[2] as usize;
            let mut pooled = vec![0f32; hidden_dim];
            let mut mask_sum = 0f32;
            for (pos, &m) in mask.iter().enumerate() {
                if m == 0 {
                    continue;
                }
                mask_sum += 1.0;
                let offset = pos * hidden_dim;
                for dim in 0..hidden_dim {
                    pooled[dim] += data[offset + dim];
                }
            }
            if mask_sum > 0.0 {
                for v in &mut pooled {
                    *v /= mask_sum;
                }
            }
            pooled
        };

        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-12 {
            Ok(embedding.into_iter().map(|v| v / norm).collect())
        } else {
            Ok(embedding)
        }
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run_one(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn default_model_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("hybrid-doc-search").join("model"))
}
