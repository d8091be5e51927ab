//! On-disk ONNX sentence-embedding model.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams, TruncationStrategy};
use tracing::{debug, info};

use super::Embedder;
use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

/// Embedder backed by a local `model.onnx` + `tokenizer.json` directory.
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<OnnxModel>,
    model_name: String,
    batch_size: usize,
}

impl std::fmt::Debug for LocalEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbedder")
            .field("model", &self.model_name)
            .field("dimension", &self.model.dimension)
            .finish()
    }
}

impl LocalEmbedder {
    pub fn load(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let model_dir = config.model_path.as_deref().ok_or_else(|| {
            EmbeddingError::NotConfigured(
                "embedding.model_path is required for the local provider".into(),
            )
        })?;
        Self::load_dir(
            model_dir,
            config.dimension as usize,
            config.max_tokens as usize,
            config.batch_size as usize,
        )
    }

    pub fn load_dir(
        model_dir: &Path,
        dimension: usize,
        max_tokens: usize,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);

        if !model_path.exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| EmbeddingError::LoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| EmbeddingError::LoadError(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| EmbeddingError::LoadError(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| EmbeddingError::LoadError(e.to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbeddingError::TokenizerError(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::TokenizerError(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let model_name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| model_dir.display().to_string());
        info!(model = %model_name, dimension, "loaded local embedding model");

        Ok(Self {
            model: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
                dimension,
            }),
            model_name,
            batch_size: batch_size.max(1),
        })
    }
}

impl OnnxModel {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::TokenizerError(e.to_string()))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch_size = encodings.len();

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            for (j, (&id, &m)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .enumerate()
            {
                input_ids[i * max_len + j] = id as i64;
                attention_mask[i * max_len + j] = m as i64;
            }
        }

        let mask = attention_mask.clone();
        let ids_tensor = Tensor::from_array(([batch_size, max_len], input_ids))
            .map_err(|e: ort::Error| EmbeddingError::InferenceError(e.to_string()))?;
        let mask_tensor = Tensor::from_array(([batch_size, max_len], attention_mask))
            .map_err(|e: ort::Error| EmbeddingError::InferenceError(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbeddingError::InferenceError("session lock poisoned".to_string()))?;

        let outputs = if session.inputs.len() > 2 {
            let type_tensor = Tensor::from_array(([batch_size, max_len], token_type_ids))
                .map_err(|e: ort::Error| EmbeddingError::InferenceError(e.to_string()))?;
            session.run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
        } else {
            session.run(ort::inputs![ids_tensor, mask_tensor])
        }
        .map_err(|e: ort::Error| EmbeddingError::InferenceError(e.to_string()))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e: ort::Error| EmbeddingError::InferenceError(e.to_string()))?;
        let shape = output.shape().to_vec();

        let embeddings: Vec<Vec<f32>> = match shape.as_slice() {
            // token embeddings: mean-pool over the attention mask
            [_, seq, hidden] => (0..batch_size)
                .map(|i| {
                    let mut pooled = vec![0f32; self.dimension.min(*hidden)];
                    let mut count = 0f32;
                    for j in 0..*seq {
                        if mask[i * max_len + j] == 0 {
                            continue;
                        }
                        count += 1.0;
                        for (d, slot) in pooled.iter_mut().enumerate() {
                            *slot += output[[i, j, d]];
                        }
                    }
                    if count > 0.0 {
                        pooled.iter_mut().for_each(|v| *v /= count);
                    }
                    normalize(&pooled)
                })
                .collect(),
            [_, hidden] => (0..batch_size)
                .map(|i| {
                    let v: Vec<f32> = (0..self.dimension.min(*hidden))
                        .map(|d| output[[i, d]])
                        .collect();
                    normalize(&v)
                })
                .collect(),
            _ => {
                return Err(EmbeddingError::InferenceError(format!(
                    "unexpected output shape: {:?}",
                    shape
                )));
            }
        };

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "model produced {}-d vectors, configured dimension is {}",
                bad.len(),
                self.dimension
            )));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.model.dimension
    }

    fn provider_id(&self) -> String {
        format!("local:{}", self.model_name)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let model = Arc::clone(&self.model);
            let batch = batch.to_vec();
            let vectors = tokio::task::spawn_blocking(move || model.embed(&batch))
                .await
                .map_err(|e| EmbeddingError::InferenceError(format!("inference task failed: {}", e)))??;
            debug!(count = vectors.len(), "embedded batch locally");
            all.extend(vectors);
        }
        Ok(all)
    }
}

pub(crate) fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
