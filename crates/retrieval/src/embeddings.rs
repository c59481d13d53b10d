//! `EmbeddingBackend` implementations (spec §6.2)
//!
//! `OnnxEmbeddingBackend` wraps a local transformer model for deployments
//! that run one; `SimpleEmbeddingBackend` is a dependency-free fallback
//! used in tests and for `embedding.backend = local` when no model path is
//! configured. Both share the same mean-pooled, optionally-normalized
//! output shape, so callers never need to know which is wired up.

use std::path::Path;

use async_trait::async_trait;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use ragbridge_core::error::Result;
use ragbridge_core::traits::{EmbeddingBackend, EmbeddingKind};

use crate::error::RetrievalError;

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub max_seq_len: usize,
    pub dimension: usize,
    pub normalize: bool,
    pub batch_size: usize,
    pub output_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 512,
            dimension: 768,
            normalize: true,
            batch_size: 32,
            output_name: "last_hidden_state".to_string(),
        }
    }
}

/// Mean-pooled embedder over an ONNX sentence-encoder model.
pub struct OnnxEmbeddingBackend {
    #[cfg(feature = "onnx")]
    session: Session,
    #[cfg(feature = "onnx")]
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
}

impl OnnxEmbeddingBackend {
    #[cfg(feature = "onnx")]
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: EmbeddingConfig,
    ) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            config,
        })
    }

    #[cfg(not(feature = "onnx"))]
    pub fn new(
        _model_path: impl AsRef<Path>,
        _tokenizer_path: impl AsRef<Path>,
        _config: EmbeddingConfig,
    ) -> Result<Self> {
        Err(RetrievalError::Embedding(
            "onnx feature not enabled; rebuild with --features onnx".to_string(),
        )
        .into())
    }

    #[cfg(feature = "onnx")]
    fn embed_batch_internal(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let mut input_ids = vec![0i64; batch_size * self.config.max_seq_len];
        let mut attention_mask = vec![0i64; batch_size * self.config.max_seq_len];
        let mut token_type_ids = vec![0i64; batch_size * self.config.max_seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let len = ids.len().min(self.config.max_seq_len);
            let offset = i * self.config.max_seq_len;

            for j in 0..len {
                input_ids[offset + j] = ids[j] as i64;
                attention_mask[offset + j] = mask[j] as i64;
                token_type_ids[offset + j] = types[j] as i64;
            }
        }

        let input_ids = Array2::from_shape_vec((batch_size, self.config.max_seq_len), input_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let attention_mask =
            Array2::from_shape_vec((batch_size, self.config.max_seq_len), attention_mask)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let token_type_ids =
            Array2::from_shape_vec((batch_size, self.config.max_seq_len), token_type_ids)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let input_ids_tensor =
            Tensor::from_array(input_ids).map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array(attention_mask)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array(token_type_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let (shape, hidden_data) = outputs
            .get(&self.config.output_name)
            .ok_or_else(|| {
                RetrievalError::Embedding(format!("missing output tensor: {}", self.config.output_name))
            })?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let (tensor_batch, tensor_seq_len, tensor_hidden_dim) = if dims.len() == 3 {
            (dims[0], dims[1], dims[2])
        } else {
            return Err(RetrievalError::Embedding(format!("unexpected tensor shape: {:?}", dims)).into());
        };

        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size.min(tensor_batch) {
            let seq_len = encodings[i]
                .get_ids()
                .len()
                .min(self.config.max_seq_len)
                .min(tensor_seq_len);
            let mut embedding = vec![0.0f32; self.config.dimension];

            for j in 0..seq_len {
                for k in 0..self.config.dimension.min(tensor_hidden_dim) {
                    let idx = i * tensor_seq_len * tensor_hidden_dim + j * tensor_hidden_dim + k;
                    if idx < hidden_data.len() {
                        embedding[k] += hidden_data[idx];
                    }
                }
            }
            for v in &mut embedding {
                *v /= seq_len.max(1) as f32;
            }
            if self.config.normalize {
                normalize_in_place(&mut embedding);
            }
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingBackend {
    #[cfg(feature = "onnx")]
    async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let mut all = Vec::with_capacity(refs.len());
        for chunk in refs.chunks(self.config.batch_size) {
            all.extend(self.embed_batch_internal(chunk)?);
        }
        Ok(all)
    }

    #[cfg(not(feature = "onnx"))]
    async fn embed(&self, _texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
        Err(RetrievalError::Embedding("onnx feature not enabled".to_string()).into())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

fn normalize_in_place(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Deterministic hash-bag embedder with no model dependency. Used as the
/// default for tests and local development, and as the f2-only fallback
/// path the reranker falls back to when the cross-encoder is unavailable.
pub struct SimpleEmbeddingBackend {
    config: EmbeddingConfig,
}

impl SimpleEmbeddingBackend {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.config.dimension];
        for (i, c) in text.to_lowercase().chars().enumerate() {
            let idx = (c as usize + i) % self.config.dimension;
            embedding[idx] += 1.0;
        }
        if self.config.normalize {
            normalize_in_place(&mut embedding);
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingBackend for SimpleEmbeddingBackend {
    async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_backend_produces_configured_dimension() {
        let backend = SimpleEmbeddingBackend::new(EmbeddingConfig::default());
        let out = backend
            .embed(&["hello world".to_string()], EmbeddingKind::Query)
            .await
            .unwrap();
        assert_eq!(out[0].len(), 768);
    }

    #[tokio::test]
    async fn simple_backend_normalizes_output() {
        let backend = SimpleEmbeddingBackend::new(EmbeddingConfig::default());
        let out = backend
            .embed(&["a".to_string()], EmbeddingKind::Document)
            .await
            .unwrap();
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn simple_backend_is_deterministic() {
        let backend = SimpleEmbeddingBackend::new(EmbeddingConfig::default());
        let a = backend.embed(&["same text".to_string()], EmbeddingKind::Query).await.unwrap();
        let b = backend.embed(&["same text".to_string()], EmbeddingKind::Query).await.unwrap();
        assert_eq!(a, b);
    }
}
