use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};

pub const DEFAULT_MODEL_DIR: &str = "models/all-MiniLM-L6-v2";
const EMBED_BATCH_SIZE: usize = 32;

/// Maps texts to fixed-length vectors, one per input and in input order.
/// Implementations must be deterministic for identical text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Sentence-transformer embeddings computed locally with ONNX Runtime.
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    model_dir: PathBuf,
}

fn read_model_file(dir: &Path, name: &str) -> Result<Vec<u8>> {
    std::fs::read(dir.join(name)).map_err(|e| anyhow::anyhow!("Failed to read {}: {}", name, e))
}

impl FastEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>) -> Result<Self> {
        let model_dir = model_dir.into();
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read_model_file(&model_dir, "model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read_model_file(&model_dir, "tokenizer.json")?,
                config_file: read_model_file(&model_dir, "config.json")?,
                special_tokens_map_file: read_model_file(&model_dir, "special_tokens_map.json")?,
                tokenizer_config_file: read_model_file(&model_dir, "tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        tracing::info!("Embedding model initialized successfully");
        Ok(Self {
            model: Arc::new(model),
            model_dir,
        })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Embedding {} texts", texts.len());
        // ONNX inference is CPU-bound; keep it off the async workers
        let model = Arc::clone(&self.model);
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, Some(EMBED_BATCH_SIZE)))
            .await
            .map_err(|e| anyhow::anyhow!("Embedding task failed: {}", e))??;
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_dir_is_an_error() {
        let err = FastEmbedder::new("/nonexistent/embedding-model").err().unwrap();
        assert!(err.to_string().contains("Model directory not found"));
    }
}
