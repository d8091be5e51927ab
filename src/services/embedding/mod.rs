//! Embedding providers: one capability trait, a closed set of variants.

mod local;
mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingProviderKind};

/// Identifies the vector space an index was built in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSignature {
    pub provider: String,
    pub dimension: usize,
}

impl std::fmt::Display for ProviderSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}-d)", self.provider, self.dimension)
    }
}

/// Produces fixed-length vectors from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn provider_id(&self) -> String;

    /// Embed many texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    fn signature(&self) -> ProviderSignature {
        ProviderSignature {
            provider: self.provider_id(),
            dimension: self.dimension(),
        }
    }
}

/// The configured embedding provider.
#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Local(LocalEmbedder),
    Remote(RemoteEmbedder),
}

impl EmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        match config.provider {
            EmbeddingProviderKind::Local => Ok(Self::Local(LocalEmbedder::load(config)?)),
            EmbeddingProviderKind::Remote => {
                if config.api_key.is_none() {
                    return Err(EmbeddingError::NotConfigured(
                        "remote embeddings need an API key (DOCSEEK_EMBEDDING_API_KEY)".to_string(),
                    ));
                }
                Ok(Self::Remote(RemoteEmbedder::new(config)?))
            }
        }
    }

    pub fn kind(&self) -> EmbeddingProviderKind {
        match self {
            Self::Local(_) => EmbeddingProviderKind::Local,
            Self::Remote(_) => EmbeddingProviderKind::Remote,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn dimension(&self) -> usize {
        match self {
            Self::Local(e) => e.dimension(),
            Self::Remote(e) => e.dimension(),
        }
    }

    fn provider_id(&self) -> String {
        match self {
            Self::Local(e) => e.provider_id(),
            Self::Remote(e) => e.provider_id(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Self::Local(e) => e.embed_batch(texts).await,
            Self::Remote(e) => e.embed_batch(texts).await,
        }
    }
}
