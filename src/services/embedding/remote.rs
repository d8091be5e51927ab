//! OpenAI-compatible embedding endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Embedder;
use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;
use crate::utils::{RetryConfig, RetryResult, Retryable, with_retry};

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedder backed by a remote `POST {url}/embeddings` API.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
    retry: RetryConfig,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension as usize,
            batch_size: config.batch_size.max(1) as usize,
            retry: RetryConfig::new(config.retry_attempts),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else if e.is_connect() {
                EmbeddingError::ConnectionError(e.to_string())
            } else {
                EmbeddingError::RequestError(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "endpoint returned {}-d vectors, configured dimension is {}",
                bad.len(),
                self.dimension
            )));
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_id(&self) -> String {
        format!("remote:{}", self.model)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match with_retry(&self.retry, || self.embed_single_batch(batch)).await {
                RetryResult::Success(vectors) => {
                    debug!(count = vectors.len(), "embedded batch remotely");
                    all.extend(vectors);
                }
                RetryResult::Failed {
                    last_error,
                    attempts,
                } => {
                    if !last_error.is_retryable() {
                        return Err(last_error);
                    }
                    warn!(attempts, error = %last_error, "embedding endpoint unavailable");
                    return Err(EmbeddingError::Unavailable {
                        attempts,
                        last_error: last_error.to_string(),
                    });
                }
            }
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, dimension: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            url: url.to_string(),
            api_key: Some("test-key".to_string()),
            dimension,
            retry_attempts: 2,
            ..Default::default()
        }
    }

    fn fast(embedder: RemoteEmbedder) -> RemoteEmbedder {
        embedder.with_retry_config(RetryConfig::new(2).with_initial_delay(Duration::from_millis(5)))
    }

    #[test]
    fn test_base_url_trimming() {
        let embedder = RemoteEmbedder::new(&config("http://localhost:9999/v1/", 3)).unwrap();
        assert_eq!(embedder.base_url(), "http://localhost:9999/v1");
        assert_eq!(embedder.provider_id(), "remote:text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_embeddings_reordered_by_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[
                    {"embedding":[0.0,1.0,0.0],"index":1},
                    {"embedding":[1.0,0.0,0.0],"index":0}
                ]}"#,
            )
            .create_async()
            .await;

        let embedder = RemoteEmbedder::new(&config(&server.url(), 3)).unwrap();
        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[{"embedding":[1.0,0.0],"index":0}]}"#)
            .create_async()
            .await;

        let embedder = RemoteEmbedder::new(&config(&server.url(), 3)).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_transient_failures_become_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(503)
            .with_body("overloaded")
            .expect(2)
            .create_async()
            .await;

        let embedder = fast(RemoteEmbedder::new(&config(&server.url(), 3)).unwrap());
        let err = embedder.embed("hello").await.unwrap_err();

        match err {
            EmbeddingError::Unavailable { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(400)
            .with_body("bad input")
            .expect(1)
            .create_async()
            .await;

        let embedder = fast(RemoteEmbedder::new(&config(&server.url(), 3)).unwrap());
        let err = embedder.embed("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::ServerError(_)));
        mock.assert_async().await;
    }
}
