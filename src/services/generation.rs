//! Text generation providers used for answer synthesis and benchmarking.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GenerationError;
use crate::models::{
    DEFAULT_REMOTE_GENERATION_MODEL, GenerationConfig, GenerationProviderKind, LocalModel,
};
use crate::utils::{RetryConfig, with_retry};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.3,
            stop: Vec::new(),
        }
    }
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stop(mut self, stop: &[&str]) -> Self {
        self.stop = stop.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Tokens generated, when the backend reports it
    pub tokens: Option<u32>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> String;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError>;
}

fn build_client(timeout_secs: u64) -> Result<Client, GenerationError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GenerationError::ConnectionError(e.to_string()))
}

fn map_send_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else if e.is_connect() {
        GenerationError::ConnectionError(e.to_string())
    } else {
        GenerationError::RequestError(e)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::ServerError(format!(
        "status {}: {}",
        status, body
    )))
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_predicted: Option<u32>,
}

/// llama.cpp-server compatible `POST {url}/completion` backend.
#[derive(Debug, Clone)]
pub struct LocalGenerator {
    client: Client,
    base_url: String,
    model: Option<String>,
    retry: RetryConfig,
}

impl LocalGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retry: RetryConfig::new(config.retry_attempts),
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError> {
        let request = CompletionRequest {
            prompt,
            n_predict: options.max_tokens,
            temperature: options.temperature,
            stop: &options.stop,
            model: self.model.as_deref(),
        };
        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;
        let parsed: CompletionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        Ok(Generation {
            text: parsed.content.trim().to_string(),
            tokens: parsed.tokens_predicted,
        })
    }
}

#[async_trait]
impl Generator for LocalGenerator {
    fn name(&self) -> String {
        match &self.model {
            Some(model) => format!("local:{}", model),
            None => format!("local:{}", self.base_url),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError> {
        with_retry(&self.retry, || self.complete(prompt, options))
            .await
            .into_result()
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    completion_tokens: u32,
}

/// OpenAI-compatible `POST {url}/chat/completions` backend.
#[derive(Debug, Clone)]
pub struct RemoteGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    retry: RetryConfig,
}

impl RemoteGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            GenerationError::NotConfigured(
                "remote generation needs an API key (DOCSEEK_GENERATION_API_KEY)".to_string(),
            )
        })?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_GENERATION_MODEL.to_string()),
            api_key,
            retry: RetryConfig::new(config.retry_attempts),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn chat(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: &options.stop,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;
        let parsed: ChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("no completion choices".to_string()))?;

        Ok(Generation {
            text: text.trim().to_string(),
            tokens: parsed.usage.map(|u| u.completion_tokens),
        })
    }
}

#[async_trait]
impl Generator for RemoteGenerator {
    fn name(&self) -> String {
        format!("remote:{}", self.model)
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError> {
        with_retry(&self.retry, || self.chat(prompt, options))
            .await
            .into_result()
    }
}

/// The configured generation provider.
#[derive(Debug, Clone)]
pub enum GenerationProvider {
    Local(LocalGenerator),
    Remote(RemoteGenerator),
}

impl GenerationProvider {
    /// Build the configured provider; `Ok(None)` when generation is disabled.
    pub fn from_config(config: &GenerationConfig) -> Result<Option<Self>, GenerationError> {
        match config.provider {
            GenerationProviderKind::None => Ok(None),
            GenerationProviderKind::Local => Ok(Some(Self::Local(LocalGenerator::new(config)?))),
            GenerationProviderKind::Remote => {
                Ok(Some(Self::Remote(RemoteGenerator::new(config)?)))
            }
        }
    }
}

#[async_trait]
impl Generator for GenerationProvider {
    fn name(&self) -> String {
        match self {
            Self::Local(g) => g.name(),
            Self::Remote(g) => g.name(),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, GenerationError> {
        match self {
            Self::Local(g) => g.generate(prompt, options).await,
            Self::Remote(g) => g.generate(prompt, options).await,
        }
    }
}

/// Loads a local model file into something that can generate.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn load(&self, model: &LocalModel) -> Result<Box<dyn Generator>, GenerationError>;
}

/// Runs models through a local completion server that selects the model by
/// path. Loading issues a one-token warm-up request so the model is resident.
#[derive(Debug, Clone)]
pub struct ServerModelRunner {
    config: GenerationConfig,
}

impl ServerModelRunner {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl ModelRunner for ServerModelRunner {
    async fn load(&self, model: &LocalModel) -> Result<Box<dyn Generator>, GenerationError> {
        let generator = LocalGenerator::new(&self.config)?
            .with_model(model.path.display().to_string())
            .with_retry_config(RetryConfig::new(1));

        let warmup = GenerationOptions {
            max_tokens: 1,
            temperature: 0.0,
            stop: Vec::new(),
        };
        generator
            .generate("Hello", &warmup)
            .await
            .map_err(|e| GenerationError::LoadError(format!("{}: {}", model.filename, e)))?;

        info!(model = %model.id, "model loaded");
        debug!(path = %model.path.display(), "warm-up request succeeded");
        Ok(Box::new(generator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local_config(url: &str) -> GenerationConfig {
        GenerationConfig {
            provider: GenerationProviderKind::Local,
            url: url.to_string(),
            retry_attempts: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_provider_is_none() {
        let config = GenerationConfig::default();
        assert!(GenerationProvider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_remote_requires_key() {
        let config = GenerationConfig {
            provider: GenerationProviderKind::Remote,
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            GenerationProvider::from_config(&config),
            Err(GenerationError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_local_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/completion")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"n_predict":256,"stop":["Question:"]}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"content":"  Paris.  ","tokens_predicted":2}"#)
            .create_async()
            .await;

        let generator = LocalGenerator::new(&local_config(&server.url())).unwrap();
        let options = GenerationOptions::default().with_stop(&["Question:"]);
        let out = generator.generate("capital?", &options).await.unwrap();

        assert_eq!(out.text, "Paris.");
        assert_eq!(out.tokens, Some(2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"An answer"}}],
                    "usage":{"prompt_tokens":10,"completion_tokens":3}}"#,
            )
            .create_async()
            .await;

        let config = GenerationConfig {
            provider: GenerationProviderKind::Remote,
            url: server.url(),
            api_key: Some("secret".to_string()),
            retry_attempts: 1,
            ..Default::default()
        };
        let generator = RemoteGenerator::new(&config).unwrap();
        let out = generator
            .generate("q", &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(out.text, "An answer");
        assert_eq!(out.tokens, Some(3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_runner_reports_load_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/completion")
            .with_status(500)
            .with_body("failed to load model")
            .create_async()
            .await;

        let runner = ServerModelRunner::new(&local_config(&server.url()));
        let model = LocalModel {
            id: "broken".to_string(),
            name: "broken".to_string(),
            filename: "broken.gguf".to_string(),
            path: PathBuf::from("/models/broken.gguf"),
            size_bytes: 4,
        };
        let err = runner.load(&model).await.err().unwrap();
        assert!(matches!(err, GenerationError::LoadError(_)));
    }
}
