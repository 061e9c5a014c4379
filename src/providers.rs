//! Concrete HTTP-backed implementations of the `Embed` and `Generate`
//! collaborator traits (spec §1, §6: "the core consumes them through two
//! narrow interfaces"). These adapters are intentionally thin — all
//! retry/truncation/caching/pacing policy lives in `embedder.rs`, and all
//! prompt assembly lives in `rag.rs`; this module only knows how to turn
//! one HTTP call into a `Vec<f32>` or a `String`.
//!
//! A deployment that already has an embeddings/LLM provider can swap these
//! out for its own `Embed`/`Generate` implementation without touching
//! anything else in the crate.

use crate::config::{EmbedderConfig, GeneratorConfig};
use crate::embedder::Embed;
use crate::errors::{CoreError, Result};
use crate::generator::Generate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Calls a generic embeddings endpoint that accepts `{"input": "..."}` and
/// returns `{"embedding": [..]}`, the shape most hosted embedding APIs use.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbedderConfig) -> Self {
        Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        }
    }
}

#[async_trait]
impl Embed for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.endpoint_url).json(&EmbedRequest { input: text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| CoreError::EmbeddingError {
            reason: e.to_string(),
            transient: e.is_timeout() || e.is_connect(),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CoreError::EmbeddingError {
                reason: format!("HTTP {status}"),
                transient: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let body: EmbedResponse = response.json().await.map_err(|e| CoreError::EmbeddingError {
            reason: format!("malformed embedding response: {e}"),
            transient: false,
        })?;

        Ok(body.embedding)
    }
}

/// Calls a generic chat-completion endpoint that accepts
/// `{"model": "...", "messages": [{"role": "user", "content": "..."}]}`
/// and returns `{"choices": [{"message": {"content": "..."}}]}`, the
/// OpenAI-compatible shape most hosted completion APIs accept.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint_url: String,
    model: String,
    timeout: std::time::Duration,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl HttpGenerator {
    pub fn new(client: reqwest::Client, config: &GeneratorConfig) -> Self {
        Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            model: config.model.clone(),
            timeout: std::time::Duration::from_millis(config.timeout_ms),
            api_key: std::env::var(&config.api_key_env).ok(),
        }
    }
}

#[async_trait]
impl Generate for HttpGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.endpoint_url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::GenerationError { reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(CoreError::GenerationError {
                reason: format!("HTTP {}", response.status()),
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::GenerationError {
                reason: format!("malformed completion response: {e}"),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::GenerationError {
                reason: "completion response had no choices".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder_config(endpoint_url: String) -> EmbedderConfig {
        EmbedderConfig {
            max_chars: 8_000,
            dimension: 3,
            retry: crate::config::RetryConfig {
                max_attempts: 1,
                base_delay_seconds: 0,
                exponent: 1.0,
            },
            rate_limit_interval_ms: 0,
            cache: crate::config::CacheConfig {
                enabled: false,
                max_entries: 0,
                ttl_seconds: 0,
            },
            endpoint_url,
            api_key_env: "LEGAL_RAG_TEST_EMBEDDER_KEY".to_string(),
        }
    }

    #[tokio::test]
    async fn http_embedder_parses_embedding_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2, 0.3]
            })))
            .mount(&server)
            .await;

        let config = embedder_config(format!("{}/embed", server.uri()));
        let embedder = HttpEmbedder::new(reqwest::Client::new(), &config);
        let vector = embedder.embed("gastos deducibles").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn http_embedder_maps_server_error_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = embedder_config(format!("{}/embed", server.uri()));
        let embedder = HttpEmbedder::new(reqwest::Client::new(), &config);
        let err = embedder.embed("texto").await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn http_generator_extracts_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Resumen: ..."}}]
            })))
            .mount(&server)
            .await;

        let config = GeneratorConfig {
            model: "test-model".to_string(),
            timeout_ms: 5_000,
            retry: crate::config::RetryConfig {
                max_attempts: 1,
                base_delay_seconds: 0,
                exponent: 1.0,
            },
            endpoint_url: format!("{}/complete", server.uri()),
            api_key_env: "LEGAL_RAG_TEST_GENERATOR_KEY".to_string(),
        };

        let generator = HttpGenerator::new(reqwest::Client::new(), &config);
        let answer = generator.complete("¿Puedo deducir gastos?").await.unwrap();
        assert_eq!(answer, "Resumen: ...");
    }
}
