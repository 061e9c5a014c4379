//! Embedder adapter: batching, truncation, retry/backoff, pacing, and an
//! optional content-hash cache over an external embedding RPC.
//!
//! The core never implements an embedding model itself — `Embed` is a
//! narrow trait any provider (a local ONNX runtime, a hosted API) can
//! satisfy. `EmbeddingAdapter` is the only thing the rest of the crate
//! depends on.

use crate::config::{CacheConfig, EmbedderConfig};
use crate::errors::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const COMPONENT: &str = "embedder_adapter";

/// The external embedding collaborator. Implementations call out to
/// whatever model or service actually produces vectors; they should not
/// retry or truncate themselves — the adapter owns that policy.
#[async_trait]
pub trait Embed: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: u64,
}

/// Wraps an `Embed` provider with truncation, retry/backoff, rate-limit
/// pacing, and an optional SHA-256-keyed cache.
pub struct EmbeddingAdapter {
    inner: Arc<dyn Embed>,
    config: EmbedderConfig,
    cache: DashMap<String, CacheEntry>,
    last_call: Mutex<Instant>,
}

impl EmbeddingAdapter {
    pub fn new(inner: Arc<dyn Embed>, config: EmbedderConfig) -> Self {
        Self {
            inner,
            config,
            cache: DashMap::new(),
            last_call: Mutex::new(Instant::now() - Duration::from_secs(3600)),
        }
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn truncate(&self, text: &str) -> String {
        let original_chars = text.chars().count();
        if original_chars <= self.config.max_chars {
            text.to_string()
        } else {
            tracing::info!(
                component = COMPONENT,
                stage = "embed",
                event = "truncated",
                original_chars,
                truncated_chars = self.config.max_chars,
                "truncated text before embedding"
            );
            text.chars().take(self.config.max_chars).collect()
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn cache_get(&self, key: &str, cache_config: &CacheConfig) -> Option<Vec<f32>> {
        if !cache_config.enabled {
            return None;
        }
        let entry = self.cache.get(key)?;
        if Self::now_secs().saturating_sub(entry.inserted_at) > cache_config.ttl_seconds {
            drop(entry);
            self.cache.remove(key);
            return None;
        }
        Some(entry.vector.clone())
    }

    fn cache_put(&self, key: String, vector: Vec<f32>, cache_config: &CacheConfig) {
        if !cache_config.enabled {
            return;
        }
        if self.cache.len() >= cache_config.max_entries {
            // Reference cache eviction: drop an arbitrary entry rather than
            // tracking LRU order, acceptable for a content-addressed cache
            // with a long TTL.
            if let Some(evict_key) = self.cache.iter().next().map(|e| e.key().clone()) {
                self.cache.remove(&evict_key);
            }
        }
        self.cache.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: Self::now_secs(),
            },
        );
    }

    async fn pace(&self) {
        let interval = Duration::from_millis(self.config.rate_limit_interval_ms);
        if interval.is_zero() {
            return;
        }
        let mut last_call = self.last_call.lock().await;
        let elapsed = last_call.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        }
        *last_call = Instant::now();
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.pace().await;
            match self.inner.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(err) if attempt < retry.max_attempts && err.is_recoverable() => {
                    let delay = Duration::from_secs_f64(
                        retry.base_delay_seconds as f64 * retry.exponent.powi(attempt as i32 - 1),
                    );
                    tracing::warn!(
                        component = COMPONENT,
                        stage = "embed",
                        event = "retry",
                        attempt,
                        ?delay,
                        error = %err,
                        "retrying embedding call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Embeds one text, applying truncation and the cache before calling
    /// through to the retrying embedder.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let truncated = self.truncate(text);
        let key = Self::cache_key(&truncated);

        if let Some(cached) = self.cache_get(&key, &self.config.cache) {
            return Ok(cached);
        }

        let vector = self.embed_with_retry(&truncated).await?;
        if vector.len() != self.config.dimension {
            return Err(CoreError::EmbeddingDimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        self.cache_put(key, vector.clone(), &self.config.cache);
        Ok(vector)
    }

    /// Embeds many texts, preserving order, stopping at the first
    /// unrecoverable failure.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }
}

/// Lightweight call counter used by tests and health probes that need to
/// observe how many times an inner provider was actually invoked.
#[derive(Default)]
pub struct CallCounter(AtomicU64);

impl CallCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::sync::atomic::AtomicBool;

    struct FlakyEmbedder {
        dimension: usize,
        calls: CallCounter,
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl Embed for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.increment();
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(CoreError::EmbeddingError {
                    reason: "provider hiccup".into(),
                    transient: true,
                });
            }
            Ok(vec![0.1; self.dimension])
        }
    }

    fn test_config() -> EmbedderConfig {
        EmbedderConfig {
            max_chars: 20,
            dimension: 4,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_seconds: 0,
                exponent: 1.0,
            },
            rate_limit_interval_ms: 0,
            cache: CacheConfig {
                enabled: true,
                max_entries: 10,
                ttl_seconds: 3600,
            },
            endpoint_url: "https://example.invalid/embed".to_string(),
            api_key_env: "LEGAL_RAG_TEST_EMBEDDER_KEY".to_string(),
        }
    }

    #[tokio::test]
    async fn truncates_text_before_embedding() {
        let provider = Arc::new(FlakyEmbedder {
            dimension: 4,
            calls: CallCounter::default(),
            fail_first: AtomicBool::new(false),
        });
        let adapter = EmbeddingAdapter::new(provider, test_config());
        let long_text = "a".repeat(1000);
        let vector = adapter.embed_text(&long_text).await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[tokio::test]
    async fn retries_transient_failures_and_succeeds() {
        let provider = Arc::new(FlakyEmbedder {
            dimension: 4,
            calls: CallCounter::default(),
            fail_first: AtomicBool::new(true),
        });
        let adapter = EmbeddingAdapter::new(provider.clone(), test_config());
        let vector = adapter.embed_text("gastos deducibles").await.unwrap();
        assert_eq!(vector.len(), 4);
        assert_eq!(provider.calls.get(), 2);
    }

    #[tokio::test]
    async fn repeated_text_hits_the_cache_without_a_second_call() {
        let provider = Arc::new(FlakyEmbedder {
            dimension: 4,
            calls: CallCounter::default(),
            fail_first: AtomicBool::new(false),
        });
        let adapter = EmbeddingAdapter::new(provider.clone(), test_config());
        adapter.embed_text("mismo texto").await.unwrap();
        adapter.embed_text("mismo texto").await.unwrap();
        assert_eq!(provider.calls.get(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let provider = Arc::new(FlakyEmbedder {
            dimension: 99,
            calls: CallCounter::default(),
            fail_first: AtomicBool::new(false),
        });
        let adapter = EmbeddingAdapter::new(provider, test_config());
        let err = adapter.embed_text("texto").await.unwrap_err();
        assert!(matches!(err, CoreError::EmbeddingDimensionMismatch { .. }));
    }
}
