//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration management for the legal RAG core, supporting
//! multiple sources (files, environment variables) with validation and
//! type-safe access to all system settings.
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust
//! use legal_rag_core::config::Config;
//!
//! let config = Config::from_file("config.toml").unwrap();
//! println!("Server port: {}", config.server.port);
//! ```

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server and API configuration
    pub server: ServerConfig,
    /// Per-source connector settings (politeness, identification)
    pub connectors: ConnectorConfig,
    /// Embedder adapter configuration
    pub embedder: EmbedderConfig,
    /// Generator (LLM) configuration
    pub generator: GeneratorConfig,
    /// Ingestion orchestrator settings
    pub ingestion: IngestionConfig,
    /// Chunk store configuration
    pub store: StoreConfig,
    /// Search engine behaviour (RRF, authority table, bucket limits)
    pub search: SearchEngineConfig,
    /// Logging and monitoring
    pub logging: LoggingConfig,
    /// Performance tuning
    pub performance: PerformanceConfig,
}

/// Server and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_payload_size_mb: u32,
    pub request_timeout_seconds: u64,
    pub enable_cors: bool,
    /// Per-request deadline propagated through the RAG orchestrator (spec §5).
    pub query_deadline_ms: u64,
}

/// Per-host connector politeness and identification settings (spec §4.2, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// User-Agent identifying the crawler, required by every connector.
    pub user_agent: String,
    /// Contact address included alongside the User-Agent.
    pub contact_address: String,
    /// Minimum inter-request delay per host, in milliseconds (spec §5 default 500ms).
    pub min_interval_ms: u64,
    pub boe: SourceEndpointConfig,
    pub eurlex: SourceEndpointConfig,
    pub dgt: SourceEndpointConfig,
}

/// Per-source endpoint/rate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEndpointConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
}

/// Embedder adapter configuration (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Maximum character budget per text before truncation (reference: ~8000).
    pub max_chars: usize,
    /// Canonical embedding dimension D (spec §3 invariant 1).
    pub dimension: usize,
    pub retry: RetryConfig,
    /// Minimum pacing between embedding RPCs, in milliseconds.
    pub rate_limit_interval_ms: u64,
    pub cache: CacheConfig,
    /// HTTP endpoint of the external embedding RPC (spec §1: consumed
    /// through a narrow interface, the core does not own the model).
    pub endpoint_url: String,
    /// Environment variable name holding the embedding provider's API key;
    /// never stored in config itself (spec §1 out-of-scope secret management).
    pub api_key_env: String,
}

/// Generator (LLM) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub model: String,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    /// HTTP endpoint of the external completion RPC.
    pub endpoint_url: String,
    pub api_key_env: String,
}

/// Retry/backoff policy, pushed into configuration per spec §9
/// ("Retry/backoff as first-class policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    pub exponent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_seconds: 60,
            exponent: 2.0,
        }
    }
}

/// Ingestion orchestrator configuration (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Maximum concurrently `ingesting` sources.
    pub max_concurrent_sources: usize,
    pub retry: RetryConfig,
    /// Heartbeat after which a stale `ingesting` lock is reclaimable (spec §8, minutes).
    pub heartbeat_minutes: u64,
}

/// Chunk store configuration (spec §4.1, §9 open question on vector-index params).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub enable_compression: bool,
    /// Spanish stemmer/stopword language tag (currently fixed to "es").
    pub lexical_language: String,
}

/// Search engine configuration: RRF parameters, authority multipliers,
/// hierarchical bucket limits (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEngineConfig {
    /// RRF constant κ (default 60).
    pub rrf_kappa: f32,
    /// Dense-result weight in RRF fusion (default 0.6).
    pub vector_weight: f32,
    /// Lexical-result weight in RRF fusion (default 0.4).
    pub lexical_weight: f32,
    /// Candidate pool size multiplier applied to `k` before fusion (spec step 2/3: `2k`).
    pub candidate_multiplier: usize,
    pub bucket_limits: BucketLimits,
    pub min_query_length: usize,
    pub max_query_length: usize,
}

impl Default for SearchEngineConfig {
    fn default() -> Self {
        Self {
            rrf_kappa: 60.0,
            vector_weight: 0.6,
            lexical_weight: 0.4,
            candidate_multiplier: 2,
            bucket_limits: BucketLimits::default(),
            min_query_length: 10,
            max_query_length: 500,
        }
    }
}

/// Hierarchical retrieval bucket sizes (spec §4.6 defaults 5/3/2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketLimits {
    pub normativa: usize,
    pub doctrina: usize,
    pub jurisprudencia: usize,
}

impl Default for BucketLimits {
    fn default() -> Self {
        Self {
            normativa: 5,
            doctrina: 3,
            jurisprudencia: 2,
        }
    }
}

/// Logging and monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub worker_threads: usize,
    pub cpu_pool_size: usize,
}

/// Embedding cache configuration (spec §4.4, §9 open question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Config {
    /// Load configuration from the default location (`config.toml`).
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file, applying env overrides and validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            message: format!("failed to read config file {:?}: {e}", path),
        })?;

        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("LEGAL_RAG_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("LEGAL_RAG_PORT") {
            self.server.port = port.parse().map_err(|_| CoreError::Config {
                message: "invalid port number in LEGAL_RAG_PORT".to_string(),
            })?;
        }
        if let Ok(db_path) = std::env::var("LEGAL_RAG_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(crate::validation_error!("server.port", "port cannot be zero"));
        }

        if self.embedder.dimension == 0 {
            return Err(crate::validation_error!(
                "embedder.dimension",
                "embedding dimension must be greater than zero"
            ));
        }

        if self.search.min_query_length > self.search.max_query_length {
            return Err(crate::validation_error!(
                "search.min_query_length",
                "minimum query length cannot be greater than maximum"
            ));
        }

        if self.search.vector_weight < 0.0 || self.search.lexical_weight < 0.0 {
            return Err(crate::validation_error!(
                "search.vector_weight",
                "RRF weights must be non-negative"
            ));
        }

        Ok(())
    }

    /// Serialize configuration as a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config {
            message: format!("failed to serialize config to TOML: {e}"),
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_payload_size_mb: 10,
                request_timeout_seconds: 30,
                enable_cors: true,
                query_deadline_ms: 15_000,
            },
            connectors: ConnectorConfig {
                user_agent: "legal-rag-core/0.1 (+contact below)".to_string(),
                contact_address: "soporte@legal-rag.example".to_string(),
                min_interval_ms: 500,
                boe: SourceEndpointConfig {
                    base_url: "https://www.boe.es".to_string(),
                    requests_per_minute: 30,
                },
                eurlex: SourceEndpointConfig {
                    base_url: "https://eur-lex.europa.eu".to_string(),
                    requests_per_minute: 20,
                },
                dgt: SourceEndpointConfig {
                    base_url: "https://petete.tributos.hacienda.gob.es".to_string(),
                    requests_per_minute: 20,
                },
            },
            embedder: EmbedderConfig {
                max_chars: 8_000,
                dimension: 768,
                retry: RetryConfig::default(),
                rate_limit_interval_ms: 50,
                cache: CacheConfig {
                    enabled: true,
                    max_entries: 100_000,
                    ttl_seconds: 60 * 60 * 24 * 30,
                },
                endpoint_url: "https://api.example-embeddings.com/v1/embeddings".to_string(),
                api_key_env: "LEGAL_RAG_EMBEDDER_API_KEY".to_string(),
            },
            generator: GeneratorConfig {
                model: "legal-rag-generator-v1".to_string(),
                timeout_ms: 20_000,
                retry: RetryConfig {
                    max_attempts: 1,
                    base_delay_seconds: 0,
                    exponent: 1.0,
                },
                endpoint_url: "https://api.example-generation.com/v1/chat/completions".to_string(),
                api_key_env: "LEGAL_RAG_GENERATOR_API_KEY".to_string(),
            },
            ingestion: IngestionConfig {
                max_concurrent_sources: 4,
                retry: RetryConfig::default(),
                heartbeat_minutes: 10,
            },
            store: StoreConfig {
                db_path: PathBuf::from("./data/legal_rag.db"),
                enable_compression: true,
                lexical_language: "es".to_string(),
            },
            search: SearchEngineConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: true,
            },
            performance: PerformanceConfig {
                worker_threads: num_cpus::get(),
                cpu_pool_size: num_cpus::get() * 2,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedder.dimension, 768);
        assert_eq!(config.search.bucket_limits.normativa, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::from_file("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn query_length_bounds_match_spec_boundary_cases() {
        let config = Config::default();
        assert_eq!(config.search.min_query_length, 10);
        assert_eq!(config.search.max_query_length, 500);
    }
}
