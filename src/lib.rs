//! # Legal RAG Retrieval Core
//!
//! ## Overview
//! This library implements the retrieval and grounding core of a
//! domain-specialised Retrieval-Augmented Generation service for Spanish
//! legal documents. It ingests heterogeneous official sources (BOE,
//! EUR-Lex, DGT), normalises them into a canonical chunk form, embeds and
//! indexes them behind a narrow `ChunkStore` interface, and answers
//! natural-language questions with a hierarchy-aware hybrid search and
//! prompt-assembly pipeline.
//!
//! ## Architecture
//! - `connectors`: per-source fetch + structural parse
//! - `normaliser`: connector output -> canonical chunks
//! - `embedder`: batching/truncation/retry adapter over an external embedding RPC
//! - `store`: the `ChunkStore` interface and its reference sled-backed implementation
//! - `ingestion`: per-source state machine, worker pool, retries
//! - `search`: hybrid RRF fusion, authority reranking, hierarchical retrieval
//! - `intent`: keyword-weighted query classification
//! - `generator`: the `Generator` interface and the deterministic fallback answer
//! - `rag`: end-to-end `AnswerQuery` orchestration
//! - `api`: the HTTP surface around the core
//! - `config` / `errors` / `utils`: ambient stack
//!
//! ## Usage
//! ```rust,no_run
//! use legal_rag_core::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let _ = config;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod embedder;
pub mod errors;
pub mod generator;
pub mod ingestion;
pub mod intent;
pub mod normaliser;
pub mod providers;
pub mod rag;
pub mod search;
pub mod store;

pub mod api;
pub mod utils;

pub use config::Config;
pub use errors::{CoreError, Result};
pub use rag::{AnswerResponse, RagOrchestrator};
pub use search::{SearchEngine, SearchQuery, SearchResult};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a `LegalDocument` or `DocumentChunk`.
pub type DocId = Uuid;
pub type ChunkId = Uuid;

/// Priority tier driving ingestion scheduling and the top `normativa` filter
/// (spec §3, §4.6: only `P1` normativa participates in hierarchical retrieval).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P1,
    P2,
    P3,
}

/// The three-valued legal-authority tier. The hierarchical retriever
/// partitions strictly on this field (spec §3 invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    Normativa,
    Doctrina,
    Jurisprudencia,
}

impl Nature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Nature::Normativa => "Normativa",
            Nature::Doctrina => "Doctrina",
            Nature::Jurisprudencia => "Jurisprudencia",
        }
    }
}

impl std::str::FromStr for Nature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Normativa" => Ok(Nature::Normativa),
            "Doctrina" => Ok(Nature::Doctrina),
            "Jurisprudencia" => Ok(Nature::Jurisprudencia),
            other => Err(crate::validation_error!(
                "nature",
                format!("unknown nature '{other}'")
            )),
        }
    }
}

/// Legal-authority level, used to look up the reranking multiplier (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityLevel {
    Constitucion,
    Ley,
    RealDecretoLegislativo,
    RealDecreto,
    Orden,
    DoctrinaAdministrativa,
    Jurisprudencia,
    Other,
}

impl AuthorityLevel {
    /// Rank in the multiplier table (spec §4.6), lower number = higher authority.
    pub fn rank(&self) -> u8 {
        match self {
            AuthorityLevel::Constitucion => 0,
            AuthorityLevel::Ley => 1,
            AuthorityLevel::RealDecretoLegislativo => 2,
            AuthorityLevel::RealDecreto => 3,
            AuthorityLevel::Orden => 4,
            AuthorityLevel::DoctrinaAdministrativa => 5,
            AuthorityLevel::Jurisprudencia => 6,
            AuthorityLevel::Other => 7,
        }
    }

    pub fn multiplier(&self) -> f32 {
        match self {
            AuthorityLevel::Constitucion => 2.0,
            AuthorityLevel::Ley => 1.5,
            AuthorityLevel::RealDecretoLegislativo => 1.4,
            AuthorityLevel::RealDecreto => 1.3,
            AuthorityLevel::Orden => 1.1,
            AuthorityLevel::DoctrinaAdministrativa => 1.0,
            AuthorityLevel::Jurisprudencia => 0.9,
            AuthorityLevel::Other => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityLevel::Constitucion => "Constitución",
            AuthorityLevel::Ley => "Ley",
            AuthorityLevel::RealDecretoLegislativo => "Real Decreto Legislativo",
            AuthorityLevel::RealDecreto => "Real Decreto",
            AuthorityLevel::Orden => "Orden",
            AuthorityLevel::DoctrinaAdministrativa => "Doctrina administrativa",
            AuthorityLevel::Jurisprudencia => "Jurisprudencia",
            AuthorityLevel::Other => "Other",
        }
    }
}

impl std::str::FromStr for AuthorityLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Constitución" | "Constitucion" => Ok(AuthorityLevel::Constitucion),
            "Ley" => Ok(AuthorityLevel::Ley),
            "Real Decreto Legislativo" => Ok(AuthorityLevel::RealDecretoLegislativo),
            "Real Decreto" => Ok(AuthorityLevel::RealDecreto),
            "Orden" => Ok(AuthorityLevel::Orden),
            "Doctrina administrativa" => Ok(AuthorityLevel::DoctrinaAdministrativa),
            "Jurisprudencia" => Ok(AuthorityLevel::Jurisprudencia),
            _ => Ok(AuthorityLevel::Other),
        }
    }
}

/// Lifecycle state of a `CorpusSource` (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Pending,
    Ingesting,
    Ingested,
    Failed,
    Skipped,
}

/// The kind of structural unit a chunk represents (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Article,
    Section,
    Disposition,
    Consulta,
    Contestacion,
    FullText,
}

/// Catalog entry for one legal source to ingest (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSource {
    pub id: i64,
    pub official_id: String,
    pub priority: Priority,
    pub nature: Nature,
    pub area: String,
    pub scope: String,
    pub authority_level: AuthorityLevel,
    pub title: String,
    pub source_url: String,
    pub document_kind: String,
    pub state: SourceState,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One successfully ingested source (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalDocument {
    pub id: DocId,
    pub source_id: i64,
    pub title: String,
    pub official_id: String,
    pub url: String,
    pub metadata: HashMap<String, String>,
}

/// Denormalised per-chunk metadata carried for filtered search (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub nature: Nature,
    pub area: String,
    pub priority: Priority,
    pub authority_level: AuthorityLevel,
    pub kind: ChunkKind,
    pub scope: String,
    pub doc_title: String,
    pub official_id: String,
    pub url: String,
    pub position: Option<usize>,
    pub publication_date: Option<NaiveDate>,
    pub is_fallback: bool,
}

/// The atomic retrievable unit (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: DocId,
    pub kind: ChunkKind,
    pub label: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    /// Precomputed lexical-search representation of `label ⊕ text`.
    pub lexical_text: String,
}

impl DocumentChunk {
    /// Invariants 1/2 of spec §3: fixed dimension, non-empty NUL-free text.
    pub fn validate(&self, expected_dim: usize) -> Result<()> {
        if self.embedding.len() != expected_dim {
            return Err(CoreError::EmbeddingDimensionMismatch {
                expected: expected_dim,
                actual: self.embedding.len(),
            });
        }
        if self.text.is_empty() {
            return Err(crate::validation_error!("text", "chunk text is empty"));
        }
        if self.text.contains('\0') {
            return Err(crate::validation_error!(
                "text",
                "chunk text contains a NUL byte"
            ));
        }
        Ok(())
    }
}

/// Application state shared across the HTTP API and the ingestion CLI path.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub store: Arc<dyn store::ChunkStore>,
    pub search_engine: Arc<search::SearchEngine>,
    pub rag_orchestrator: Arc<rag::RagOrchestrator>,
    pub ingestion_orchestrator: Arc<ingestion::IngestionOrchestrator>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_multiplier_table_matches_spec() {
        assert_eq!(AuthorityLevel::Constitucion.multiplier(), 2.0);
        assert_eq!(AuthorityLevel::Ley.multiplier(), 1.5);
        assert_eq!(AuthorityLevel::RealDecretoLegislativo.multiplier(), 1.4);
        assert_eq!(AuthorityLevel::RealDecreto.multiplier(), 1.3);
        assert_eq!(AuthorityLevel::Orden.multiplier(), 1.1);
        assert_eq!(AuthorityLevel::DoctrinaAdministrativa.multiplier(), 1.0);
        assert_eq!(AuthorityLevel::Jurisprudencia.multiplier(), 0.9);
        assert_eq!(AuthorityLevel::Other.multiplier(), 1.0);
    }

    #[test]
    fn chunk_validation_rejects_wrong_dimension() {
        let chunk = DocumentChunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            kind: ChunkKind::Article,
            label: "Artículo 1".into(),
            text: "texto".into(),
            embedding: vec![0.0; 10],
            metadata: ChunkMetadata {
                nature: Nature::Normativa,
                area: "Fiscal".into(),
                priority: Priority::P1,
                authority_level: AuthorityLevel::Ley,
                kind: ChunkKind::Article,
                scope: "España".into(),
                doc_title: "Ley".into(),
                official_id: "BOE-X".into(),
                url: "https://boe.es".into(),
                position: Some(0),
                publication_date: None,
                is_fallback: false,
            },
            lexical_text: "Artículo 1 texto".into(),
        };
        assert!(chunk.validate(768).is_err());
        assert!(chunk.validate(10).is_ok());
    }

    #[test]
    fn chunk_validation_rejects_nul_bytes() {
        let err = crate::validation_error!("text", "chunk text contains a NUL byte");
        assert!(matches!(err, CoreError::ValidationFailed { .. }));
    }
}
