//! # Chunk Store
//!
//! ## Purpose
//! The narrow persistence interface the rest of the core depends on
//! (spec §4.1, §9 "ORM-centric data access → narrow store interface"). The
//! relational database and vector/lexical index implementation details stay
//! behind this trait; callers never see sled, an HNSW graph, or a stemmer.
//!
//! ## Capability set
//! Transactional upsert of documents+chunks, vector k-NN, lexical ranked
//! search, metadata filter, and the source catalog reads/writes the
//! ingestion orchestrator needs to drive its state machine.

pub mod lexical;
pub mod sled_store;

use crate::errors::Result;
use crate::{AuthorityLevel, CorpusSource, DocId, LegalDocument, Nature, Priority, SourceState};
use async_trait::async_trait;

pub use sled_store::SledChunkStore;

/// AND-combined equality filter over the denormalised chunk metadata
/// (spec §4.1 "Filter semantics"). `None` on a field means "no constraint".
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub nature: Option<Nature>,
    pub area: Option<String>,
    pub priority: Option<Priority>,
    pub authority_level: Option<AuthorityLevel>,
}

impl ChunkFilter {
    pub fn matches(&self, meta: &crate::ChunkMetadata) -> bool {
        if let Some(nature) = self.nature {
            if meta.nature != nature {
                return false;
            }
        }
        if let Some(area) = &self.area {
            if &meta.area != area {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if meta.priority != priority {
                return false;
            }
        }
        if let Some(authority_level) = self.authority_level {
            if meta.authority_level != authority_level {
                return false;
            }
        }
        true
    }
}

/// Equality filter over the `CorpusSource` catalog, used by `ListSources`.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub priority: Option<Priority>,
    pub nature: Option<Nature>,
    pub area: Option<String>,
    pub state: Option<SourceState>,
}

impl SourceFilter {
    pub fn matches(&self, source: &CorpusSource) -> bool {
        if let Some(priority) = self.priority {
            if source.priority != priority {
                return false;
            }
        }
        if let Some(nature) = self.nature {
            if source.nature != nature {
                return false;
            }
        }
        if let Some(area) = &self.area {
            if &source.area != area {
                return false;
            }
        }
        if let Some(state) = self.state {
            if source.state != state {
                return false;
            }
        }
        true
    }
}

/// Offset/limit pagination for catalog listing.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A document together with its chunks, ordered by `metadata.position`.
#[derive(Debug, Clone)]
pub struct DocumentWithChunks {
    pub document: LegalDocument,
    pub chunks: Vec<crate::DocumentChunk>,
}

/// Polymorphic persistence over {transactional upsert, vector k-NN, lexical
/// ranked search, metadata filter, source catalog} (spec §4.1).
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Atomically replaces any existing document for `source_id` and all of
    /// its chunks with `doc`/`chunks` (spec §4.1, §4.5 idempotency: no window
    /// with an orphaned document or partial chunk set).
    async fn upsert_document(
        &self,
        source_id: i64,
        doc: LegalDocument,
        chunks: Vec<crate::DocumentChunk>,
    ) -> Result<()>;

    /// `VectorSearch(q_vec, filter, k)` → `(chunk, distance)` ascending by
    /// cosine distance (spec §4.1).
    async fn vector_search(
        &self,
        q_vec: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<(crate::DocumentChunk, f32)>>;

    /// `LexicalSearch(q_text, filter, k)` → `(chunk, rank)` descending by
    /// lexical rank, Spanish-stemmed (spec §4.1).
    async fn lexical_search(
        &self,
        q_text: &str,
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<(crate::DocumentChunk, f32)>>;

    /// `GetDocument(official_id)` with chunks sorted by `metadata.position`.
    async fn get_document(&self, official_id: &str) -> Result<Option<DocumentWithChunks>>;

    /// `ListSources(filter, page)` for the catalog read endpoint.
    async fn list_sources(&self, filter: &SourceFilter, page: Page) -> Result<Vec<CorpusSource>>;

    async fn get_source(&self, source_id: i64) -> Result<Option<CorpusSource>>;

    /// Inserts or replaces a catalog entry (used by catalog seeding/admin paths).
    async fn upsert_source(&self, source: CorpusSource) -> Result<()>;

    /// Atomically transitions a `pending` source to `ingesting`, returning
    /// `false` if it was not `pending` (spec §4.5: `ingesting` is a lock).
    async fn try_lock_source_for_ingesting(&self, source_id: i64) -> Result<bool>;

    /// Transitions a source's state and records `last_ingested_at`/`last_error`
    /// as appropriate. Must never leave a source `ingesting` except while a
    /// worker actively holds the lock (spec §5 cancellation semantics).
    async fn set_source_state(
        &self,
        source_id: i64,
        state: SourceState,
        last_error: Option<String>,
    ) -> Result<()>;

    /// Reclaims `ingesting` sources whose lock is older than `heartbeat`,
    /// resetting them to `pending` (spec §8 boundary behaviour, recommended
    /// janitor). Returns the number reclaimed.
    async fn reclaim_stale_locks(&self, heartbeat: std::time::Duration) -> Result<usize>;

    /// Health check used by the `/health` endpoint and the CLI `--check-health` flag.
    async fn health_check(&self) -> Result<()>;
}

/// Convenience: fetch a document's chunk list only, discarding the envelope.
pub async fn chunks_for_document(
    store: &dyn ChunkStore,
    official_id: &str,
) -> Result<Vec<crate::DocumentChunk>> {
    Ok(store
        .get_document(official_id)
        .await?
        .map(|d| d.chunks)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkMetadata, ChunkKind};

    fn sample_meta() -> ChunkMetadata {
        ChunkMetadata {
            nature: Nature::Normativa,
            area: "Fiscal".into(),
            priority: Priority::P1,
            authority_level: AuthorityLevel::Ley,
            kind: ChunkKind::Article,
            scope: "España".into(),
            doc_title: "IRPF".into(),
            official_id: "BOE-X".into(),
            url: "https://boe.es".into(),
            position: Some(0),
            publication_date: None,
            is_fallback: false,
        }
    }

    #[test]
    fn filter_with_no_constraints_matches_everything() {
        let filter = ChunkFilter::default();
        assert!(filter.matches(&sample_meta()));
    }

    #[test]
    fn filter_rejects_mismatched_nature() {
        let filter = ChunkFilter {
            nature: Some(Nature::Doctrina),
            ..Default::default()
        };
        assert!(!filter.matches(&sample_meta()));
    }

    #[test]
    fn filter_combines_predicates_with_and() {
        let filter = ChunkFilter {
            nature: Some(Nature::Normativa),
            priority: Some(Priority::P2),
            ..Default::default()
        };
        // nature matches but priority doesn't -> overall false (AND semantics)
        assert!(!filter.matches(&sample_meta()));
    }
}
