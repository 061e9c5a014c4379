//! # Search Engine
//!
//! Hybrid dense+lexical retrieval fused by Reciprocal Rank Fusion, then
//! reranked by legal authority level, with a hierarchical retrieval mode
//! that buckets results by `Nature` for the RAG orchestrator.

use crate::config::SearchEngineConfig;
use crate::embedder::EmbeddingAdapter;
use crate::errors::Result;
use crate::store::{ChunkFilter, ChunkStore};
use crate::{AuthorityLevel, ChunkId, DocumentChunk, Nature};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const COMPONENT: &str = "search_engine";

/// A search request against the hybrid engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub filter: SearchFilter,
    pub k: usize,
}

/// JSON-facing mirror of `ChunkFilter`, kept as plain `Option<String>`
/// fields so the API layer can accept free-form filter values and
/// validate/parse them at the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub nature: Option<String>,
    pub area: Option<String>,
    pub priority: Option<String>,
    pub authority_level: Option<String>,
}

impl SearchFilter {
    pub fn into_chunk_filter(self) -> Result<ChunkFilter> {
        Ok(ChunkFilter {
            nature: self.nature.map(|n| n.parse()).transpose()?,
            area: self.area,
            priority: self
                .priority
                .map(|p| match p.as_str() {
                    "P1" => Ok(crate::Priority::P1),
                    "P2" => Ok(crate::Priority::P2),
                    "P3" => Ok(crate::Priority::P3),
                    other => Err(crate::validation_error!(
                        "priority",
                        format!("unknown priority '{other}'")
                    )),
                })
                .transpose()?,
            authority_level: self.authority_level.map(|a| a.parse()).transpose()?,
        })
    }
}

/// One ranked result: the chunk, its fused RRF score, and the authority
/// multiplier applied on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    pub fused_score: f32,
    pub reranked_score: f32,
    /// Cosine distance from the dense retriever, if the chunk appeared in
    /// the vector candidate list. Used only as tie-break criterion (b) in
    /// `rerank_by_authority` (spec §4.6 step 6) — lexical-only hits sort
    /// after vector hits on an exact tie.
    pub vector_distance: Option<f32>,
}

/// Chunks retrieved for one query, partitioned by `Nature` (spec §4.6
/// hierarchical retrieval output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchicalResults {
    pub normativa: Vec<SearchResult>,
    pub doctrina: Vec<SearchResult>,
    pub jurisprudencia: Vec<SearchResult>,
}

impl HierarchicalResults {
    pub fn is_empty(&self) -> bool {
        self.normativa.is_empty() && self.doctrina.is_empty() && self.jurisprudencia.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &SearchResult> {
        self.normativa
            .iter()
            .chain(self.doctrina.iter())
            .chain(self.jurisprudencia.iter())
    }
}

pub struct SearchEngine {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<EmbeddingAdapter>,
    config: SearchEngineConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<EmbeddingAdapter>, config: SearchEngineConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Hybrid search: runs vector and lexical retrieval over a `2k`
    /// candidate pool each, fuses by RRF, reranks by authority, and
    /// returns the top `k`.
    ///
    /// If embedding the query fails, falls back to lexical-only retrieval
    /// rather than failing the whole query — the lexical path must not
    /// block on the embedder being available.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let filter = query.filter.clone().into_chunk_filter()?;
        let candidate_k = query.k * self.config.candidate_multiplier.max(1);

        let vector_started = Instant::now();
        let vector_results = match self.embedder.embed_text(&query.text).await {
            Ok(vector) => match self.store.vector_search(&vector, &filter, candidate_k).await {
                Ok(results) => {
                    tracing::info!(
                        component = COMPONENT,
                        stage = "vector_search",
                        event = "ok",
                        duration_ms = vector_started.elapsed().as_millis() as u64,
                        result_count = results.len(),
                        "vector search completed"
                    );
                    results
                }
                Err(err) => {
                    tracing::error!(
                        component = COMPONENT,
                        stage = "vector_search",
                        event = "error",
                        error = %err,
                        "vector search failed"
                    );
                    return Err(err);
                }
            },
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    stage = "vector_search",
                    event = "embedder_degraded",
                    error = %err,
                    "query embedding failed, falling back to lexical-only search"
                );
                Vec::new()
            }
        };

        let lexical_started = Instant::now();
        let lexical_results = match self
            .store
            .lexical_search(&query.text, &filter, candidate_k)
            .await
        {
            Ok(results) => {
                tracing::info!(
                    component = COMPONENT,
                    stage = "lexical_search",
                    event = "ok",
                    duration_ms = lexical_started.elapsed().as_millis() as u64,
                    result_count = results.len(),
                    "lexical search completed"
                );
                results
            }
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    stage = "lexical_search",
                    event = "error",
                    error = %err,
                    "lexical search failed, degrading to vector-only results"
                );
                Vec::new()
            }
        };

        let fuse_started = Instant::now();
        let fused = fuse_rrf(&vector_results, &lexical_results, self.config.rrf_kappa, self.config.vector_weight, self.config.lexical_weight);
        tracing::info!(
            component = COMPONENT,
            stage = "fuse",
            event = "ok",
            duration_ms = fuse_started.elapsed().as_millis() as u64,
            fused_count = fused.len(),
            "reciprocal rank fusion completed"
        );

        let rerank_started = Instant::now();
        let mut reranked = rerank_by_authority(fused);
        reranked.truncate(query.k);
        tracing::info!(
            component = COMPONENT,
            stage = "rerank",
            event = "ok",
            duration_ms = rerank_started.elapsed().as_millis() as u64,
            result_count = reranked.len(),
            "authority reranking completed"
        );
        Ok(reranked)
    }

    /// Hierarchical retrieval: runs `search` once per `Nature`, applying
    /// the bucket-size limits from configuration. Doctrina is only
    /// retrieved when at least one normativa chunk was found — doctrine
    /// without a normative anchor is not useful grounding on its own.
    pub async fn search_hierarchical(&self, text: &str, area: Option<&str>) -> Result<HierarchicalResults> {
        let base_filter = SearchFilter {
            area: area.map(|a| a.to_string()),
            ..Default::default()
        };

        let normativa = self
            .search(&SearchQuery {
                text: text.to_string(),
                filter: SearchFilter {
                    nature: Some("Normativa".to_string()),
                    priority: Some("P1".to_string()),
                    ..base_filter.clone()
                },
                k: self.config.bucket_limits.normativa,
            })
            .await?;

        let doctrina = if normativa.is_empty() {
            Vec::new()
        } else {
            self.search(&SearchQuery {
                text: text.to_string(),
                filter: SearchFilter {
                    nature: Some("Doctrina".to_string()),
                    ..base_filter.clone()
                },
                k: self.config.bucket_limits.doctrina,
            })
            .await?
        };

        let jurisprudencia = self
            .search(&SearchQuery {
                text: text.to_string(),
                filter: SearchFilter {
                    nature: Some("Jurisprudencia".to_string()),
                    ..base_filter
                },
                k: self.config.bucket_limits.jurisprudencia,
            })
            .await?;

        Ok(HierarchicalResults {
            normativa,
            doctrina,
            jurisprudencia,
        })
    }
}

/// Fuses dense (ascending distance) and lexical (descending rank) result
/// lists via Reciprocal Rank Fusion:
/// `fused(c) = w_v · 1/(κ + rank_V(c)) + w_l · 1/(κ + rank_L(c))`.
/// A chunk present in only one list still gets a score from that list
/// alone — RRF does not require presence in both.
fn fuse_rrf(
    vector_results: &[(DocumentChunk, f32)],
    lexical_results: &[(DocumentChunk, f32)],
    kappa: f32,
    vector_weight: f32,
    lexical_weight: f32,
) -> Vec<(DocumentChunk, f32, Option<f32>)> {
    let mut chunks: HashMap<ChunkId, DocumentChunk> = HashMap::new();
    let mut scores: HashMap<ChunkId, f32> = HashMap::new();
    let mut distances: HashMap<ChunkId, f32> = HashMap::new();

    for (rank, (chunk, distance)) in vector_results.iter().enumerate() {
        let score = vector_weight / (kappa + rank as f32 + 1.0);
        *scores.entry(chunk.id).or_insert(0.0) += score;
        distances.entry(chunk.id).or_insert(*distance);
        chunks.entry(chunk.id).or_insert_with(|| chunk.clone());
    }

    for (rank, (chunk, _lexical_rank)) in lexical_results.iter().enumerate() {
        let score = lexical_weight / (kappa + rank as f32 + 1.0);
        *scores.entry(chunk.id).or_insert(0.0) += score;
        chunks.entry(chunk.id).or_insert_with(|| chunk.clone());
    }

    let mut fused: Vec<(DocumentChunk, f32, Option<f32>)> = scores
        .into_iter()
        .filter_map(|(id, score)| {
            chunks
                .remove(&id)
                .map(|chunk| (chunk, score, distances.get(&id).copied()))
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// Multiplies each fused score by its chunk's authority multiplier and
/// re-sorts, tie-breaking by (a) authority rank ascending, (b) lower
/// vector distance (lexical-only hits, with no vector distance, sort
/// last), then (c) chunk id lexicographically — spec §4.6 step 6.
fn rerank_by_authority(fused: Vec<(DocumentChunk, f32, Option<f32>)>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = fused
        .into_iter()
        .map(|(chunk, fused_score, vector_distance)| {
            let multiplier = chunk.metadata.authority_level.multiplier();
            SearchResult {
                chunk,
                fused_score,
                reranked_score: fused_score * multiplier,
                vector_distance,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.reranked_score
            .partial_cmp(&a.reranked_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.metadata.authority_level.rank().cmp(&b.chunk.metadata.authority_level.rank()))
            .then_with(|| {
                let da = a.vector_distance.unwrap_or(f32::INFINITY);
                let db = b.vector_distance.unwrap_or(f32::INFINITY);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.to_string().cmp(&b.chunk.id.to_string()))
    });

    results
}

/// Looks up the multiplier for an authority level string, used by the API
/// layer when surfacing the table for debugging/documentation purposes.
pub fn authority_multiplier(level: &str) -> Result<f32> {
    let level: AuthorityLevel = level.parse()?;
    Ok(level.multiplier())
}

/// Checks whether `nature` participates in the top normativa filter
/// (only `P1` normativa does, per the hierarchical retrieval rule).
pub fn is_top_normativa(nature: Nature, priority: crate::Priority) -> bool {
    nature == Nature::Normativa && priority == crate::Priority::P1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkKind, ChunkMetadata, Priority};
    use uuid::Uuid;

    fn sample_chunk(authority: AuthorityLevel) -> DocumentChunk {
        DocumentChunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            kind: ChunkKind::Article,
            label: "Artículo 1".into(),
            text: "texto".into(),
            embedding: vec![],
            metadata: ChunkMetadata {
                nature: Nature::Normativa,
                area: "Fiscal".into(),
                priority: Priority::P1,
                authority_level: authority,
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
        }
    }

    #[test]
    fn rrf_gives_score_to_chunk_present_in_only_one_list() {
        let chunk = sample_chunk(AuthorityLevel::Ley);
        let fused = fuse_rrf(&[(chunk.clone(), 0.1)], &[], 60.0, 0.6, 0.4);
        assert_eq!(fused.len(), 1);
        assert!(fused[0].1 > 0.0);
    }

    #[test]
    fn rrf_combines_scores_for_chunk_present_in_both_lists() {
        let chunk = sample_chunk(AuthorityLevel::Ley);
        let only_vector = fuse_rrf(&[(chunk.clone(), 0.1)], &[], 60.0, 0.6, 0.4);
        let both = fuse_rrf(&[(chunk.clone(), 0.1)], &[(chunk.clone(), 2.0)], 60.0, 0.6, 0.4);
        assert!(both[0].1 > only_vector[0].1);
    }

    #[test]
    fn authority_reranking_favours_higher_authority_at_equal_fused_score() {
        let ley = sample_chunk(AuthorityLevel::Ley);
        let jurisprudencia = sample_chunk(AuthorityLevel::Jurisprudencia);
        let fused = vec![(ley.clone(), 1.0), (jurisprudencia.clone(), 1.0)];
        let reranked = rerank_by_authority(fused);
        assert_eq!(reranked[0].chunk.metadata.authority_level, AuthorityLevel::Ley);
    }

    #[test]
    fn only_p1_normativa_is_top_normativa() {
        assert!(is_top_normativa(Nature::Normativa, Priority::P1));
        assert!(!is_top_normativa(Nature::Normativa, Priority::P2));
        assert!(!is_top_normativa(Nature::Doctrina, Priority::P1));
    }
}
