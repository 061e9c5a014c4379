//! Simple demonstration of the retrieval core running end-to-end with no
//! external services: a fixed embedder stands in for the HTTP embedding
//! RPC, a single `CorpusSource` is normalised and stored in a temporary
//! sled database, and a hybrid search runs against it.
//!
//! Run with `cargo run --example simple_demo` (after adding a matching
//! `[[example]]` entry, since this file lives outside `src/`).

use std::sync::Arc;

use async_trait::async_trait;
use legal_rag_core::config::{CacheConfig, EmbedderConfig, RetryConfig, SearchEngineConfig};
use legal_rag_core::connectors::{ConnectorOutput, StructuralUnit};
use legal_rag_core::embedder::{Embed, EmbeddingAdapter};
use legal_rag_core::errors::Result;
use legal_rag_core::normaliser::normalise;
use legal_rag_core::search::{SearchEngine, SearchFilter, SearchQuery};
use legal_rag_core::store::sled_store::SledChunkStore;
use legal_rag_core::store::ChunkStore;
use legal_rag_core::{AuthorityLevel, ChunkKind, CorpusSource, Nature, Priority, SourceState};

/// Deterministic stand-in embedder: hashes the text into a fixed-size
/// vector so the demo never calls out to a real embedding provider.
struct FixedEmbedder {
    dimension: usize,
}

#[async_trait]
impl Embed for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1.0);
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }
}

fn sample_source() -> CorpusSource {
    CorpusSource {
        id: 1,
        official_id: "BOE-A-2006-20764".into(),
        priority: Priority::P1,
        nature: Nature::Normativa,
        area: "Fiscal".into(),
        scope: "España".into(),
        authority_level: AuthorityLevel::Ley,
        title: "Ley del Impuesto sobre la Renta de las Personas Físicas".into(),
        source_url: "https://www.boe.es/buscar/act.php?id=BOE-A-2006-20764".into(),
        document_kind: "ley".into(),
        state: SourceState::Ingesting,
        last_ingested_at: None,
        last_error: None,
    }
}

fn sample_output() -> ConnectorOutput {
    ConnectorOutput {
        body_text: String::new(),
        units: vec![
            StructuralUnit {
                kind: ChunkKind::Article,
                label: "Artículo 1".into(),
                text: "El Impuesto sobre la Renta de las Personas Físicas es un tributo de \
carácter personal y directo que grava la renta de las personas físicas."
                    .into(),
                position: 0,
            },
            StructuralUnit {
                kind: ChunkKind::Article,
                label: "Artículo 27".into(),
                text: "Se consideran rendimientos íntegros de actividades económicas los que, \
procediendo del trabajo personal y del capital conjuntamente, supongan la ordenación por \
cuenta propia de medios de producción, como es el caso de las actividades artísticas."
                    .into(),
                position: 1,
            },
        ],
        publication_date: None,
        official_id: "BOE-A-2006-20764".into(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let embedder_config = EmbedderConfig {
        max_chars: 8000,
        dimension: 32,
        retry: RetryConfig::default(),
        rate_limit_interval_ms: 0,
        cache: CacheConfig {
            enabled: true,
            max_entries: 1000,
            ttl_seconds: 3600,
        },
        endpoint_url: "unused".into(),
        api_key_env: "UNUSED".into(),
    };

    let embedder = Arc::new(EmbeddingAdapter::new(
        Arc::new(FixedEmbedder { dimension: embedder_config.dimension }),
        embedder_config.clone(),
    ));

    let store: Arc<dyn ChunkStore> = Arc::new(SledChunkStore::open(tempfile::tempdir()?.path())?);

    let source = sample_source();
    let (document, mut chunks) = normalise(&source, sample_output())?;
    for chunk in &mut chunks {
        chunk.embedding = embedder.embed_text(&chunk.text).await?;
        chunk.validate(embedder_config.dimension)?;
    }
    store.upsert_document(source.id, document, chunks).await?;

    let search_engine = SearchEngine::new(store.clone(), embedder, SearchEngineConfig::default());
    let results = search_engine
        .search(&SearchQuery {
            text: "actividad artística rendimientos".into(),
            filter: SearchFilter::default(),
            k: 5,
        })
        .await?;

    println!("found {} result(s):", results.len());
    for result in results {
        println!(
            "  [{}] {} — score {:.4}",
            result.chunk.label, result.chunk.metadata.doc_title, result.reranked_score
        );
    }

    Ok(())
}
