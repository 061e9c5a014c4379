//! Demonstrates driving the `IngestionOrchestrator` against a seeded
//! catalog of BOE/EUR-Lex/DGT sources, wired the same way `main.rs` wires
//! the service, but pointed at a disposable sled database so the demo
//! never touches a real deployment's store.
//!
//! Run with `cargo run --example ingestion_demo` (after adding a matching
//! `[[example]]` entry, since this file lives outside `src/`). Requires
//! network access to the three official publication sites, since this
//! demo exercises the real `BoeConnector`/`EurLexConnector`/`DgtConnector`
//! rather than a mock.

use std::sync::Arc;

use legal_rag_core::config::Config;
use legal_rag_core::embedder::EmbeddingAdapter;
use legal_rag_core::ingestion::{IngestResult, IngestionOrchestrator};
use legal_rag_core::providers::HttpEmbedder;
use legal_rag_core::store::sled_store::SledChunkStore;
use legal_rag_core::store::ChunkStore;
use legal_rag_core::{AuthorityLevel, CorpusSource, Nature, Priority, SourceState};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn seed_catalog() -> Vec<CorpusSource> {
    vec![
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
            state: SourceState::Pending,
            last_ingested_at: None,
            last_error: None,
        },
        CorpusSource {
            id: 2,
            official_id: "32006L0112".into(),
            priority: Priority::P1,
            nature: Nature::Normativa,
            area: "Fiscal".into(),
            scope: "Unión Europea".into(),
            authority_level: AuthorityLevel::Ley,
            title: "Directiva 2006/112/CE relativa al sistema común del IVA".into(),
            source_url: "https://eur-lex.europa.eu/legal-content/ES/TXT/?uri=CELEX:32006L0112"
                .into(),
            document_kind: "directiva".into(),
            state: SourceState::Pending,
            last_ingested_at: None,
            last_error: None,
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let config = Arc::new(Config::default());
    let store: Arc<dyn ChunkStore> =
        Arc::new(SledChunkStore::open(tempfile::tempdir()?.path())?);

    for source in seed_catalog() {
        store.upsert_source(source).await?;
    }

    let http_client = reqwest::Client::new();
    let raw_embedder = Arc::new(HttpEmbedder::new(http_client, &config.embedder));
    let embedder = Arc::new(EmbeddingAdapter::new(raw_embedder, config.embedder.clone()));

    let orchestrator = IngestionOrchestrator::new(config.clone(), store.clone(), embedder);

    info!("ingesting every pending P1 source");
    let outcomes = orchestrator.ingest_all_by_priority(Priority::P1).await?;

    for outcome in &outcomes {
        match &outcome.result {
            IngestResult::Ingested { chunk_count } => {
                info!(official_id = %outcome.official_id, chunk_count, "ingested")
            }
            IngestResult::Skipped => info!(official_id = %outcome.official_id, "skipped"),
            IngestResult::Failed { reason } => {
                info!(official_id = %outcome.official_id, reason, "failed")
            }
        }
    }

    let reclaimed = orchestrator.reclaim_stale_locks().await?;
    info!(reclaimed, "stale-lock janitor pass complete");

    Ok(())
}
