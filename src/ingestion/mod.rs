//! Ingestion orchestrator: drives each `CorpusSource` through its
//! pending → ingesting → ingested/failed state machine, fetching via the
//! right connector, normalising, embedding, and upserting into the store.

pub mod rate_limit;

use crate::config::Config;
use crate::connectors::{boe::BoeConnector, dgt::DgtConnector, eurlex::EurLexConnector, FetchHints, SourceConnector};
use crate::embedder::EmbeddingAdapter;
use crate::errors::{CoreError, Result};
use crate::normaliser::normalise;
use crate::store::{ChunkStore, Page, SourceFilter};
use crate::{CorpusSource, Priority, SourceState};
use rate_limit::HostRateLimiter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const COMPONENT: &str = "ingestion_orchestrator";

/// Outcome of one `ingest_source` call, returned so callers (the CLI,
/// `ingest_all_by_priority`) can aggregate stats without re-deriving them
/// from log lines.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source_id: i64,
    pub official_id: String,
    pub result: IngestResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResult {
    Ingested { chunk_count: usize },
    Skipped,
    Failed { reason: String },
}

pub struct IngestionOrchestrator {
    store: Arc<dyn ChunkStore>,
    config: Arc<Config>,
    embedder: Arc<EmbeddingAdapter>,
    boe: Arc<BoeConnector>,
    eurlex: Arc<EurLexConnector>,
    dgt: Arc<DgtConnector>,
    rate_limiter: HostRateLimiter,
    semaphore: Arc<Semaphore>,
}

impl IngestionOrchestrator {
    pub fn new(config: Arc<Config>, store: Arc<dyn ChunkStore>, embedder: Arc<EmbeddingAdapter>) -> Self {
        let client = reqwest::Client::new();
        let user_agent = format!(
            "{} ({})",
            config.connectors.user_agent, config.connectors.contact_address
        );

        let rate_limiter = HostRateLimiter::new(20);
        rate_limiter.register("www.boe.es", config.connectors.boe.requests_per_minute);
        rate_limiter.register("eur-lex.europa.eu", config.connectors.eurlex.requests_per_minute);
        rate_limiter.register(
            host_of(&config.connectors.dgt.base_url),
            config.connectors.dgt.requests_per_minute,
        );

        Self {
            boe: Arc::new(BoeConnector::new(client.clone(), user_agent.clone())),
            eurlex: Arc::new(EurLexConnector::new(client.clone(), user_agent.clone())),
            dgt: Arc::new(DgtConnector::new(client, user_agent)),
            semaphore: Arc::new(Semaphore::new(config.ingestion.max_concurrent_sources)),
            rate_limiter,
            embedder,
            store,
            config,
        }
    }

    fn connector_for(&self, url: &str) -> Arc<dyn SourceConnector> {
        if url.contains("boe.es") {
            self.boe.clone()
        } else if url.contains("eur-lex.europa.eu") {
            self.eurlex.clone()
        } else {
            self.dgt.clone()
        }
    }

    /// Runs the full fetch → normalise → embed → upsert pipeline for one
    /// source, honouring the retry/backoff policy on recoverable failures.
    /// Assumes the caller already holds the `ingesting` lock.
    async fn run_pipeline(&self, source: &CorpusSource) -> Result<usize> {
        let retry = &self.config.ingestion.retry;
        let host = host_of(&source.source_url);
        let connector = self.connector_for(&source.source_url);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.acquire(host).await;
            tokio::time::sleep(connector.min_interval()).await;

            let outcome = self
                .fetch_normalise_embed_upsert(source.clone(), connector.clone())
                .await;

            match outcome {
                Ok(chunk_count) => return Ok(chunk_count),
                Err(err) if attempt < retry.max_attempts && err.is_recoverable() => {
                    let delay = Duration::from_secs_f64(
                        retry.base_delay_seconds as f64 * retry.exponent.powi(attempt as i32 - 1),
                    );
                    tracing::warn!(
                        component = COMPONENT,
                        source_id = source.id,
                        stage = "fetch",
                        event = "retry",
                        attempt,
                        ?delay,
                        error = %err,
                        "retrying ingestion"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_normalise_embed_upsert(
        &self,
        source: CorpusSource,
        connector: Arc<dyn SourceConnector>,
    ) -> Result<usize> {
        let hints = FetchHints {
            official_id: Some(source.official_id.clone()),
        };

        let fetch_started = Instant::now();
        let output = match connector.fetch(&source.source_url, &hints).await {
            Ok(output) => {
                tracing::info!(
                    component = COMPONENT,
                    source_id = source.id,
                    stage = "fetch",
                    event = "ok",
                    duration_ms = fetch_started.elapsed().as_millis() as u64,
                    "fetched source"
                );
                output
            }
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    source_id = source.id,
                    stage = "fetch",
                    event = "error",
                    error = %err,
                    "fetch failed"
                );
                return Err(err);
            }
        };

        let normalise_started = Instant::now();
        let (document, mut chunks) = match normalise(&source, output) {
            Ok(result) => {
                tracing::info!(
                    component = COMPONENT,
                    source_id = source.id,
                    stage = "normalise",
                    event = "ok",
                    duration_ms = normalise_started.elapsed().as_millis() as u64,
                    chunk_count = result.1.len(),
                    "normalised source into chunks"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    source_id = source.id,
                    stage = "normalise",
                    event = "error",
                    error = %err,
                    "normalisation failed"
                );
                return Err(err);
            }
        };
        let doc_id = document.id;

        let embed_started = Instant::now();
        for chunk in &mut chunks {
            chunk.embedding = match self.embedder.embed_text(&chunk.text).await {
                Ok(vector) => vector,
                Err(err) => {
                    tracing::warn!(
                        component = COMPONENT,
                        source_id = source.id,
                        doc_id = %doc_id,
                        stage = "embed",
                        event = "error",
                        error = %err,
                        "embedding failed"
                    );
                    return Err(err);
                }
            };
            chunk.validate(self.config.embedder.dimension)?;
        }
        tracing::info!(
            component = COMPONENT,
            source_id = source.id,
            doc_id = %doc_id,
            stage = "embed",
            event = "ok",
            duration_ms = embed_started.elapsed().as_millis() as u64,
            chunk_count = chunks.len(),
            "embedded all chunks"
        );

        let chunk_count = chunks.len();
        let store_started = Instant::now();
        match self.store.upsert_document(source.id, document, chunks).await {
            Ok(()) => {
                tracing::info!(
                    component = COMPONENT,
                    source_id = source.id,
                    doc_id = %doc_id,
                    stage = "store",
                    event = "ok",
                    duration_ms = store_started.elapsed().as_millis() as u64,
                    chunk_count,
                    "upserted document and chunks"
                );
                Ok(chunk_count)
            }
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    source_id = source.id,
                    doc_id = %doc_id,
                    stage = "store",
                    event = "error",
                    error = %err,
                    "document upsert failed"
                );
                Err(err)
            }
        }
    }

    /// Ingests one source by id: takes the `pending → ingesting` lock, runs
    /// the pipeline, and records the terminal state. Returns `Skipped` if
    /// the source could not be locked (already ingesting, or not pending).
    pub async fn ingest_source(&self, source_id: i64) -> Result<IngestOutcome> {
        let Some(source) = self.store.get_source(source_id).await? else {
            return Err(CoreError::Internal {
                message: format!("unknown source_id {source_id}"),
            });
        };

        if !self.store.try_lock_source_for_ingesting(source_id).await? {
            return Ok(IngestOutcome {
                source_id,
                official_id: source.official_id,
                result: IngestResult::Skipped,
            });
        }

        let mut lock_guard = IngestingLockGuard::new(self.store.clone(), source_id);
        let pipeline_result = self.run_pipeline(&source).await;
        lock_guard.disarm();

        match pipeline_result {
            Ok(chunk_count) => {
                self.store
                    .set_source_state(source_id, SourceState::Ingested, None)
                    .await?;
                tracing::info!(
                    component = COMPONENT,
                    source_id,
                    stage = "store",
                    event = "ingested",
                    chunk_count,
                    "source transitioned to ingested"
                );
                Ok(IngestOutcome {
                    source_id,
                    official_id: source.official_id,
                    result: IngestResult::Ingested { chunk_count },
                })
            }
            Err(err) => {
                self.store
                    .set_source_state(source_id, SourceState::Failed, Some(err.to_string()))
                    .await?;
                tracing::error!(
                    component = COMPONENT,
                    source_id,
                    stage = "store",
                    event = "failed",
                    error = %err,
                    "source transitioned to failed"
                );
                Ok(IngestOutcome {
                    source_id,
                    official_id: source.official_id,
                    result: IngestResult::Failed {
                        reason: err.to_string(),
                    },
                })
            }
        }
    }

    /// Ingests every `pending` source at `priority`, bounded to
    /// `max_concurrent_sources` concurrent ingestions.
    pub async fn ingest_all_by_priority(&self, priority: Priority) -> Result<Vec<IngestOutcome>> {
        let filter = SourceFilter {
            priority: Some(priority),
            state: Some(SourceState::Pending),
            ..Default::default()
        };
        let sources = self
            .store
            .list_sources(&filter, Page { offset: 0, limit: usize::MAX })
            .await?;

        let futures = sources.into_iter().map(|source| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.ingest_source(source.id).await
            }
        });

        let results = futures::future::join_all(futures).await;
        results.into_iter().collect::<Result<Vec<_>>>()
    }

    /// Resets any source left `ingesting` past the configured heartbeat,
    /// so a crashed worker doesn't permanently lock its source out.
    pub async fn reclaim_stale_locks(&self) -> Result<usize> {
        self.store
            .reclaim_stale_locks(Duration::from_secs(self.config.ingestion.heartbeat_minutes * 60))
            .await
    }
}

/// RAII guard held across one source's `ingesting` window.
///
/// Spec §5 cancellation semantics: "cancellation of an ingestion task
/// mid-flight MUST leave the source in pending (not ingesting)". A plain
/// `async fn` gives no such guarantee if the surrounding future is dropped
/// (e.g. a deadline or a shutdown signal) before it reaches the terminal
/// `set_source_state` call. This guard reverts the lock to `pending` on
/// drop unless `disarm` was called first, which `ingest_source` does right
/// before committing the real terminal state.
struct IngestingLockGuard {
    store: Arc<dyn ChunkStore>,
    source_id: i64,
    armed: bool,
}

impl IngestingLockGuard {
    fn new(store: Arc<dyn ChunkStore>, source_id: i64) -> Self {
        Self {
            store,
            source_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for IngestingLockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let source_id = self.source_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = store.set_source_state(source_id, SourceState::Pending, None).await {
                    tracing::error!(
                        component = COMPONENT,
                        source_id,
                        stage = "store",
                        event = "revert_failed",
                        error = %err,
                        "failed to revert cancelled ingestion to pending"
                    );
                } else {
                    tracing::warn!(
                        component = COMPONENT,
                        source_id,
                        stage = "store",
                        event = "cancelled",
                        "ingestion cancelled mid-flight, reverted to pending"
                    );
                }
            });
        }
    }
}

fn host_of(url: &str) -> &str {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("https://www.boe.es/buscar/act.php?id=X"), "www.boe.es");
        assert_eq!(host_of("https://eur-lex.europa.eu/legal-content"), "eur-lex.europa.eu");
    }
}
