//! # Legal RAG Server Main Driver
//!
//! ## Purpose
//! Entry point for the legal RAG service. Parses CLI flags, loads
//! configuration, wires the store/embedder/generator/search/ingestion
//! components together, and starts the HTTP API server.
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the chunk store and wire embedder/generator/search/rag/ingestion
//! 4. Optionally run `--check-health` or `--ingest-priority` and exit
//! 5. Start the HTTP API server
//! 6. Handle shutdown signals gracefully

use clap::{Arg, Command};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use legal_rag_core::api::ApiServer;
use legal_rag_core::config::Config;
use legal_rag_core::embedder::EmbeddingAdapter;
use legal_rag_core::errors::{CoreError, Result};
use legal_rag_core::ingestion::IngestionOrchestrator;
use legal_rag_core::providers::{HttpEmbedder, HttpGenerator};
use legal_rag_core::rag::RagOrchestrator;
use legal_rag_core::search::SearchEngine;
use legal_rag_core::store::sled_store::SledChunkStore;
use legal_rag_core::store::ChunkStore;
use legal_rag_core::{AppState, Priority};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("legal-rag-server")
        .version("0.1.0")
        .about("Retrieval and grounding core for Spanish legal RAG")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("ingest-priority")
                .long("ingest-priority")
                .value_name("P1|P2|P3")
                .help("Ingest every pending source at this priority tier, then exit"),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Run health checks and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = Config::from_file(config_path)?;

    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    let config = Arc::new(config);

    init_logging(&config)?;

    info!("Starting legal-rag-server v0.1.0");
    info!(config_path = %config_path, "configuration loaded");

    if matches.get_flag("check-health") {
        return run_health_checks(config.clone()).await;
    }

    let app_state = initialize_components(config.clone()).await?;

    if let Some(priority) = matches.get_one::<String>("ingest-priority") {
        return run_ingestion(&app_state, priority).await;
    }

    let server = ApiServer::new(app_state.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "server error");
        }
    });

    info!(host = %config.server.host, port = config.server.port, "legal-rag-server started");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down gracefully");
        }
        _ = server_handle => {
            warn!("server stopped unexpectedly");
        }
    }

    shutdown_components(&app_state).await?;
    info!("legal-rag-server shut down successfully");

    Ok(())
}

/// Initialize logging and tracing.
fn init_logging(config: &Config) -> Result<()> {
    let log_level = config.logging.level.parse().map_err(|_| CoreError::Config {
        message: format!("invalid log level: {}", config.logging.level),
    })?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true);

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(fmt_layer.json().with_filter(tracing_subscriber::filter::LevelFilter::from_level(log_level)))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(tracing_subscriber::filter::LevelFilter::from_level(log_level)))
            .init();
    }

    info!(level = %config.logging.level, "logging initialized");
    Ok(())
}

/// Wires the store, embedder, generator, search engine, RAG orchestrator,
/// and ingestion orchestrator into one `AppState`.
async fn initialize_components(config: Arc<Config>) -> Result<AppState> {
    info!("initializing application components");

    let store: Arc<dyn ChunkStore> = Arc::new(SledChunkStore::open_with_compression(
        &config.store.db_path,
        config.store.enable_compression,
    )?);

    let http_client = reqwest::Client::new();
    let raw_embedder = Arc::new(HttpEmbedder::new(http_client.clone(), &config.embedder));
    let embedder = Arc::new(EmbeddingAdapter::new(raw_embedder, config.embedder.clone()));

    let generator = Arc::new(HttpGenerator::new(http_client, &config.generator));

    let search_engine = Arc::new(SearchEngine::new(store.clone(), embedder.clone(), config.search.clone()));
    let rag_orchestrator = Arc::new(RagOrchestrator::new(
        search_engine.clone(),
        generator,
        config.generator.model.clone(),
    ));
    let ingestion_orchestrator = Arc::new(IngestionOrchestrator::new(config.clone(), store.clone(), embedder));

    verify_component_health(store.as_ref()).await?;

    let app_state = AppState {
        config,
        store,
        search_engine,
        rag_orchestrator,
        ingestion_orchestrator,
    };

    info!("all components initialized successfully");
    Ok(app_state)
}

async fn verify_component_health(store: &dyn ChunkStore) -> Result<()> {
    store.health_check().await?;
    info!("store is healthy");
    Ok(())
}

/// Runs `--check-health`: validates configuration and that the store
/// directory is reachable, then exits without starting the server.
async fn run_health_checks(config: Arc<Config>) -> Result<()> {
    info!("running health checks");
    info!("configuration is valid");

    check_required_paths(&config)?;
    info!("required paths exist");

    let store = SledChunkStore::open_with_compression(&config.store.db_path, config.store.enable_compression)?;
    store.health_check().await?;
    info!("store is reachable");

    info!("all health checks passed");
    Ok(())
}

fn check_required_paths(config: &Config) -> Result<()> {
    if let Some(parent) = config.store.db_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            info!(dir = ?parent, "created directory");
        }
    }
    Ok(())
}

/// Runs `--ingest-priority P1|P2|P3`: ingests every pending source at that
/// tier, logs a summary, and exits without starting the HTTP server.
async fn run_ingestion(app_state: &AppState, priority: &str) -> Result<()> {
    let priority = match priority {
        "P1" => Priority::P1,
        "P2" => Priority::P2,
        "P3" => Priority::P3,
        other => {
            return Err(CoreError::Config {
                message: format!("invalid --ingest-priority value '{other}', expected P1, P2, or P3"),
            })
        }
    };

    info!(?priority, "starting ingestion run");
    let outcomes = app_state.ingestion_orchestrator.ingest_all_by_priority(priority).await?;

    let ingested = outcomes.iter().filter(|o| matches!(o.result, legal_rag_core::ingestion::IngestResult::Ingested { .. })).count();
    let failed = outcomes.iter().filter(|o| matches!(o.result, legal_rag_core::ingestion::IngestResult::Failed { .. })).count();
    let skipped = outcomes.iter().filter(|o| matches!(o.result, legal_rag_core::ingestion::IngestResult::Skipped)).count();

    info!(total = outcomes.len(), ingested, failed, skipped, "ingestion run complete");
    Ok(())
}

/// Gracefully shutdown all components: reclaims any stale `ingesting` locks
/// so a restart doesn't leave sources permanently locked out.
async fn shutdown_components(app_state: &AppState) -> Result<()> {
    info!("shutting down components");
    let reclaimed = app_state.ingestion_orchestrator.reclaim_stale_locks().await?;
    if reclaimed > 0 {
        info!(reclaimed, "reclaimed stale ingesting locks on shutdown");
    }
    info!("all components shut down successfully");
    Ok(())
}
