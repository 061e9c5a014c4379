//! # API Server Module
//!
//! ## Purpose
//! REST API surface around the RAG core (spec §6): a grounded chat
//! endpoint, a plain hybrid search endpoint, and read-only catalog
//! endpoints for sources and ingested documents.
//!
//! ## Key Features
//! - JSON request/response contracts matching the service's public API
//! - Query-length validation at the boundary (spec §6 `QUERY_TOO_SHORT`/`QUERY_TOO_LONG`)
//! - Structured `{success, error: {code, message}}` error envelope
//! - CORS support for web frontends

use crate::errors::CoreError;
use crate::search::{SearchFilter, SearchQuery, SearchResult};
use crate::store::{Page, SourceFilter};
use crate::{AppState, CorpusSource, DocumentChunk, LegalDocument, Nature, Priority, SourceState};
use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};

pub struct ApiServer {
    app_state: AppState,
}

impl ApiServer {
    pub fn new(app_state: AppState) -> Self {
        Self { app_state }
    }

    pub async fn run(self) -> crate::errors::Result<()> {
        let bind_addr = format!("{}:{}", self.app_state.config.server.host, self.app_state.config.server.port);
        let enable_cors = self.app_state.config.server.enable_cors;

        tracing::info!(bind_addr = %bind_addr, "starting API server");

        HttpServer::new(move || {
            let mut app = App::new().app_data(web::Data::new(self.app_state.clone()));
            if enable_cors {
                app = app.wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header(),
                );
            }
            app.route("/chat", web::post().to(chat_handler))
                .route("/search", web::post().to(search_handler))
                .route("/sources", web::get().to(list_sources_handler))
                .route("/documents/{official_id}", web::get().to(get_document_handler))
                .route("/health", web::get().to(health_handler))
        })
        .bind(&bind_addr)
        .map_err(|e| CoreError::Config {
            message: format!("failed to bind server to {bind_addr}: {e}"),
        })?
        .run()
        .await
        .map_err(|e| CoreError::Internal {
            message: format!("server error: {e}"),
        })?;

        Ok(())
    }
}

/// Uniform error envelope for every non-2xx response (spec §6).
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn error_response(err: CoreError) -> HttpResponse {
    let code = err.api_error_code().unwrap_or("INTERNAL_ERROR");
    let body = ErrorBody {
        success: false,
        error: ErrorDetail {
            code: code.to_string(),
            message: err.to_string(),
        },
    };

    match code {
        "QUERY_TOO_SHORT" | "QUERY_TOO_LONG" | "VALIDATION_ERROR" => HttpResponse::BadRequest().json(body),
        "RATE_LIMIT_EXCEEDED" => HttpResponse::TooManyRequests().json(body),
        _ => {
            tracing::error!(error = %err, "internal error serving request");
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn validate_query_length(query: &str, min: usize, max: usize) -> crate::errors::Result<()> {
    let len = query.trim().chars().count();
    if len < min {
        return Err(CoreError::QueryTooShort { len, min });
    }
    if len > max {
        return Err(CoreError::QueryTooLong { len, max });
    }
    Ok(())
}

// -- /chat --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatFilters {
    area: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    session_id: Option<String>,
    #[serde(default)]
    filters: Option<ChatFilters>,
}

async fn chat_handler(app_state: web::Data<AppState>, request: web::Json<ChatRequest>) -> HttpResponse {
    let min = app_state.config.search.min_query_length;
    let max = app_state.config.search.max_query_length;
    if let Err(err) = validate_query_length(&request.query, min, max) {
        return error_response(err);
    }

    let explicit_area = request.filters.as_ref().and_then(|f| f.area.as_deref());

    match app_state
        .rag_orchestrator
        .answer_query_with_area(&request.query, request.session_id.clone(), explicit_area)
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => error_response(err),
    }
}

// -- /search --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchRequestBody {
    query: String,
    #[serde(default)]
    filters: Option<SearchFilter>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResultView {
    id: String,
    doc_title: String,
    official_id: String,
    url: String,
    nature: String,
    authority_level: String,
    area: String,
    similarity: f32,
    text: String,
}

#[derive(Debug, Serialize)]
struct SearchResponseBody {
    results: Vec<SearchResultView>,
    total: usize,
    query_time_ms: u64,
}

const MAX_SEARCH_LIMIT: usize = 100;

fn to_search_result_view(result: SearchResult) -> SearchResultView {
    SearchResultView {
        id: result.chunk.id.to_string(),
        doc_title: result.chunk.metadata.doc_title,
        official_id: result.chunk.metadata.official_id,
        url: result.chunk.metadata.url,
        nature: result.chunk.metadata.nature.as_str().to_string(),
        authority_level: result.chunk.metadata.authority_level.as_str().to_string(),
        area: result.chunk.metadata.area,
        similarity: result.reranked_score,
        text: result.chunk.text,
    }
}

async fn search_handler(app_state: web::Data<AppState>, request: web::Json<SearchRequestBody>) -> HttpResponse {
    let min = app_state.config.search.min_query_length;
    let max = app_state.config.search.max_query_length;
    if let Err(err) = validate_query_length(&request.query, min, max) {
        return error_response(err);
    }

    let limit = request.limit.unwrap_or(10).min(MAX_SEARCH_LIMIT);
    let started = std::time::Instant::now();

    let query = SearchQuery {
        text: request.query.clone(),
        filter: request.filters.clone().unwrap_or_default(),
        k: limit,
    };

    match app_state.search_engine.search(&query).await {
        Ok(results) => {
            let query_time_ms = started.elapsed().as_millis() as u64;
            let response = SearchResponseBody {
                total: results.len(),
                results: results.into_iter().map(to_search_result_view).collect(),
                query_time_ms,
            };
            HttpResponse::Ok().json(response)
        }
        Err(err) => error_response(err),
    }
}

// -- /sources --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SourcesQuery {
    offset: Option<usize>,
    limit: Option<usize>,
    priority: Option<String>,
    nature: Option<String>,
    area: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct SourcesResponseBody {
    sources: Vec<CorpusSource>,
    total: usize,
}

fn parse_priority(value: &str) -> crate::errors::Result<Priority> {
    match value {
        "P1" => Ok(Priority::P1),
        "P2" => Ok(Priority::P2),
        "P3" => Ok(Priority::P3),
        other => Err(crate::validation_error!("priority", format!("unknown priority '{other}'"))),
    }
}

fn parse_source_state(value: &str) -> crate::errors::Result<SourceState> {
    match value {
        "pending" => Ok(SourceState::Pending),
        "ingesting" => Ok(SourceState::Ingesting),
        "ingested" => Ok(SourceState::Ingested),
        "failed" => Ok(SourceState::Failed),
        "skipped" => Ok(SourceState::Skipped),
        other => Err(crate::validation_error!("state", format!("unknown state '{other}'"))),
    }
}

async fn list_sources_handler(app_state: web::Data<AppState>, query: web::Query<SourcesQuery>) -> HttpResponse {
    let filter_result = (|| -> crate::errors::Result<SourceFilter> {
        Ok(SourceFilter {
            priority: query.priority.as_deref().map(parse_priority).transpose()?,
            nature: query
                .nature
                .as_deref()
                .map(|n| n.parse::<Nature>())
                .transpose()?,
            area: query.area.clone(),
            state: query.state.as_deref().map(parse_source_state).transpose()?,
        })
    })();

    let filter = match filter_result {
        Ok(f) => f,
        Err(err) => return error_response(err),
    };

    let page = Page {
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(50),
    };

    match app_state.store.list_sources(&filter, page).await {
        Ok(sources) => HttpResponse::Ok().json(SourcesResponseBody {
            total: sources.len(),
            sources,
        }),
        Err(err) => error_response(err),
    }
}

// -- /documents/{official_id} -----------------------------------------------

#[derive(Debug, Serialize)]
struct DocumentResponseBody {
    document: LegalDocument,
    chunks: Vec<DocumentChunk>,
}

async fn get_document_handler(app_state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let official_id = path.into_inner();
    match app_state.store.get_document(&official_id).await {
        Ok(Some(with_chunks)) => HttpResponse::Ok().json(DocumentResponseBody {
            document: with_chunks.document,
            chunks: with_chunks.chunks,
        }),
        Ok(None) => error_response(CoreError::RetrievalError {
            message: format!("no document found for official_id '{official_id}'"),
        }),
        Err(err) => error_response(err),
    }
}

// -- /health --------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponseBody {
    status: String,
    store: String,
}

async fn health_handler(app_state: web::Data<AppState>) -> HttpResponse {
    let store_status = match app_state.store.health_check().await {
        Ok(_) => "healthy",
        Err(err) => {
            tracing::warn!(error = %err, "store health check failed");
            "unhealthy"
        }
    };

    let status = if store_status == "healthy" { "healthy" } else { "unhealthy" };
    let body = HealthResponseBody {
        status: status.to_string(),
        store: store_status.to_string(),
    };

    if status == "healthy" {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_length_validation_matches_spec_bounds() {
        assert!(validate_query_length("corta", 10, 500).is_err());
        assert!(validate_query_length(&"a".repeat(501), 10, 500).is_err());
        assert!(validate_query_length("una consulta de longitud razonable", 10, 500).is_ok());
    }

    #[test]
    fn parse_priority_rejects_unknown_values() {
        assert!(parse_priority("P1").is_ok());
        assert!(parse_priority("P9").is_err());
    }

    #[test]
    fn parse_source_state_accepts_lowercase_names() {
        assert_eq!(parse_source_state("ingested").unwrap(), SourceState::Ingested);
        assert!(parse_source_state("Ingested").is_err());
    }
}
