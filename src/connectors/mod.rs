//! Source connectors: one per official publication site (BOE, EUR-Lex,
//! DGT), each turning a source URL into raw HTML plus the structural units
//! the normaliser will turn into chunks.
//!
//! The trait keeps the same async-fetch shape as a generic data-source
//! abstraction, but narrows the contract to what the normaliser actually
//! needs: the page's UTF-8 text plus zero or more pre-split structural
//! units, rather than a generic opaque document blob.

pub mod boe;
pub mod dgt;
pub mod eurlex;

use crate::errors::{CoreError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// One structurally identifiable unit of a legal document — an article, a
/// disposition, a consulta/contestacion pair — found in the raw HTML.
#[derive(Debug, Clone)]
pub struct StructuralUnit {
    pub kind: crate::ChunkKind,
    pub label: String,
    pub text: String,
    pub position: usize,
}

/// Everything a connector extracts from one source document fetch.
#[derive(Debug, Clone)]
pub struct ConnectorOutput {
    /// The page's plain-text body, used as the fallback chunk's text when no
    /// structural units are found.
    pub body_text: String,
    pub units: Vec<StructuralUnit>,
    /// Best-effort publication date parsed from the page, if present.
    pub publication_date: Option<chrono::NaiveDate>,
    /// The resolved official_id, either the hint or one derived from the page.
    pub official_id: String,
}

/// A hint bundle passed into `fetch`, since a `CorpusSource` catalog entry
/// may carry an `official_id` that the connector must confirm or correct
/// against what the page itself declares.
#[derive(Debug, Clone)]
pub struct FetchHints {
    pub official_id: Option<String>,
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Fetches and structurally parses the document at `url`.
    ///
    /// Connectors must reject non-UTF-8 responses and any response whose
    /// decoded body contains a NUL byte before returning it, per the chunk
    /// text invariant downstream.
    async fn fetch(&self, url: &str, hints: &FetchHints) -> Result<ConnectorOutput>;

    /// Minimum delay to hold between two fetches against this connector's
    /// host, used by the ingestion orchestrator's per-host pacing.
    fn min_interval(&self) -> Duration {
        Duration::from_millis(500)
    }
}

/// Shared UTF-8/NUL-byte enforcement every connector applies to a raw
/// response body before parsing it.
pub(crate) fn decode_utf8_body(bytes: &[u8], url: &str) -> Result<String> {
    let text = String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::UnsupportedEncoding {
        encoding: "non-utf8 response body".to_string(),
    })?;
    if text.contains('\0') {
        return Err(CoreError::ParseError {
            official_id: url.to_string(),
            details: "response body contains a NUL byte".to_string(),
        });
    }
    Ok(text)
}

/// Shared HTTP GET with the connector's identifying headers, used by every
/// connector implementation.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    user_agent: &str,
) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, user_agent)
        .send()
        .await
        .map_err(|e| CoreError::FetchError {
            url: url.to_string(),
            details: e.to_string(),
            permanent: e.status().map(|s| s.is_client_error()).unwrap_or(false),
        })?;

    if !response.status().is_success() {
        let status = response.status();
        // Spec §7: 4xx is permanent except 429 (rate limit), which is
        // retried with backoff like a 5xx.
        let permanent = status.is_client_error() && status.as_u16() != 429;
        return Err(CoreError::FetchError {
            url: url.to_string(),
            details: format!("HTTP {status}"),
            permanent,
        });
    }

    response.bytes().await.map(|b| b.to_vec()).map_err(|e| CoreError::FetchError {
        url: url.to_string(),
        details: e.to_string(),
        permanent: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_utf8_body_rejects_nul_bytes() {
        let err = decode_utf8_body(b"hola\0mundo", "https://boe.es/x").unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn decode_utf8_body_rejects_invalid_utf8() {
        let err = decode_utf8_body(&[0xff, 0xfe, 0x00], "https://boe.es/x").unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn decode_utf8_body_accepts_valid_spanish_text() {
        let text = decode_utf8_body("Artículo 1º régimen jurídico".as_bytes(), "https://boe.es/x")
            .unwrap();
        assert!(text.contains("Artículo"));
    }
}
