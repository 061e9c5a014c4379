//! EUR-Lex connector: extracts `.eli-subdivision[data-type="article"]`
//! elements from a CELEX document page, preferring the Spanish-language
//! edition URL.

use super::{decode_utf8_body, fetch_bytes, ConnectorOutput, FetchHints, SourceConnector, StructuralUnit};
use crate::errors::Result;
use crate::ChunkKind;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;

pub struct EurLexConnector {
    client: reqwest::Client,
    user_agent: String,
}

impl EurLexConnector {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self { client, user_agent }
    }

    /// Ensures a EUR-Lex URL requests the Spanish-language rendition.
    pub fn spanish_edition_url(url: &str) -> String {
        if url.contains("uri=") && !url.contains("/ES/") && !url.contains("lang=ES") {
            if url.contains('?') {
                format!("{url}&language=ES")
            } else {
                format!("{url}?language=ES")
            }
        } else {
            url.to_string()
        }
    }

    fn parse_articles(document: &Html) -> Vec<StructuralUnit> {
        let selector = Selector::parse(r#".eli-subdivision[data-type="article"]"#).unwrap();
        let mut units = Vec::new();

        for (position, node) in document.select(&selector).enumerate() {
            let label = node
                .select(&Selector::parse(".eli-title, .oj-ti-art").unwrap())
                .next()
                .map(|h| h.text().collect::<String>().trim().to_string())
                .unwrap_or_else(|| format!("Artículo {}", position + 1));

            let text = node
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");

            if !text.is_empty() {
                units.push(StructuralUnit {
                    kind: ChunkKind::Article,
                    label,
                    text,
                    position,
                });
            }
        }

        units
    }
}

#[async_trait]
impl SourceConnector for EurLexConnector {
    fn name(&self) -> &'static str {
        "eurlex"
    }

    async fn fetch(&self, url: &str, hints: &FetchHints) -> Result<ConnectorOutput> {
        let url = Self::spanish_edition_url(url);
        let bytes = fetch_bytes(&self.client, &url, &self.user_agent).await?;
        let body = decode_utf8_body(&bytes, &url)?;
        let document = Html::parse_document(&body);

        let units = Self::parse_articles(&document);
        tracing::info!(
            component = "connectors::eurlex",
            stage = "parse",
            event = "ok",
            unit_count = units.len(),
            "parsed EUR-Lex document structure"
        );
        let body_text = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let official_id = hints
            .official_id
            .clone()
            .unwrap_or_else(|| extract_celex_id(&body).unwrap_or_else(|| url.clone()));

        Ok(ConnectorOutput {
            body_text,
            units,
            publication_date: None,
            official_id,
        })
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(500)
    }
}

fn extract_celex_id(body: &str) -> Option<String> {
    let re = regex::Regex::new(r"[Cc][Ee][Ll][Ee][Xx]:(\d[A-Z0-9]+)").ok()?;
    re.captures(body).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_eli_subdivision_articles() {
        let html = r#"
            <html><body>
                <div class="eli-subdivision" data-type="article">
                    <p class="oj-ti-art">Artículo 1</p>
                    <p>Objeto y ámbito de aplicación.</p>
                </div>
                <div class="eli-subdivision" data-type="article">
                    <p class="oj-ti-art">Artículo 2</p>
                    <p>Definiciones.</p>
                </div>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let units = EurLexConnector::parse_articles(&document);
        assert_eq!(units.len(), 2);
        assert!(units[0].text.contains("ámbito de aplicación"));
    }

    #[test]
    fn spanish_edition_url_appends_language_param() {
        let url = EurLexConnector::spanish_edition_url(
            "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=CELEX:32016R0679",
        );
        assert!(url.ends_with("language=ES"));
    }

    #[test]
    fn extract_celex_id_matches_standard_celex_pattern() {
        let id = extract_celex_id("Este documento CELEX:32016R0679 es...");
        assert_eq!(id, Some("32016R0679".to_string()));
    }
}
