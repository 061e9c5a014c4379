//! BOE (Boletín Oficial del Estado) connector.
//!
//! BOE publishes consolidated legal text in at least two HTML layouts:
//! a "sibling" layout where each article heading (`h3`/`h4`/`h5.articulo`)
//! is immediately followed by one or more `p.parrafo` paragraphs, and a
//! "container"/ELI layout where each article is its own
//! `article[id^="art"]` element. When neither structural marker is found,
//! falls back to a generic heading scan, and if that also yields nothing,
//! the normaliser's fallback-chunk policy takes over.

use super::{decode_utf8_body, fetch_bytes, ConnectorOutput, FetchHints, SourceConnector, StructuralUnit};
use crate::errors::{CoreError, Result};
use crate::ChunkKind;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;

pub struct BoeConnector {
    client: reqwest::Client,
    user_agent: String,
}

impl BoeConnector {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self { client, user_agent }
    }

    /// Derives the canonical HTML consolidation URL for a BOE `official_id`
    /// like `BOE-A-2006-20764`, used when a catalog entry only points at a
    /// PDF rendition.
    pub fn derive_html_url(official_id: &str) -> String {
        format!("https://www.boe.es/buscar/doc.php?id={official_id}")
    }

    /// Whether `url` points at a PDF rendition rather than the HTML
    /// consolidation BOE also publishes for the same document.
    fn is_pdf_url(url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.ends_with(".pdf") || lower.contains("/pdf/")
    }

    fn parse_sibling_layout(document: &Html) -> Vec<StructuralUnit> {
        let heading_selector = Selector::parse("h3.articulo, h4.articulo, h5.articulo").unwrap();
        let mut units = Vec::new();

        for (position, heading) in document.select(&heading_selector).enumerate() {
            let label = heading.text().collect::<String>().trim().to_string();
            if label.is_empty() {
                continue;
            }

            let mut text = String::new();
            let mut sibling = heading.next_sibling();
            while let Some(node) = sibling {
                if let Some(el) = scraper::ElementRef::wrap(node) {
                    let tag = el.value().name();
                    if tag.starts_with('h') && el.value().has_class("articulo", scraper::CaseSensitivity::AsciiCaseInsensitive) {
                        break;
                    }
                    if tag == "p"
                        && el
                            .value()
                            .has_class("parrafo", scraper::CaseSensitivity::AsciiCaseInsensitive)
                    {
                        let paragraph = el.text().collect::<String>();
                        if !paragraph.trim().is_empty() {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(paragraph.trim());
                        }
                    }
                }
                sibling = node.next_sibling();
            }

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

    fn parse_container_layout(document: &Html) -> Vec<StructuralUnit> {
        let article_selector = Selector::parse(r#"article[id^="art"]"#).unwrap();
        let mut units = Vec::new();

        for (position, article) in document.select(&article_selector).enumerate() {
            let label = article
                .select(&Selector::parse("h1, h2, h3, .heading").unwrap())
                .next()
                .map(|h| h.text().collect::<String>().trim().to_string())
                .unwrap_or_else(|| format!("Artículo {}", position + 1));

            let text = article
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

    /// Last-resort structural scan: any heading-like element followed by
    /// text, used when neither the sibling nor container layout matches.
    fn parse_heading_fallback(document: &Html) -> Vec<StructuralUnit> {
        let selector = Selector::parse("h1, h2, h3, h4, h5, h6").unwrap();
        let mut units = Vec::new();

        for (position, heading) in document.select(&selector).enumerate() {
            let label = heading.text().collect::<String>().trim().to_string();
            if label.is_empty() {
                continue;
            }
            let mut text = String::new();
            let mut sibling = heading.next_sibling();
            while let Some(node) = sibling {
                if scraper::ElementRef::wrap(node)
                    .map(|el| el.value().name().starts_with('h'))
                    .unwrap_or(false)
                {
                    break;
                }
                if let Some(el) = scraper::ElementRef::wrap(node) {
                    let chunk = el.text().collect::<String>();
                    if !chunk.trim().is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(chunk.trim());
                    }
                }
                sibling = node.next_sibling();
            }
            if !text.is_empty() {
                units.push(StructuralUnit {
                    kind: ChunkKind::Section,
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
impl SourceConnector for BoeConnector {
    fn name(&self) -> &'static str {
        "boe"
    }

    async fn fetch(&self, url: &str, hints: &FetchHints) -> Result<ConnectorOutput> {
        // BOE catalog entries sometimes point at a PDF rendition. BOE also
        // publishes an HTML consolidation of the same document, and the
        // connector must never store PDF binary content, so redirect to
        // the canonical HTML URL instead of fetching the PDF.
        let fetch_url = if Self::is_pdf_url(url) {
            let official_id = hints.official_id.as_deref().ok_or_else(|| CoreError::FetchError {
                url: url.to_string(),
                details: "PDF source has no official_id hint to derive the HTML URL from".to_string(),
                permanent: true,
            })?;
            Self::derive_html_url(official_id)
        } else {
            url.to_string()
        };

        let bytes = fetch_bytes(&self.client, &fetch_url, &self.user_agent).await?;
        let body = decode_utf8_body(&bytes, &fetch_url)?;
        let document = Html::parse_document(&body);

        let mut layout = "sibling";
        let mut units = Self::parse_sibling_layout(&document);
        if units.is_empty() {
            layout = "container";
            units = Self::parse_container_layout(&document);
        }
        if units.is_empty() {
            layout = "heading_fallback";
            units = Self::parse_heading_fallback(&document);
        }
        tracing::info!(
            component = "connectors::boe",
            stage = "parse",
            event = "ok",
            layout,
            unit_count = units.len(),
            "parsed BOE document structure"
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
            .unwrap_or_else(|| extract_official_id(&body).unwrap_or_else(|| url.to_string()));

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

fn extract_official_id(body: &str) -> Option<String> {
    let re = regex::Regex::new(r"BOE-[A-Z]-\d{4}-\d+").ok()?;
    re.find(body).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_layout_groups_paragraphs_under_their_heading() {
        let html = r#"
            <html><body>
                <h3 class="articulo">Artículo 1. Objeto.</h3>
                <p class="parrafo">La presente ley regula el régimen fiscal.</p>
                <p class="parrafo">Se aplica a todo el territorio nacional.</p>
                <h3 class="articulo">Artículo 2. Ámbito.</h3>
                <p class="parrafo">Ámbito de aplicación subjetivo.</p>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let units = BoeConnector::parse_sibling_layout(&document);
        assert_eq!(units.len(), 2);
        assert!(units[0].text.contains("régimen fiscal"));
        assert!(units[0].text.contains("territorio nacional"));
        assert_eq!(units[1].label, "Artículo 2. Ámbito.");
    }

    #[test]
    fn container_layout_extracts_article_elements() {
        let html = r#"
            <html><body>
                <article id="art1"><h2>Artículo 1</h2><p>Texto del primero.</p></article>
                <article id="art2"><h2>Artículo 2</h2><p>Texto del segundo.</p></article>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let units = BoeConnector::parse_container_layout(&document);
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn derive_html_url_builds_consolidation_link() {
        let url = BoeConnector::derive_html_url("BOE-A-2006-20764");
        assert_eq!(url, "https://www.boe.es/buscar/doc.php?id=BOE-A-2006-20764");
    }

    #[test]
    fn pdf_urls_are_detected_for_redirection() {
        assert!(BoeConnector::is_pdf_url("https://www.boe.es/boe/dias/1978/12/29/pdfs/A29313-29424.pdf"));
        assert!(BoeConnector::is_pdf_url("https://www.boe.es/pdf/1978/BOE-A-1978-31229.PDF".to_lowercase().as_str()));
        assert!(!BoeConnector::is_pdf_url("https://www.boe.es/buscar/doc.php?id=BOE-A-1978-31229"));
    }

    #[test]
    fn extract_official_id_finds_boe_pattern_in_body() {
        let id = extract_official_id("Referencia: BOE-A-2006-20764 publicado...");
        assert_eq!(id, Some("BOE-A-2006-20764".to_string()));
    }
}
