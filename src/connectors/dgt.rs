//! DGT (Dirección General de Tributos) connector: extracts consulta/
//! contestacion pairs from a binding-ruling ("consulta vinculante") page,
//! deriving the ruling code from the URL path.

use super::{decode_utf8_body, fetch_bytes, ConnectorOutput, FetchHints, SourceConnector, StructuralUnit};
use crate::errors::Result;
use crate::ChunkKind;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;

pub struct DgtConnector {
    client: reqwest::Client,
    user_agent: String,
}

impl DgtConnector {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self { client, user_agent }
    }

    /// Derives a ruling code like `V1234-23` from a consulta URL path.
    pub fn ruling_code_from_url(url: &str) -> Option<String> {
        let re = regex::Regex::new(r"[VS]\d{3,5}-\d{2}").ok()?;
        re.find(url).map(|m| m.as_str().to_string())
    }

    fn parse_pairs(document: &Html) -> Vec<StructuralUnit> {
        let mut units = Vec::new();

        if let Ok(selector) = Selector::parse(".consulta, #consulta") {
            if let Some(node) = document.select(&selector).next() {
                let text = clean_text(&node.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    units.push(StructuralUnit {
                        kind: ChunkKind::Consulta,
                        label: "Consulta".to_string(),
                        text,
                        position: 0,
                    });
                }
            }
        }

        if let Ok(selector) = Selector::parse(".contestacion, #contestacion") {
            if let Some(node) = document.select(&selector).next() {
                let text = clean_text(&node.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    units.push(StructuralUnit {
                        kind: ChunkKind::Contestacion,
                        label: "Contestación".to_string(),
                        text,
                        position: 1,
                    });
                }
            }
        }

        units
    }
}

fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SourceConnector for DgtConnector {
    fn name(&self) -> &'static str {
        "dgt"
    }

    async fn fetch(&self, url: &str, hints: &FetchHints) -> Result<ConnectorOutput> {
        let bytes = fetch_bytes(&self.client, url, &self.user_agent).await?;
        let body = decode_utf8_body(&bytes, url)?;
        let document = Html::parse_document(&body);

        let units = Self::parse_pairs(&document);
        tracing::info!(
            component = "connectors::dgt",
            stage = "parse",
            event = "ok",
            unit_count = units.len(),
            "parsed DGT ruling structure"
        );
        let body_text = clean_text(&document.root_element().text().collect::<Vec<_>>().join(" "));

        let official_id = hints
            .official_id
            .clone()
            .or_else(|| Self::ruling_code_from_url(url))
            .unwrap_or_else(|| url.to_string());

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruling_code_from_url_extracts_v_code() {
        let code = DgtConnector::ruling_code_from_url(
            "https://petete.tributos.hacienda.gob.es/consultas/V1234-23.html",
        );
        assert_eq!(code, Some("V1234-23".to_string()));
    }

    #[test]
    fn parse_pairs_extracts_both_consulta_and_contestacion() {
        let html = r#"
            <html><body>
                <div class="consulta">Un artista reside en Madrid y factura a clientes en Francia.</div>
                <div class="contestacion">Procede aplicar el régimen general de IVA.</div>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let units = DgtConnector::parse_pairs(&document);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].kind, ChunkKind::Consulta);
        assert_eq!(units[1].kind, ChunkKind::Contestacion);
    }
}
