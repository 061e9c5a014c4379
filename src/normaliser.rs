//! Maps one connector fetch to the canonical chunk form the store persists.
//!
//! When a connector finds structural units, each becomes one chunk. When it
//! finds none but the page has body text, a single fallback chunk
//! (`kind: FullText`, `is_fallback: true`) carries the whole document so the
//! source is still searchable. When there is neither, ingestion of that
//! document fails with `EmptyDocument` rather than silently dropping it.

use crate::connectors::ConnectorOutput;
use crate::errors::{CoreError, Result};
use crate::{ChunkKind, ChunkMetadata, CorpusSource, DocId, DocumentChunk, LegalDocument};
use uuid::Uuid;

/// Turns one connector output into a `LegalDocument` plus its chunks, not
/// yet embedded (embedding is a separate pipeline stage).
pub fn normalise(source: &CorpusSource, output: ConnectorOutput) -> Result<(LegalDocument, Vec<DocumentChunk>)> {
    let doc_id: DocId = Uuid::new_v4();

    let document = LegalDocument {
        id: doc_id,
        source_id: source.id,
        title: source.title.clone(),
        official_id: output.official_id.clone(),
        url: source.source_url.clone(),
        metadata: Default::default(),
    };

    let chunks = if !output.units.is_empty() {
        output
            .units
            .into_iter()
            .map(|unit| build_chunk(source, &document, unit.kind, unit.label, unit.text, Some(unit.position), output.publication_date))
            .collect::<Vec<_>>()
    } else if !output.body_text.trim().is_empty() {
        tracing::info!(
            component = "normaliser",
            source_id = source.id,
            stage = "normalise",
            event = "fallback_chunk",
            "no structural units found, emitting single full_text fallback chunk"
        );
        vec![build_chunk(
            source,
            &document,
            ChunkKind::FullText,
            source.title.clone(),
            output.body_text.clone(),
            Some(0),
            output.publication_date,
        )
        .with_fallback()]
    } else {
        tracing::warn!(
            component = "normaliser",
            source_id = source.id,
            stage = "normalise",
            event = "empty_document",
            official_id = %output.official_id,
            "no structural units and no body text, document is empty"
        );
        return Err(CoreError::EmptyDocument {
            official_id: output.official_id,
        });
    };

    for chunk in &chunks {
        chunk.validate_text_only()?;
    }

    Ok((document, chunks))
}

fn build_chunk(
    source: &CorpusSource,
    document: &LegalDocument,
    kind: ChunkKind,
    label: String,
    text: String,
    position: Option<usize>,
    publication_date: Option<chrono::NaiveDate>,
) -> DocumentChunk {
    let lexical_text = format!("{label} {text}");
    DocumentChunk {
        id: Uuid::new_v4(),
        document_id: document.id,
        kind,
        label,
        text,
        embedding: Vec::new(),
        metadata: ChunkMetadata {
            nature: source.nature,
            area: source.area.clone(),
            priority: source.priority,
            authority_level: source.authority_level,
            kind,
            scope: source.scope.clone(),
            doc_title: document.title.clone(),
            official_id: document.official_id.clone(),
            url: document.url.clone(),
            position,
            publication_date,
            is_fallback: false,
        },
        lexical_text,
    }
}

trait FallbackMarker {
    fn with_fallback(self) -> Self;
    fn validate_text_only(&self) -> Result<()>;
}

impl FallbackMarker for DocumentChunk {
    fn with_fallback(mut self) -> Self {
        self.metadata.is_fallback = true;
        self
    }

    /// Structural/text invariants checked before embedding is attached
    /// (embedding-dimension validation happens after the embedder runs).
    fn validate_text_only(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(crate::validation_error!("text", "chunk text is empty"));
        }
        if self.text.contains('\0') {
            return Err(crate::validation_error!(
                "text",
                "chunk text contains a NUL byte"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::StructuralUnit;
    use crate::{AuthorityLevel, Nature, Priority, SourceState};

    fn sample_source() -> CorpusSource {
        CorpusSource {
            id: 1,
            official_id: "BOE-A-2006-20764".into(),
            priority: Priority::P1,
            nature: Nature::Normativa,
            area: "Fiscal".into(),
            scope: "España".into(),
            authority_level: AuthorityLevel::Ley,
            title: "Ley del IRPF".into(),
            source_url: "https://boe.es/x".into(),
            document_kind: "ley".into(),
            state: SourceState::Ingesting,
            last_ingested_at: None,
            last_error: None,
        }
    }

    #[test]
    fn structural_units_each_become_one_chunk() {
        let source = sample_source();
        let output = ConnectorOutput {
            body_text: "texto completo".into(),
            units: vec![
                StructuralUnit {
                    kind: ChunkKind::Article,
                    label: "Artículo 1".into(),
                    text: "Objeto de la ley.".into(),
                    position: 0,
                },
                StructuralUnit {
                    kind: ChunkKind::Article,
                    label: "Artículo 2".into(),
                    text: "Ámbito de aplicación.".into(),
                    position: 1,
                },
            ],
            publication_date: None,
            official_id: "BOE-A-2006-20764".into(),
        };

        let (document, chunks) = normalise(&source, output).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(document.official_id, "BOE-A-2006-20764");
        assert!(!chunks[0].metadata.is_fallback);
    }

    #[test]
    fn no_structural_units_but_body_text_yields_one_fallback_chunk() {
        let source = sample_source();
        let output = ConnectorOutput {
            body_text: "Consolidated text with no recognisable article markers.".into(),
            units: vec![],
            publication_date: None,
            official_id: "BOE-A-2006-20764".into(),
        };

        let (_, chunks) = normalise(&source, output).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.is_fallback);
        assert_eq!(chunks[0].kind, ChunkKind::FullText);
    }

    #[test]
    fn neither_units_nor_body_text_is_an_empty_document_error() {
        let source = sample_source();
        let output = ConnectorOutput {
            body_text: "   ".into(),
            units: vec![],
            publication_date: None,
            official_id: "BOE-A-2006-20764".into(),
        };

        let err = normalise(&source, output).unwrap_err();
        assert!(matches!(err, CoreError::EmptyDocument { .. }));
    }
}
