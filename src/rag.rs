//! RAG orchestrator: ties intent classification, hierarchical retrieval,
//! prompt assembly, and generation together into one `answer_query` call.

use crate::errors::Result;
use crate::generator::{fallback_answer, Generate};
use crate::intent;
use crate::search::{HierarchicalResults, SearchEngine, SearchResult};
use crate::Nature;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One full-text source paragraph cited in an answer (spec §6 `/chat`
/// response contract). Carries enough of the chunk's denormalised metadata
/// for a client to render a citation list without a follow-up lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedSource {
    /// Stable identifier of the underlying chunk.
    pub id: String,
    /// `normativa` | `doctrina` | `jurisprudencia`, lowercase for API stability.
    pub category: String,
    /// e.g. "N1", "D2", "J1" — nature-prefixed, 1-indexed within its bucket.
    pub reference_label: String,
    /// Alias of `reference_label` kept for backward display compatibility.
    pub label: String,
    pub doc_title: String,
    pub official_id: String,
    pub url: String,
    pub authority_level: String,
    pub nature: String,
    /// Cosine-similarity-derived relevance score after authority reranking.
    pub similarity: f32,
    /// Display excerpt, truncated for compact rendering.
    pub text: String,
    /// Full, untruncated chunk text.
    pub full_text: String,
}

/// Per-bucket counts surfaced in `/chat` responses so a client can tell
/// "nothing found" apart from "found but not cited" (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketCounts {
    pub normativa: usize,
    pub doctrina: usize,
    pub jurisprudencia: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub area: Option<String>,
    pub model: String,
    pub counts_per_bucket: BucketCounts,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<CitedSource>,
    pub session_id: String,
    pub metadata: AnswerMetadata,
    /// Whether `answer` came from the generator, as opposed to the
    /// deterministic fallback template.
    pub generated: bool,
}

const COMPONENT: &str = "rag_orchestrator";

const GREETING_KEYWORDS: &[&str] = &["hola", "buenos dias", "buenas tardes", "buenas noches", "que tal", "saludos"];

/// Generic legal-content markers checked in addition to `intent::classify`,
/// so a greeting opener followed by a substantive legal question is never
/// swallowed by the short-circuit just because the intent classifier's
/// per-area keyword tables don't happen to cover the exact wording used.
const LEGAL_SIGNAL_TOKENS: &[&str] = &[
    "articulo", "ley", "decreto", "normativa", "jurisprudencia", "sentencia",
    "tribunal", "derecho", "obligacion", "requisito", "deducir", "deducible",
    "sancion", "multa", "recurso", "demanda", "contrato", "licencia",
    "subvencion", "boe",
];

const EXCERPT_CHARS: usize = 320;

/// Cap applied to chunk text serialised into the generation prompt
/// (spec §4.8 step 4e: "truncated text, cap at 800-1000 characters per
/// chunk").
const PROMPT_CHUNK_CHARS: usize = 900;

pub struct RagOrchestrator {
    search_engine: Arc<SearchEngine>,
    generator: Arc<dyn Generate>,
    model_name: String,
}

impl RagOrchestrator {
    pub fn new(search_engine: Arc<SearchEngine>, generator: Arc<dyn Generate>, model_name: String) -> Self {
        Self {
            search_engine,
            generator,
            model_name,
        }
    }

    /// A query short-circuits to the canned greeting only if it *opens*
    /// with a greeting phrase AND carries no legal-area signal at all
    /// (spec §4.8 step 2: "pure greeting (no legal keywords)"). A greeting
    /// prefix alone is not sufficient — "Buenos días, ¿puedo deducir
    /// gastos de home studio?" must still go to retrieval.
    fn is_greeting(query: &str) -> bool {
        let folded = crate::store::lexical::fold_accents(query);
        let trimmed = folded.trim();
        let opens_with_greeting = GREETING_KEYWORDS
            .iter()
            .any(|kw| trimmed == *kw || trimmed.starts_with(kw));
        if !opens_with_greeting {
            return false;
        }
        if intent::classify(query).is_some() {
            return false;
        }
        !LEGAL_SIGNAL_TOKENS.iter().any(|token| trimmed.contains(token))
    }

    /// End-to-end question answering: classify → (greeting short-circuit)
    /// → hierarchical retrieval → prompt assembly → generation → cited
    /// source formatting.
    ///
    /// `session_id` is accepted but not interpreted: the core keeps no
    /// cross-turn conversational state (spec §3), it is only echoed back so
    /// a caller can correlate turns on their own side.
    pub async fn answer_query(&self, query: &str, session_id: Option<String>) -> Result<AnswerResponse> {
        self.answer_query_with_area(query, session_id, None).await
    }

    /// Same as `answer_query`, but an explicit `area` (from the caller's
    /// `filters.area`, spec §6 `/chat`) overrides the intent classifier's
    /// result instead of being combined with it.
    pub async fn answer_query_with_area(
        &self,
        query: &str,
        session_id: Option<String>,
        explicit_area: Option<&str>,
    ) -> Result<AnswerResponse> {
        let started = Instant::now();
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if Self::is_greeting(query) {
            return Ok(AnswerResponse {
                answer: "Hola, soy un asistente de consulta sobre normativa, doctrina y \
jurisprudencia relevante para artistas y profesionales de la cultura en España. ¿En qué \
puedo ayudarte?"
                    .to_string(),
                sources: Vec::new(),
                session_id,
                metadata: AnswerMetadata {
                    area: None,
                    model: self.model_name.clone(),
                    counts_per_bucket: BucketCounts::default(),
                    response_time_ms: elapsed_ms(started),
                },
                generated: false,
            });
        }

        let classify_started = Instant::now();
        let area = intent::classify(query);
        let area_str = explicit_area.or_else(|| area.map(|a| a.as_str()));
        tracing::info!(
            component = COMPONENT,
            stage = "classify",
            event = "ok",
            duration_ms = elapsed_ms(classify_started),
            area = area_str.unwrap_or("none"),
            "query classified"
        );

        let retrieved = self
            .search_engine
            .search_hierarchical(query, area_str)
            .await?;

        let counts = BucketCounts {
            normativa: retrieved.normativa.len(),
            doctrina: retrieved.doctrina.len(),
            jurisprudencia: retrieved.jurisprudencia.len(),
        };

        if retrieved.is_empty() {
            return Ok(AnswerResponse {
                answer: fallback_answer(false, false, false),
                sources: Vec::new(),
                session_id,
                metadata: AnswerMetadata {
                    area: area_str.map(|s| s.to_string()),
                    model: self.model_name.clone(),
                    counts_per_bucket: counts,
                    response_time_ms: elapsed_ms(started),
                },
                generated: false,
            });
        }

        let sources = cite_sources(&retrieved);
        let prompt = build_prompt(query, &retrieved, &sources);

        let generate_started = Instant::now();
        let (answer, generated) = match self.generator.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::info!(
                    component = COMPONENT,
                    stage = "generate",
                    event = "ok",
                    duration_ms = elapsed_ms(generate_started),
                    "generation completed"
                );
                (text, true)
            }
            Ok(_) => {
                tracing::warn!(
                    component = COMPONENT,
                    stage = "generate",
                    event = "empty_completion",
                    duration_ms = elapsed_ms(generate_started),
                    "generator returned an empty completion, using deterministic fallback answer"
                );
                (
                    fallback_answer(
                        !retrieved.normativa.is_empty(),
                        !retrieved.doctrina.is_empty(),
                        !retrieved.jurisprudencia.is_empty(),
                    ),
                    false,
                )
            }
            Err(err) => {
                tracing::warn!(
                    component = COMPONENT,
                    stage = "generate",
                    event = "error",
                    duration_ms = elapsed_ms(generate_started),
                    error = %err,
                    "generation failed, using deterministic fallback answer"
                );
                (
                    fallback_answer(
                        !retrieved.normativa.is_empty(),
                        !retrieved.doctrina.is_empty(),
                        !retrieved.jurisprudencia.is_empty(),
                    ),
                    false,
                )
            }
        };

        Ok(AnswerResponse {
            answer,
            sources,
            session_id,
            metadata: AnswerMetadata {
                area: area_str.map(|s| s.to_string()),
                model: self.model_name.clone(),
                counts_per_bucket: counts,
                response_time_ms: elapsed_ms(started),
            },
            generated,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn label_prefix(nature: Nature) -> &'static str {
    match nature {
        Nature::Normativa => "N",
        Nature::Doctrina => "D",
        Nature::Jurisprudencia => "J",
    }
}

fn category_of(nature: Nature) -> &'static str {
    match nature {
        Nature::Normativa => "normativa",
        Nature::Doctrina => "doctrina",
        Nature::Jurisprudencia => "jurisprudencia",
    }
}

fn cite_sources(retrieved: &HierarchicalResults) -> Vec<CitedSource> {
    let mut sources = Vec::new();
    for bucket in [&retrieved.normativa, &retrieved.doctrina, &retrieved.jurisprudencia] {
        for (i, result) in bucket.iter().enumerate() {
            sources.push(to_cited_source(result, i + 1));
        }
    }
    sources
}

fn to_cited_source(result: &SearchResult, index: usize) -> CitedSource {
    let nature = result.chunk.metadata.nature;
    let prefix = label_prefix(nature);
    let label = format!("{prefix}{index}");
    let excerpt: String = result.chunk.text.chars().take(EXCERPT_CHARS).collect();
    CitedSource {
        id: result.chunk.id.to_string(),
        category: category_of(nature).to_string(),
        reference_label: label.clone(),
        label,
        doc_title: result.chunk.metadata.doc_title.clone(),
        official_id: result.chunk.metadata.official_id.clone(),
        url: result.chunk.metadata.url.clone(),
        authority_level: result.chunk.metadata.authority_level.as_str().to_string(),
        nature: nature.as_str().to_string(),
        similarity: result.reranked_score,
        text: excerpt,
        full_text: result.chunk.text.clone(),
    }
}

/// Builds the generation prompt: legal-hierarchy-ordered context blocks
/// with their citation labels, a no-fabrication instruction, and the
/// structured answer template the generator is asked to fill in.
fn build_prompt(query: &str, retrieved: &HierarchicalResults, sources: &[CitedSource]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Eres un asistente que responde preguntas legales y fiscales para artistas y \
profesionales de la cultura en España, basándote únicamente en las fuentes proporcionadas \
a continuación. Respeta la jerarquía normativa (Normativa > Doctrina administrativa > \
Jurisprudencia) y no inventes ninguna afirmación que no esté respaldada por una de las \
fuentes citadas.\n\n",
    );

    prompt.push_str(&format!("Pregunta: {query}\n\n"));
    prompt.push_str("Fuentes:\n");
    for (results, bucket_name) in [
        (&retrieved.normativa, "Normativa"),
        (&retrieved.doctrina, "Doctrina administrativa"),
        (&retrieved.jurisprudencia, "Jurisprudencia"),
    ] {
        if results.is_empty() {
            continue;
        }
        prompt.push_str(&format!("\n[{bucket_name}]\n"));
        for (i, result) in results.iter().enumerate() {
            let prefix = label_prefix(result.chunk.metadata.nature);
            let text: String = result.chunk.text.chars().take(PROMPT_CHUNK_CHARS).collect();
            prompt.push_str(&format!(
                "{prefix}{idx}. {label} — {title} ({official_id}, {authority}): {text}\n",
                idx = i + 1,
                label = result.chunk.label,
                title = result.chunk.metadata.doc_title,
                official_id = result.chunk.metadata.official_id,
                authority = result.chunk.metadata.authority_level.as_str(),
            ));
        }
    }

    prompt.push_str(&format!(
        "\nCitas disponibles: {}\n\n",
        sources.iter().map(|s| s.reference_label.as_str()).collect::<Vec<_>>().join(", ")
    ));

    prompt.push_str(
        "Responde con el siguiente formato:\n\
Resumen:\n\
Normativa aplicable:\n\
Criterios administrativos:\n\
Jurisprudencia relevante:\n\
Requisitos y notas:\n\n\
Esta respuesta no constituye asesoramiento jurídico o fiscal profesional.",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_detection_matches_common_openers() {
        assert!(RagOrchestrator::is_greeting("Hola"));
        assert!(RagOrchestrator::is_greeting("Buenos días, tengo una duda"));
        assert!(!RagOrchestrator::is_greeting("¿Puedo deducir el IVA de mi estudio?"));
    }

    #[test]
    fn greeting_prefix_does_not_short_circuit_a_legal_question() {
        // A greeting opener followed by a substantive legal question must
        // still go to retrieval, not the canned greeting (spec §4.8 step 2).
        assert!(!RagOrchestrator::is_greeting(
            "Buenos días, ¿puedo deducir gastos de home studio?"
        ));
        assert!(!RagOrchestrator::is_greeting(
            "Hola, ¿qué dice el Artículo 30 de la Ley del IRPF?"
        ));
    }

    #[test]
    fn cite_sources_labels_by_nature_bucket() {
        let retrieved = HierarchicalResults::default();
        let sources = cite_sources(&retrieved);
        assert!(sources.is_empty());
    }
}
