//! The text-generation collaborator and the deterministic fallback answer
//! used when it fails or returns nothing useful.

use crate::errors::Result;
use async_trait::async_trait;

/// Narrow interface over an external LLM completion call. Implementations
/// own their own retry/timeout policy internally; the orchestrator treats
/// any `Err` here as "generation failed" and falls back to
/// `fallback_answer`.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Deterministic, templated answer produced when the generator is
/// unavailable or errors out. Cites the same labeled sources the prompt
/// would have, so the caller still gets grounded material even without a
/// synthesized narrative.
pub fn fallback_answer(has_normativa: bool, has_doctrina: bool, has_jurisprudencia: bool) -> String {
    if !has_normativa && !has_doctrina && !has_jurisprudencia {
        return "No he encontrado normativa, doctrina administrativa ni jurisprudencia \
aplicable a esta consulta en las fuentes disponibles. No dispongo de información suficiente \
para responder con garantías; se recomienda consultar con un asesor fiscal o jurídico \
especializado."
            .to_string();
    }

    let mut sections = vec![
        "No ha sido posible generar una respuesta redactada en este momento. Se muestran a \
continuación las fuentes recuperadas, ordenadas por jerarquía normativa:"
            .to_string(),
    ];

    if has_normativa {
        sections.push("- Normativa aplicable: véanse las fuentes etiquetadas N1, N2, ...".to_string());
    }
    if has_doctrina {
        sections.push("- Criterios administrativos: véanse las fuentes etiquetadas D1, D2, ...".to_string());
    }
    if has_jurisprudencia {
        sections.push(
            "- Jurisprudencia relevante: véanse las fuentes etiquetadas J1, J2, ...".to_string(),
        );
    }

    sections.push(
        "Esta respuesta no constituye asesoramiento jurídico o fiscal profesional.".to_string(),
    );

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sources_yields_no_information_message() {
        let answer = fallback_answer(false, false, false);
        assert!(answer.to_lowercase().contains("no he encontrado"));
    }

    #[test]
    fn normativa_only_fallback_lists_only_normativa_section() {
        let answer = fallback_answer(true, false, false);
        assert!(answer.contains("N1"));
        assert!(!answer.contains("D1"));
        assert!(!answer.contains("J1"));
    }

    #[test]
    fn fallback_always_ends_with_disclaimer() {
        let answer = fallback_answer(true, true, true);
        assert!(answer.ends_with("profesional."));
    }
}
