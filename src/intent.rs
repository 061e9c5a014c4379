//! Keyword-weighted intent classification over the seven closed legal
//! areas a query can fall into. No embeddings, no external calls — pure
//! lookup-table scoring, so the classifier always answers instantly and
//! deterministically.

use crate::store::lexical::fold_accents;
use std::collections::HashMap;

/// The closed set of legal areas the classifier can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    Fiscal,
    Laboral,
    PropiedadIntelectual,
    Contabilidad,
    Subvenciones,
    Societario,
    Administrativo,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Fiscal => "Fiscal",
            Area::Laboral => "Laboral",
            Area::PropiedadIntelectual => "Propiedad Intelectual",
            Area::Contabilidad => "Contabilidad",
            Area::Subvenciones => "Subvenciones",
            Area::Societario => "Societario",
            Area::Administrativo => "Administrativo",
        }
    }

    fn all() -> [Area; 7] {
        [
            Area::Fiscal,
            Area::Laboral,
            Area::PropiedadIntelectual,
            Area::Contabilidad,
            Area::Subvenciones,
            Area::Societario,
            Area::Administrativo,
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Area::Fiscal => &[
                "irpf", "iva", "impuesto", "hacienda", "tributario", "tributaria",
                "deduccion", "deducible", "deducir", "retencion", "declaracion renta", "autonomo",
                "epigrafe", "factura",
            ],
            Area::Laboral => &[
                "contrato", "trabajador", "despido", "nomina", "seguridad social",
                "convenio colectivo", "jornada", "salario", "cotizacion", "autonomos societarios",
                "relacion laboral",
            ],
            Area::PropiedadIntelectual => &[
                "derechos de autor", "propiedad intelectual", "copyright", "licencia",
                "registro de la propiedad intelectual", "plagio", "obra", "royaltie",
                "royalties", "sgae",
            ],
            Area::Contabilidad => &[
                "contabilidad", "libro de ingresos", "libro de gastos", "balance",
                "amortizacion", "plan general contable", "asiento contable", "gasto deducible",
                "libro registro",
            ],
            Area::Subvenciones => &[
                "subvencion", "ayuda publica", "convocatoria", "beca", "financiacion publica",
                "beneficiario", "justificacion de gastos", "bases reguladoras",
            ],
            Area::Societario => &[
                "sociedad limitada", "estatutos", "socio", "capital social",
                "administrador", "junta general", "registro mercantil", "cooperativa",
                "forma juridica",
            ],
            Area::Administrativo => &[
                "procedimiento administrativo", "recurso", "silencio administrativo",
                "administracion publica", "notificacion", "expediente", "resolucion",
                "plazo administrativo",
            ],
        }
    }
}

/// Spanish stopwords too short or too generic to help classification;
/// `extract_keywords` additionally drops anything under 4 characters.
const MIN_KEYWORD_LEN: usize = 4;

/// Classifies free text into the best-matching area, or `None` if no
/// area's keywords appear at all.
pub fn classify(text: &str) -> Option<Area> {
    let folded = fold_accents(text);
    let mut scores: HashMap<Area, usize> = HashMap::new();

    for area in Area::all() {
        let count = area
            .keywords()
            .iter()
            .filter(|kw| folded.contains(&fold_accents(kw)))
            .count();
        if count > 0 {
            scores.insert(area, count);
        }
    }

    scores
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(area, _)| area)
}

/// Debugging aid: whitespace-tokenises, lowercases/accent-folds, strips
/// stopwords, and filters out anything shorter than `MIN_KEYWORD_LEN`.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let tokenizer = crate::store::lexical::SpanishTokenizer::new();
    tokenizer
        .tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= MIN_KEYWORD_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fiscal_query() {
        let area = classify("¿Puedo deducir el IVA de mi estudio como autónomo?");
        assert_eq!(area, Some(Area::Fiscal));
    }

    #[test]
    fn classifies_propiedad_intelectual_query() {
        let area = classify("¿Cómo registro los derechos de autor de mi obra?");
        assert_eq!(area, Some(Area::PropiedadIntelectual));
    }

    #[test]
    fn greeting_has_no_matching_area() {
        let area = classify("Hola, buenos días");
        assert_eq!(area, None);
    }

    #[test]
    fn extract_keywords_drops_short_tokens() {
        let keywords = extract_keywords("el IVA de mi estudio de artista");
        assert!(!keywords.iter().any(|k| k.len() < MIN_KEYWORD_LEN));
    }
}
