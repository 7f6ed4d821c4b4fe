//! Explanation generator: (score, verdict, labels) -> tiered, human-readable rationale.
//!
//! Deterministic. The verdict picks the tier when it carries one; otherwise the
//! score thresholds do. Texts are Spanish, matching the client UI.

use crate::record::{ConfidenceTier, Explanation, ExplanationTier, Recommendation, Verdict};

/// Keyword rule: a label matches when it contains every keyword of any alternative.
struct FactorRule {
    any_of: &'static [&'static [&'static str]],
    bullet: &'static str,
}

/// Evaluated in order; each rule contributes at most one bullet.
const FACTOR_RULES: &[FactorRule] = &[
    FactorRule {
        any_of: &[&["clickbait"], &["titular", "engañoso"], &["sensacionalista"]],
        bullet: "• Titular sensacionalista o engañoso",
    },
    FactorRule {
        any_of: &[&["fuente", "confiable"], &["sin_fuente"], &["sin fuente"]],
        bullet: "• Fuentes poco confiables o no identificadas",
    },
    FactorRule {
        any_of: &[&["contradice"]],
        bullet: "• Contradice fuentes verificadas",
    },
    FactorRule {
        any_of: &[&["sesgad"]],
        bullet: "• Lenguaje sesgado o parcial",
    },
    FactorRule {
        any_of: &[&["descontextualizad"]],
        bullet: "• Información descontextualizada",
    },
    FactorRule {
        any_of: &[&["rumor"]],
        bullet: "• Basada en rumores sin confirmar",
    },
    FactorRule {
        any_of: &[&["satira"], &["sátira"]],
        bullet: "• Contenido satírico presentado como noticia",
    },
    FactorRule {
        any_of: &[&["transparencia"]],
        bullet: "• Falta de transparencia en los datos",
    },
];

pub fn explain(score: Option<f64>, verdict: Option<Verdict>, labels: &[String]) -> Explanation {
    let score = score.filter(|s| s.is_finite());
    let tier = tier_for(score, verdict);

    let (simple, detailed) = match tier {
        ExplanationTier::Low => (
            "🚩 Alta probabilidad de desinformación. No compartas esta noticia sin verificarla.",
            "El análisis detectó múltiples problemas de veracidad: afirmaciones sin respaldo, \
             fuentes dudosas o datos que no coinciden con información verificada.",
        ),
        ExplanationTier::Medium => (
            "⚠️ Noticia dudosa. Tómala con precaución.",
            "El contenido presenta contradicciones o vacíos de transparencia: algunas \
             afirmaciones no pudieron confirmarse o las fuentes no son claras.",
        ),
        ExplanationTier::High => (
            "✅ La noticia parece confiable.",
            "El contenido presenta datos consistentes y verificables, con fuentes \
             identificables y coherencia con otras publicaciones.",
        ),
        ExplanationTier::Unknown => (
            "❔ No se puede determinar la veracidad de este contenido.",
            "No hay información suficiente para clasificar el contenido como noticia \
             real, falsa o dudosa.",
        ),
    };

    let recommendation = recommendation_for(score);
    Explanation {
        tier,
        simple: simple.to_string(),
        detailed: detailed.to_string(),
        factors: extract_factors(labels),
        recommendation,
        recommendation_text: recommendation_text(recommendation).to_string(),
        confidence: confidence_tier(score),
    }
}

fn tier_for(score: Option<f64>, verdict: Option<Verdict>) -> ExplanationTier {
    match verdict {
        Some(Verdict::Falsa) => return ExplanationTier::Low,
        Some(Verdict::Dudosa) => return ExplanationTier::Medium,
        Some(Verdict::Real) => return ExplanationTier::High,
        Some(Verdict::NoNoticia) | None => {}
    }
    match score {
        Some(s) if s < 30.0 => ExplanationTier::Low,
        Some(s) if s < 60.0 => ExplanationTier::Medium,
        Some(_) => ExplanationTier::High,
        None => ExplanationTier::Unknown,
    }
}

/// One bullet per matched rule, in table order.
pub fn extract_factors(labels: &[String]) -> Vec<String> {
    let lowered: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    FACTOR_RULES
        .iter()
        .filter(|rule| {
            lowered.iter().any(|label| {
                rule.any_of
                    .iter()
                    .any(|keywords| keywords.iter().all(|k| label.contains(k)))
            })
        })
        .map(|rule| rule.bullet.to_string())
        .collect()
}

pub fn recommendation_for(score: Option<f64>) -> Recommendation {
    match score {
        Some(s) if s >= 70.0 => Recommendation::ShareWithConfidence,
        Some(s) if s < 40.0 => Recommendation::DoNotShare,
        _ => Recommendation::VerifyWithOtherSources,
    }
}

fn recommendation_text(r: Recommendation) -> &'static str {
    match r {
        Recommendation::ShareWithConfidence => "Puedes compartir esta noticia con confianza.",
        Recommendation::VerifyWithOtherSources => "Verifica con otras fuentes antes de compartir.",
        Recommendation::DoNotShare => "No compartas esta noticia.",
    }
}

pub fn confidence_tier(score: Option<f64>) -> ConfidenceTier {
    match score {
        Some(s) if s >= 80.0 => ConfidenceTier::Alta,
        Some(s) if s >= 50.0 => ConfidenceTier::Media,
        _ => ConfidenceTier::Baja,
    }
}
