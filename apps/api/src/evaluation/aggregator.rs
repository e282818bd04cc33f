//! PersonaEvaluationAggregator: folds independent persona verdicts into one
//! combined score, recommendation and analysis.
//!
//! Output is a pure function of the verdict map and the `selected_personas`
//! order, so it does not depend on which persona call finished first.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::errors::AppError;
use crate::models::evaluation::{
    CombinedResult, EvaluationOutcome, PersonaVerdict, RecommendationBucket,
};

// ────────────────────────────────────────────────────────────────────────────
// Recommendation lexicon
// ────────────────────────────────────────────────────────────────────────────

/// Doubt markers. Checked first so "twijfel, mogelijk sterk" stays neutral.
const NEUTRAL_MARKERS: &[&str] = &[
    "twijfel", "mogelijk", "misschien", "neutraal", "afwachten", "doubt", "maybe", "borderline",
];

/// Negation words, matched as whole words so "niet aanbevolen" is not positive.
const NEGATION_WORDS: &[&str] = &[
    "niet", "geen", "afwijzen", "afgewezen", "not", "no", "reject", "rejected",
];

const POSITIVE_MARKERS: &[&str] = &[
    "sterk", "uitnodigen", "aanbevelen", "aanbevolen", "aannemen", "strong", "invite",
    "recommend", "hire",
];

/// Ties with no scores fall to the most cautious bucket.
const CAUTIOUS_ORDER: [RecommendationBucket; 3] = [
    RecommendationBucket::Neutral,
    RecommendationBucket::Negative,
    RecommendationBucket::Positive,
];

impl RecommendationBucket {
    /// Label that prefixes the combined recommendation text.
    pub fn label(&self) -> &'static str {
        match self {
            RecommendationBucket::Positive => "Aanbevolen",
            RecommendationBucket::Neutral => "Twijfel",
            RecommendationBucket::Negative => "Niet aanbevolen",
        }
    }
}

/// Buckets a recommendation text. Anything the lexicon does not recognise is
/// negative.
pub fn bucket_recommendation(text: &str) -> RecommendationBucket {
    let lower = text.to_lowercase();
    if NEUTRAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return RecommendationBucket::Neutral;
    }
    let negated = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| NEGATION_WORDS.contains(&word));
    if negated {
        return RecommendationBucket::Negative;
    }
    if POSITIVE_MARKERS.iter().any(|m| lower.contains(m)) {
        return RecommendationBucket::Positive;
    }
    RecommendationBucket::Negative
}

// ────────────────────────────────────────────────────────────────────────────
// Aggregation
// ────────────────────────────────────────────────────────────────────────────

/// Aggregates the verdicts of the personas that answered.
///
/// `selected_personas` fixes the analysis order. Verdicts for names outside
/// it are ignored. An empty map (every persona failed) is `AllPersonasFailed`.
pub fn aggregate(
    selected_personas: &[String],
    verdicts: HashMap<String, PersonaVerdict>,
    partial: bool,
) -> Result<EvaluationOutcome, AppError> {
    let mut evaluations = BTreeMap::new();
    for (name, verdict) in verdicts {
        if selected_personas.contains(&name) {
            evaluations.insert(name, verdict);
        } else {
            warn!("Dropping verdict for unselected persona '{name}'");
        }
    }

    let ordered: Vec<&PersonaVerdict> = selected_personas
        .iter()
        .filter_map(|name| evaluations.get(name))
        .collect();
    if ordered.is_empty() {
        return Err(AppError::AllPersonasFailed);
    }

    let bucket = majority_bucket(&ordered);
    let combined = CombinedResult {
        combined_score: mean_score(&ordered),
        combined_recommendation: combined_recommendation(bucket, &ordered),
        combined_analysis: combined_analysis(&ordered),
        recommendation_bucket: bucket,
    };

    Ok(EvaluationOutcome {
        evaluations,
        combined,
        partial,
    })
}

fn mean_score(verdicts: &[&PersonaVerdict]) -> Option<f64> {
    let scores: Vec<f64> = verdicts.iter().filter_map(|v| v.score).collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(mean.clamp(0.0, 10.0))
}

/// Majority bucket. Ties go to the tied bucket holding the highest-scoring
/// verdict, then to the most cautious bucket.
fn majority_bucket(verdicts: &[&PersonaVerdict]) -> RecommendationBucket {
    let mut counts: HashMap<RecommendationBucket, usize> = HashMap::new();
    let mut best_score: HashMap<RecommendationBucket, f64> = HashMap::new();
    for verdict in verdicts {
        let bucket = bucket_recommendation(&verdict.recommendation);
        *counts.entry(bucket).or_default() += 1;
        if let Some(score) = verdict.score {
            let best = best_score.entry(bucket).or_insert(f64::NEG_INFINITY);
            *best = best.max(score);
        }
    }

    let top = counts.values().copied().max().unwrap_or(0);
    let mut tied = CAUTIOUS_ORDER
        .into_iter()
        .filter(|b| counts.get(b) == Some(&top));
    let Some(mut winner) = tied.next() else {
        return RecommendationBucket::Negative;
    };

    // CAUTIOUS_ORDER iteration plus strict `>` keeps the cautious bucket on equal scores.
    let mut winner_score = best_score.get(&winner).copied();
    for bucket in tied {
        if let Some(score) = best_score.get(&bucket).copied() {
            if winner_score.map_or(true, |current| score > current) {
                winner = bucket;
                winner_score = Some(score);
            }
        }
    }
    winner
}

/// `"<label>: <recommendation of the best-scoring verdict in the bucket>"`.
fn combined_recommendation(bucket: RecommendationBucket, verdicts: &[&PersonaVerdict]) -> String {
    let mut representative: Option<&PersonaVerdict> = None;
    for verdict in verdicts
        .iter()
        .copied()
        .filter(|v| bucket_recommendation(&v.recommendation) == bucket)
    {
        let better = match (representative.and_then(|r| r.score), verdict.score) {
            (_, None) => representative.is_none(),
            (None, Some(_)) => true,
            (Some(current), Some(score)) => score > current,
        };
        if better {
            representative = Some(verdict);
        }
    }

    match representative.map(|v| v.recommendation.trim()).filter(|r| !r.is_empty()) {
        Some(text) => format!("{}: {}", bucket.label(), text),
        None => bucket.label().to_string(),
    }
}

fn combined_analysis(verdicts: &[&PersonaVerdict]) -> String {
    verdicts
        .iter()
        .map(|v| {
            let mut section = format!("**{}**", v.persona_name);
            if let Some(score) = v.score {
                section.push_str(&format!(" ({score:.1}/10)"));
            }
            section.push('\n');
            section.push_str(v.analysis.trim());
            if let Some(hits) = &v.big_hits {
                section.push_str(&format!("\nPluspunten: {hits}"));
            }
            if let Some(misses) = &v.big_misses {
                section.push_str(&format!("\nMinpunten: {misses}"));
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
