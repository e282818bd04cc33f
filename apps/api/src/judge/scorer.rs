//! JudgeScorer: rates how trustworthy a stored run is.
//!
//! - quality: output length, expected sections, filled-in fields
//! - consistency: similarity to the closest historical runs
//! - timing: deviation of the run's duration from the historical mean
//!
//! confidence = weighted mix of the three. All scores are in [0, 1].

use std::time::Instant;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::debate::prompts::NO_RESPONSE;
use crate::errors::AppError;
use crate::judge::similarity::TermVector;
use crate::models::evaluation::{EvaluationOutcome, EvaluationResult, ResultType};
use crate::models::transcript::{TranscriptTurn, TurnRole};
use crate::storage::ResultStore;

// ────────────────────────────────────────────────────────────────────────────
// Tunable constants
// ────────────────────────────────────────────────────────────────────────────

/// Output length (chars) below `min_chars` scales 0..0.5, up to `target_chars`
/// scales 0.5..1.0, and scores 1.0 from there on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthTarget {
    pub min_chars: usize,
    pub target_chars: usize,
}

/// Weights and thresholds of the judge. These are tuning knobs, not derived
/// from any formal model.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeWeights {
    pub length: f64,
    pub structure: f64,
    pub completeness: f64,
    pub quality: f64,
    pub consistency: f64,
    pub timing: f64,
    /// History items averaged into the consistency score.
    pub top_k: usize,
    /// Similarity at or above which a history item counts as similar.
    pub similarity_threshold: f64,
    /// Scores below this trigger a recommendation.
    pub recommendation_threshold: f64,
    /// Consistency/timing score when there is nothing to compare with.
    pub neutral_score: f64,
    pub evaluation_length: LengthTarget,
    pub debate_length: LengthTarget,
}

impl Default for JudgeWeights {
    fn default() -> Self {
        Self {
            length: 0.3,
            structure: 0.4,
            completeness: 0.3,
            quality: 0.4,
            consistency: 0.4,
            timing: 0.2,
            top_k: 5,
            similarity_threshold: 0.3,
            recommendation_threshold: 0.5,
            neutral_score: 0.5,
            evaluation_length: LengthTarget {
                min_chars: 200,
                target_chars: 800,
            },
            debate_length: LengthTarget {
                min_chars: 500,
                target_chars: 2_000,
            },
        }
    }
}

pub const RECOMMEND_QUALITY: &str = "Increase structure and completeness of persona prompts";
pub const RECOMMEND_CONSISTENCY: &str =
    "Review prompt variability: outputs diverge from the historical pattern";
pub const RECOMMEND_TIMING: &str = "Investigate the unusually slow or fast response time";
pub const RECOMMEND_INCOMPLETE: &str =
    "The run ended incomplete; re-run it before relying on the outcome";
pub const NO_ISSUES: &str = "No issues detected";

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JudgeEvaluation {
    pub result_id: Uuid,
    pub result_type: ResultType,
    pub confidence_score: f64,
    pub quality_score: f64,
    pub consistency_score: f64,
    pub timing_score: f64,
    pub similar_inputs_found: usize,
    pub breakdown: JudgeBreakdown,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeBreakdown {
    pub quality: QualityBreakdown,
    pub timing: TimingBreakdown,
    pub similarity: SimilarityBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityBreakdown {
    pub length_score: f64,
    pub structure_score: f64,
    pub completeness_score: f64,
    pub output_chars: usize,
}

/// Stage timings of this judge run plus the durations the timing score used.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingBreakdown {
    pub lookup_ms: u64,
    pub similarity_ms: u64,
    pub scoring_ms: u64,
    pub run_duration_ms: Option<i64>,
    pub historical_mean_ms: Option<f64>,
    pub historical_samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityBreakdown {
    pub history_considered: usize,
    pub similar_inputs_found: usize,
    /// The top-K matches, most similar first.
    pub top_matches: Vec<SimilarMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarMatch {
    pub result_id: Uuid,
    pub similarity: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Judge operation
// ────────────────────────────────────────────────────────────────────────────

/// Loads the target and its history and scores it. `NotFound` when the target
/// is absent; missing history is not an error.
pub async fn judge(
    store: &dyn ResultStore,
    result_id: Uuid,
    weights: &JudgeWeights,
) -> Result<JudgeEvaluation, AppError> {
    let started = Instant::now();
    let target = store
        .get(result_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?;
    let history: Vec<EvaluationResult> = store
        .list_similar(&target.selected_personas, target.result_type)
        .await?
        .into_iter()
        .filter(|r| r.id != target.id)
        .collect();
    let lookup_ms = started.elapsed().as_millis() as u64;

    let mut evaluation = score(&target, &history, weights);
    evaluation.breakdown.timing.lookup_ms = lookup_ms;

    info!(
        "Judged {} {}: confidence {:.2} (quality {:.2}, consistency {:.2}, timing {:.2}), {} similar of {}",
        target.result_type,
        result_id,
        evaluation.confidence_score,
        evaluation.quality_score,
        evaluation.consistency_score,
        evaluation.timing_score,
        evaluation.similar_inputs_found,
        history.len()
    );
    Ok(evaluation)
}

/// Scores `target` against `history` (which must not contain the target).
pub fn score(
    target: &EvaluationResult,
    history: &[EvaluationResult],
    weights: &JudgeWeights,
) -> JudgeEvaluation {
    let similarity_started = Instant::now();
    let similarity = similarity_against(target, history, weights);
    let consistency_score = if similarity.top_matches.is_empty() {
        weights.neutral_score
    } else {
        let sum: f64 = similarity.top_matches.iter().map(|m| m.similarity).sum();
        clamp_unit(sum / similarity.top_matches.len() as f64)
    };
    let similarity_ms = similarity_started.elapsed().as_millis() as u64;

    let scoring_started = Instant::now();
    let quality = quality_of(target, weights);
    let quality_score = clamp_unit(
        weights.length * quality.length_score
            + weights.structure * quality.structure_score
            + weights.completeness * quality.completeness_score,
    );

    let mut timing = TimingBreakdown {
        run_duration_ms: target.duration_ms,
        ..TimingBreakdown::default()
    };
    let timing_score = timing_of(target, history, weights, &mut timing);

    let confidence_score = clamp_unit(
        weights.quality * quality_score
            + weights.consistency * consistency_score
            + weights.timing * timing_score,
    );

    let mut recommendations = Vec::new();
    if quality_score < weights.recommendation_threshold {
        recommendations.push(RECOMMEND_QUALITY.to_string());
    }
    if consistency_score < weights.recommendation_threshold {
        recommendations.push(RECOMMEND_CONSISTENCY.to_string());
    }
    if timing_score < weights.recommendation_threshold {
        recommendations.push(RECOMMEND_TIMING.to_string());
    }
    if target.incomplete {
        recommendations.push(RECOMMEND_INCOMPLETE.to_string());
    }
    if recommendations.is_empty() {
        recommendations.push(NO_ISSUES.to_string());
    }
    timing.similarity_ms = similarity_ms;
    timing.scoring_ms = scoring_started.elapsed().as_millis() as u64;

    JudgeEvaluation {
        result_id: target.id,
        result_type: target.result_type,
        confidence_score,
        quality_score,
        consistency_score,
        timing_score,
        similar_inputs_found: similarity.similar_inputs_found,
        breakdown: JudgeBreakdown {
            quality,
            timing,
            similarity,
        },
        recommendations,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Consistency
// ────────────────────────────────────────────────────────────────────────────

fn similarity_against(
    target: &EvaluationResult,
    history: &[EvaluationResult],
    weights: &JudgeWeights,
) -> SimilarityBreakdown {
    let target_vector = TermVector::new(&target.render_text());
    let mut matches: Vec<SimilarMatch> = history
        .iter()
        .map(|item| SimilarMatch {
            result_id: item.id,
            similarity: target_vector.cosine(&TermVector::new(&item.render_text())),
        })
        .collect();
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    let similar_inputs_found = matches
        .iter()
        .filter(|m| m.similarity >= weights.similarity_threshold)
        .count();
    matches.truncate(weights.top_k);

    SimilarityBreakdown {
        history_considered: history.len(),
        similar_inputs_found,
        top_matches: matches,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Timing
// ────────────────────────────────────────────────────────────────────────────

/// `1 − |duration − mean| / mean`, neutral when either side has no data.
fn timing_of(
    target: &EvaluationResult,
    history: &[EvaluationResult],
    weights: &JudgeWeights,
    breakdown: &mut TimingBreakdown,
) -> f64 {
    let durations: Vec<f64> = history
        .iter()
        .filter(|r| r.result_type == target.result_type)
        .filter_map(|r| r.duration_ms)
        .map(|ms| ms as f64)
        .collect();
    breakdown.historical_samples = durations.len();
    if durations.is_empty() {
        return weights.neutral_score;
    }
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    breakdown.historical_mean_ms = Some(mean);

    match target.duration_ms {
        Some(duration) if mean > 0.0 => {
            clamp_unit(1.0 - (duration as f64 - mean).abs() / mean)
        }
        _ => weights.neutral_score,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quality
// ────────────────────────────────────────────────────────────────────────────

fn quality_of(target: &EvaluationResult, weights: &JudgeWeights) -> QualityBreakdown {
    let text = target.render_text();
    let output_chars = text.trim().chars().count();

    let (length_target, structure_score, completeness_score) =
        match (target.outcome(), target.transcript()) {
            (Some(outcome), _) => (
                weights.evaluation_length,
                evaluation_structure(outcome),
                evaluation_completeness(outcome, &target.selected_personas),
            ),
            (None, Some(turns)) => (
                weights.debate_length,
                debate_structure(turns),
                debate_completeness(turns, &target.selected_personas, target.incomplete),
            ),
            (None, None) => (weights.evaluation_length, 0.0, 0.0),
        };

    QualityBreakdown {
        length_score: length_score(output_chars, length_target),
        structure_score,
        completeness_score,
        output_chars,
    }
}

pub fn length_score(chars: usize, target: LengthTarget) -> f64 {
    let min = target.min_chars.max(1) as f64;
    let start = (target.target_chars as f64).max(min);
    let chars = chars as f64;
    let score = if chars < min {
        0.5 * chars / min
    } else if chars < start {
        0.5 + 0.5 * (chars - min) / (start - min)
    } else {
        1.0
    };
    clamp_unit(score)
}

fn fraction(present: usize, expected: usize) -> f64 {
    if expected == 0 {
        0.0
    } else {
        present as f64 / expected as f64
    }
}

/// Sections: analysis, recommendation, score.
fn evaluation_structure(outcome: &EvaluationOutcome) -> f64 {
    let combined = &outcome.combined;
    let present = [
        !combined.combined_analysis.trim().is_empty(),
        !combined.combined_recommendation.trim().is_empty(),
        combined.combined_score.is_some(),
    ];
    fraction(present.iter().filter(|p| **p).count(), present.len())
}

/// Every verdict field of every selected persona plus the combined fields.
/// A persona without a verdict contributes only empty fields.
fn evaluation_completeness(outcome: &EvaluationOutcome, selected: &[String]) -> f64 {
    const VERDICT_FIELDS: usize = 5;
    const COMBINED_FIELDS: usize = 3;

    let filled = |s: &str| !s.trim().is_empty();
    let filled_opt = |s: &Option<String>| s.as_deref().map_or(false, filled);

    let mut present = 0;
    for name in selected {
        if let Some(v) = outcome.evaluations.get(name) {
            present += [
                v.score.is_some(),
                filled(&v.analysis),
                filled(&v.recommendation),
                filled_opt(&v.big_hits),
                filled_opt(&v.big_misses),
            ]
            .iter()
            .filter(|p| **p)
            .count();
        }
    }
    let combined = &outcome.combined;
    present += [
        combined.combined_score.is_some(),
        filled(&combined.combined_recommendation),
        filled(&combined.combined_analysis),
    ]
    .iter()
    .filter(|p| **p)
    .count();

    fraction(present, selected.len() * VERDICT_FIELDS + COMBINED_FIELDS)
}

fn is_contribution(turn: &TranscriptTurn) -> bool {
    turn.role == TurnRole::Persona && turn.content.trim() != NO_RESPONSE
}

/// Sections: moderator opening, persona contributions, moderator closing.
fn debate_structure(turns: &[TranscriptTurn]) -> f64 {
    let opening = turns.first().map_or(false, |t| t.role == TurnRole::Moderator);
    let contributions = turns.iter().any(is_contribution);
    let closing = turns.len() > 1 && turns.last().map_or(false, |t| t.role == TurnRole::Moderator);
    fraction(
        [opening, contributions, closing].iter().filter(|p| **p).count(),
        3,
    )
}

/// Share of selected personas with a real contribution, halved when the
/// debate did not finish.
fn debate_completeness(turns: &[TranscriptTurn], selected: &[String], incomplete: bool) -> f64 {
    let contributed = selected
        .iter()
        .filter(|name| turns.iter().any(|t| is_contribution(t) && &t.speaker == *name))
        .count();
    let share = fraction(contributed, selected.len());
    if incomplete {
        share / 2.0
    } else {
        share
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::models::evaluation::{
        CombinedResult, NewEvaluationResult, PersonaVerdict, RecommendationBucket, ResultData,
        WriteMode,
    };
    use crate::storage::InMemoryResultStore;

    fn turn(speaker: &str, role: TurnRole, content: &str, sequence: u32) -> TranscriptTurn {
        TranscriptTurn {
            speaker: speaker.into(),
            role,
            content: content.into(),
            sequence,
        }
    }

    fn debate(content: &str, duration_ms: Option<i64>) -> EvaluationResult {
        NewEvaluationResult {
            candidate_id: "cand".into(),
            job_id: "job".into(),
            selected_personas: vec!["hr".into(), "tech".into()],
            company_note: None,
            result_data: ResultData::Debate(vec![
                turn("Moderator", TurnRole::Moderator, "Welkom bij het panel", 1),
                turn("hr", TurnRole::Persona, content, 2),
                turn("tech", TurnRole::Persona, "Solide technische basis", 3),
                turn("Moderator", TurnRole::Moderator, "Eindadvies: uitnodigen", 4),
            ]),
            incomplete: false,
            duration_ms,
        }
        .into_stored(Uuid::new_v4(), Utc::now())
    }

    fn evaluation(verdicts: Vec<PersonaVerdict>, score: Option<f64>) -> EvaluationResult {
        let selected: Vec<String> = verdicts.iter().map(|v| v.persona_name.clone()).collect();
        let evaluations: BTreeMap<String, PersonaVerdict> = verdicts
            .into_iter()
            .map(|v| (v.persona_name.clone(), v))
            .collect();
        NewEvaluationResult {
            candidate_id: "cand".into(),
            job_id: "job".into(),
            selected_personas: selected,
            company_note: None,
            result_data: ResultData::Evaluation(EvaluationOutcome {
                evaluations,
                combined: CombinedResult {
                    combined_score: score,
                    combined_recommendation: "Aanbevolen: Sterk".into(),
                    combined_analysis: "Analyse ".repeat(120),
                    recommendation_bucket: RecommendationBucket::Positive,
                },
                partial: false,
            }),
            incomplete: false,
            duration_ms: Some(3_000),
        }
        .into_stored(Uuid::new_v4(), Utc::now())
    }

    fn verdict(name: &str) -> PersonaVerdict {
        PersonaVerdict {
            persona_name: name.into(),
            score: Some(7.0),
            analysis: "Goede match".into(),
            recommendation: "Sterk".into(),
            big_hits: Some("Ervaring".into()),
            big_misses: Some("Geen leiding".into()),
        }
    }

    fn assert_unit(value: f64) {
        assert!((0.0..=1.0).contains(&value), "{value} outside [0, 1]");
    }

    #[test]
    fn test_no_history_gives_neutral_consistency() {
        let target = debate("Sterke communicatie", Some(5_000));
        let result = score(&target, &[], &JudgeWeights::default());

        assert_eq!(result.consistency_score, 0.5);
        assert_eq!(result.similar_inputs_found, 0);
        assert_eq!(result.timing_score, 0.5);
        assert_eq!(result.breakdown.similarity.history_considered, 0);
    }

    #[test]
    fn test_exact_duplicates_give_full_consistency() {
        let target = debate("Sterke communicatie", Some(5_000));
        let mut duplicate = target.clone();
        duplicate.id = Uuid::new_v4();
        let history = vec![duplicate.clone(), {
            let mut again = duplicate;
            again.id = Uuid::new_v4();
            again
        }];

        let result = score(&target, &history, &JudgeWeights::default());
        assert_eq!(result.consistency_score, 1.0);
        assert_eq!(result.similar_inputs_found, 2);
        assert_eq!(result.timing_score, 1.0);
    }

    #[test]
    fn test_top_k_limits_consistency_sample() {
        let target = debate("Sterke communicatie", Some(5_000));
        let history: Vec<EvaluationResult> = (0..8)
            .map(|i| debate(&format!("Variant {i} van het oordeel"), Some(5_000)))
            .collect();

        let result = score(&target, &history, &JudgeWeights::default());
        assert_eq!(result.breakdown.similarity.top_matches.len(), 5);
        assert_eq!(result.breakdown.similarity.history_considered, 8);
        let sims: Vec<f64> = result
            .breakdown
            .similarity
            .top_matches
            .iter()
            .map(|m| m.similarity)
            .collect();
        assert!(sims.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_timing_deviation_lowers_score() {
        let target = debate("x", Some(15_000));
        let history = vec![debate("x", Some(10_000)), debate("x", Some(10_000))];
        let result = score(&target, &history, &JudgeWeights::default());

        assert!((result.timing_score - 0.5).abs() < 1e-9);
        assert_eq!(result.breakdown.timing.historical_mean_ms, Some(10_000.0));

        let way_off = debate("x", Some(40_000));
        let result = score(&way_off, &history, &JudgeWeights::default());
        assert_eq!(result.timing_score, 0.0);
        assert!(result.recommendations.iter().any(|r| r == RECOMMEND_TIMING));
    }

    #[test]
    fn test_length_score_curve() {
        let target = LengthTarget {
            min_chars: 200,
            target_chars: 800,
        };
        assert_eq!(length_score(0, target), 0.0);
        assert_eq!(length_score(100, target), 0.25);
        assert_eq!(length_score(200, target), 0.5);
        assert_eq!(length_score(500, target), 0.75);
        assert_eq!(length_score(800, target), 1.0);
        assert_eq!(length_score(50_000, target), 1.0);
    }

    #[test]
    fn test_complete_evaluation_scores_full_structure_and_completeness() {
        let target = evaluation(vec![verdict("hr"), verdict("tech")], Some(7.0));
        let result = score(&target, &[], &JudgeWeights::default());

        assert_eq!(result.breakdown.quality.structure_score, 1.0);
        assert_eq!(result.breakdown.quality.completeness_score, 1.0);
        assert_eq!(result.breakdown.quality.length_score, 1.0);
        assert!((result.quality_score - 1.0).abs() < 1e-9);
        assert_eq!(result.recommendations, vec![NO_ISSUES.to_string()]);
    }

    #[test]
    fn test_unscored_evaluation_loses_structure() {
        let mut bare = verdict("hr");
        bare.score = None;
        bare.big_hits = None;
        bare.big_misses = None;
        let target = evaluation(vec![bare], None);
        let result = score(&target, &[], &JudgeWeights::default());

        assert!((result.breakdown.quality.structure_score - 2.0 / 3.0).abs() < 1e-9);
        // 2 of 5 verdict fields plus 2 of 3 combined fields
        assert!((result.breakdown.quality.completeness_score - 4.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_response_and_incomplete_debate_reduce_completeness() {
        let mut target = debate("Sterk", Some(1_000));
        if let ResultData::Debate(turns) = &mut target.result_data {
            turns[2].content = NO_RESPONSE.to_string();
        }
        let result = score(&target, &[], &JudgeWeights::default());
        assert_eq!(result.breakdown.quality.completeness_score, 0.5);

        target.incomplete = true;
        let result = score(&target, &[], &JudgeWeights::default());
        assert_eq!(result.breakdown.quality.completeness_score, 0.25);
        assert!(result.recommendations.iter().any(|r| r == RECOMMEND_INCOMPLETE));
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let weights = JudgeWeights::default();
        let target = debate("Heel ander verhaal over een kandidaat", None);
        let history = vec![
            debate("Sterke communicatie", Some(0)),
            evaluation(vec![verdict("hr")], Some(9.0)),
        ];
        let result = score(&target, &history, &weights);
        for value in [
            result.confidence_score,
            result.quality_score,
            result.consistency_score,
            result.timing_score,
        ] {
            assert_unit(value);
        }
    }

    #[tokio::test]
    async fn test_judge_excludes_target_and_reports_missing_result() {
        let store = InMemoryResultStore::new();
        let run = NewEvaluationResult {
            candidate_id: "cand".into(),
            job_id: "job".into(),
            selected_personas: vec!["hr".into()],
            company_note: None,
            result_data: ResultData::Debate(vec![turn("Moderator", TurnRole::Moderator, "Welkom", 1)]),
            incomplete: false,
            duration_ms: Some(1_000),
        };
        let id = store.put(run, WriteMode::CreateOnly).await.unwrap();

        let result = judge(&store, id, &JudgeWeights::default()).await.unwrap();
        assert_eq!(result.consistency_score, 0.5);
        assert_eq!(result.similar_inputs_found, 0);

        let err = judge(&store, Uuid::new_v4(), &JudgeWeights::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
