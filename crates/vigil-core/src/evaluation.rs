//! Session self-evaluation and scoring.
//!
//! The scorer is a seam: the lifecycle only depends on [`EvaluationScorer`].
//! [`WeightedScorer`] is the bundled implementation.

use serde::{Deserialize, Serialize};

/// How the task ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    #[default]
    Completed,
    Partial,
    Abandoned,
    Blocked,
}

/// Caller-supplied evaluation of a session. Ratings are 1-5.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub prompt_quality: u8,
    pub context_provided: u8,
    pub independence_level: u8,
    pub scope_quality: u8,
    #[serde(default)]
    pub tools_leveraged: u8,
    #[serde(default)]
    pub task_outcome: TaskOutcome,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_quality_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_outcome_reason: Option<String>,
}

/// Computes a 0-100 score from an evaluation.
pub trait EvaluationScorer: Send + Sync {
    fn score(&self, evaluation: &Evaluation) -> u32;
}

/// Weighted average of the ratings, scaled to 0-100 and discounted by outcome.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    pub prompt_quality: f64,
    pub context_provided: f64,
    pub independence_level: f64,
    pub scope_quality: f64,
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self {
            prompt_quality: 0.30,
            context_provided: 0.25,
            independence_level: 0.25,
            scope_quality: 0.20,
        }
    }
}

impl WeightedScorer {
    fn outcome_factor(outcome: TaskOutcome) -> f64 {
        match outcome {
            TaskOutcome::Completed => 1.0,
            TaskOutcome::Partial => 0.8,
            TaskOutcome::Blocked => 0.6,
            TaskOutcome::Abandoned => 0.5,
        }
    }
}

impl EvaluationScorer for WeightedScorer {
    fn score(&self, evaluation: &Evaluation) -> u32 {
        // Ratings outside 1-5 are clamped rather than rejected.
        let rating = |value: u8| f64::from(value.clamp(1, 5)) / 5.0;
        let total_weight = self.prompt_quality
            + self.context_provided
            + self.independence_level
            + self.scope_quality;
        if total_weight <= 0.0 {
            return 0;
        }

        let weighted = rating(evaluation.prompt_quality) * self.prompt_quality
            + rating(evaluation.context_provided) * self.context_provided
            + rating(evaluation.independence_level) * self.independence_level
            + rating(evaluation.scope_quality) * self.scope_quality;

        let score = weighted / total_weight * 100.0 * Self::outcome_factor(evaluation.task_outcome);
        score.round().clamp(0.0, 100.0) as u32
    }
}
