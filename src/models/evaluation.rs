use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lowest and highest score the grading rubric allows
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Criteria every grade is broken down into
pub const CRITERIA: [&str; 4] = ["politeness", "clarity", "accuracy", "empathy"];

/// A successful, evidence-backed grade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    /// Overall score (1-5)
    pub score: u8,
    /// Per-criterion scores (1-5), sorted by criterion name
    #[serde(default)]
    pub criteria: BTreeMap<String, u8>,
    /// Justification for the score
    pub rationale: String,
    /// Quoted or paraphrased excerpts from the interaction that back the rationale
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Suggested improvement, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement: Option<String>,
}

impl Grade {
    /// Check all scores are inside the rubric's bounds
    pub fn scores_in_bounds(&self) -> bool {
        let in_bounds = |s: u8| (MIN_SCORE..=MAX_SCORE).contains(&s);
        in_bounds(self.score) && self.criteria.values().all(|&s| in_bounds(s))
    }
}

/// Why a record ended up FAILED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The raw input could not be normalized into a record
    MalformedInput(String),
    /// Nothing to grade (e.g. an email with an empty body)
    EmptyContent,
    /// The interaction's date falls outside the reporting period
    OutsidePeriod,
    /// Transcription failed terminally
    Transcription(String),
    /// The evaluation call failed terminally
    Evaluation(String),
    /// The evaluator never cited evidence from the content, even under the strict prompt
    UngroundedRationale,
    /// The run was cancelled or timed out before this record finished
    Cancelled,
    /// The record's task died unexpectedly
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MalformedInput(detail) => write!(f, "malformed input: {}", detail),
            FailureReason::EmptyContent => f.write_str("empty content"),
            FailureReason::OutsidePeriod => f.write_str("outside reporting period"),
            FailureReason::Transcription(detail) => write!(f, "transcription failed: {}", detail),
            FailureReason::Evaluation(detail) => write!(f, "evaluation failed: {}", detail),
            FailureReason::UngroundedRationale => f.write_str("ungrounded rationale"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    Ok,
    Failed,
}

/// Outcome of grading one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationOutcome {
    Ok(Grade),
    Failed { reason: FailureReason },
}

/// The graded result for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub record_id: String,
    #[serde(flatten)]
    pub outcome: EvaluationOutcome,
}

impl EvaluationResult {
    pub fn ok(record_id: impl Into<String>, grade: Grade) -> Self {
        Self {
            record_id: record_id.into(),
            outcome: EvaluationOutcome::Ok(grade),
        }
    }

    pub fn failed(record_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            record_id: record_id.into(),
            outcome: EvaluationOutcome::Failed { reason },
        }
    }

    pub fn status(&self) -> EvaluationStatus {
        match self.outcome {
            EvaluationOutcome::Ok(_) => EvaluationStatus::Ok,
            EvaluationOutcome::Failed { .. } => EvaluationStatus::Failed,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == EvaluationStatus::Ok
    }

    pub fn grade(&self) -> Option<&Grade> {
        match &self.outcome {
            EvaluationOutcome::Ok(grade) => Some(grade),
            EvaluationOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.outcome {
            EvaluationOutcome::Ok(_) => None,
            EvaluationOutcome::Failed { reason } => Some(reason),
        }
    }
}
