use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GroundingConfig;
use crate::error::EvaluationFailure;
use crate::llm::{
    build_grading_request, check_grounding, parse_grade, with_fallback, ModelBackend,
    PromptStrictness, RetryPolicy,
};
use crate::models::{EvaluationResult, FailureReason, Grade, InteractionRecord};

/// Grades records through a language model and checks the answer cites the record
pub struct Evaluator {
    backends: Vec<Arc<dyn ModelBackend>>,
    retry: RetryPolicy,
    grounding: GroundingConfig,
}

impl Evaluator {
    pub fn new(
        backends: Vec<Arc<dyn ModelBackend>>,
        retry: RetryPolicy,
        grounding: GroundingConfig,
    ) -> Self {
        Self {
            backends,
            retry,
            grounding,
        }
    }

    /// Grade one record. Never fails: terminal failures come back as a FAILED result.
    pub async fn evaluate(&self, record: &InteractionRecord) -> EvaluationResult {
        match self.grade_record(record).await {
            Ok(grade) => {
                info!("Evaluated {}: score {}", record.id, grade.score);
                EvaluationResult::ok(&record.id, grade)
            }
            Err(failure) => {
                warn!("{}", failure);
                EvaluationResult::failed(&record.id, failure_reason(&failure))
            }
        }
    }

    /// Grade a record, escalating to the strict prompt once if the answer
    /// does not cite the content.
    ///
    /// The record must have content; an empty record is rejected before any
    /// remote call.
    pub async fn grade_record(&self, record: &InteractionRecord) -> Result<Grade, EvaluationFailure> {
        if !record.has_content() {
            return Err(EvaluationFailure::EmptyContent {
                record_id: record.id.clone(),
            });
        }

        for strictness in [PromptStrictness::Standard, PromptStrictness::Strict] {
            let request = build_grading_request(record, strictness);
            let label = format!("evaluate {}", record.id);
            let request = &request;

            let grade = with_fallback(&self.backends, &self.retry, &label, |backend| async move {
                let raw = backend.grade(request).await?;
                parse_grade(&raw)
            })
            .await
            .map_err(|exhausted| EvaluationFailure::Provider {
                record_id: record.id.clone(),
                attempts: exhausted.attempts,
                last_error: exhausted.last_error,
            })?;

            let check = check_grounding(&grade, &record.content, &self.grounding);
            if check.grounded {
                return Ok(grade);
            }
            warn!(
                "Evaluation of {} is not grounded ({:?} prompt): {:?}",
                record.id, strictness, check.errors
            );
        }

        Err(EvaluationFailure::UngroundedRationale {
            record_id: record.id.clone(),
        })
    }
}

fn failure_reason(failure: &EvaluationFailure) -> FailureReason {
    match failure {
        EvaluationFailure::EmptyContent { .. } => FailureReason::EmptyContent,
        EvaluationFailure::UngroundedRationale { .. } => FailureReason::UngroundedRationale,
        EvaluationFailure::Provider { last_error, .. } => {
            FailureReason::Evaluation(last_error.to_string())
        }
    }
}
