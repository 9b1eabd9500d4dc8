use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{NormalizerConfig, PipelineConfig};
use crate::error::ConfigurationError;
use crate::llm::{build_backends, ModelBackend};
use crate::models::{
    EntrySubject, EvaluationResult, FailureReason, InteractionRecord, RawReference, RecordState,
    ReportEntry, ReportPeriod, SourceKind, WeeklyReport,
};
use crate::stages::{assemble_report, normalize, Evaluator, RawInputs, Transcriber};

/// Runs normalization, transcription and evaluation over one week's inputs
pub struct Pipeline {
    transcriber: Arc<Transcriber>,
    evaluator: Arc<Evaluator>,
    concurrency: usize,
    run_timeout: Option<Duration>,
    normalizer: NormalizerConfig,
    period: Option<ReportPeriod>,
}

impl Pipeline {
    pub fn new(transcriber: Transcriber, evaluator: Evaluator, config: &PipelineConfig) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            evaluator: Arc::new(evaluator),
            concurrency: config.concurrency.max(1),
            run_timeout: config.run_timeout,
            normalizer: config.normalizer.clone(),
            period: config.period,
        }
    }

    /// Build a pipeline talking to the configured providers
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::with_backends(build_backends(&config.providers)?, config))
    }

    /// Build a pipeline over explicit backends, in fallback order
    pub fn with_backends(backends: Vec<Arc<dyn ModelBackend>>, config: &PipelineConfig) -> Self {
        Self::new(
            Transcriber::new(backends.clone(), config.retry.clone()),
            Evaluator::new(backends, config.retry.clone(), config.grounding.clone()),
            config,
        )
    }

    /// Process every input and assemble the report.
    ///
    /// Always returns a report with exactly one entry per input, in
    /// ingestion order. Records dated outside the reporting period are
    /// reported FAILED without being dispatched. Records still unfinished
    /// when `cancel` fires (or the run timeout elapses) are reported FAILED
    /// "cancelled". Dropping the returned future aborts in-flight work.
    pub async fn run(
        &self,
        inputs: RawInputs,
        cancel: CancellationToken,
        generated_at: DateTime<Utc>,
    ) -> WeeklyReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", id = %run_id);
        self.run_inner(inputs, cancel, generated_at)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        inputs: RawInputs,
        cancel: CancellationToken,
        generated_at: DateTime<Utc>,
    ) -> WeeklyReport {
        info!(
            "Stage 0: Normalizing {} inputs ({} email sources, {} audio files)...",
            inputs.len(),
            inputs.email_sources.len(),
            inputs.audio_files.len()
        );
        let normalized = normalize(&inputs, &self.normalizer);
        let total = normalized.len();

        let run_token = cancel.child_token();
        let watchdog = self.run_timeout.map(|timeout| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Run timeout of {:?} elapsed, cancelling", timeout);
                token.cancel();
            })
        });

        let mut slots: Vec<Option<ReportEntry>> = Vec::with_capacity(total);
        let mut pending: Vec<(usize, InteractionRecord)> = Vec::new();
        for (position, item) in normalized.into_iter().enumerate() {
            match item {
                Ok(record) if !self.in_period(&record) => {
                    debug!("{} is outside the reporting period, skipping", record.id);
                    slots.push(Some(ReportEntry {
                        position,
                        state: RecordState::EvaluationFailed,
                        result: EvaluationResult::failed(&record.id, FailureReason::OutsidePeriod),
                        subject: EntrySubject::Record(record),
                    }));
                }
                Ok(record) => {
                    pending.push((position, record));
                    slots.push(None);
                }
                Err(err) => {
                    let result = EvaluationResult::failed(
                        &err.id,
                        FailureReason::MalformedInput(err.reason.clone()),
                    );
                    slots.push(Some(ReportEntry {
                        position,
                        subject: EntrySubject::Rejected(err),
                        state: RecordState::Rejected,
                        result,
                    }));
                }
            }
        }

        info!(
            "Stages 1-2: Processing {} records (concurrency {})...",
            pending.len(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut unfinished: BTreeMap<usize, InteractionRecord> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (position, record) in pending {
            let worker = RecordWorker {
                transcriber: Arc::clone(&self.transcriber),
                evaluator: Arc::clone(&self.evaluator),
                semaphore: Arc::clone(&semaphore),
                cancel: run_token.clone(),
            };
            unfinished.insert(position, record.clone());
            // The inner task isolates panics so the collector still knows the position.
            // Dropping the outer task aborts the inner one.
            let handle =
                AbortOnDropHandle::new(tokio::spawn(worker.run(position, record).in_current_span()));
            tasks.spawn(async move { (position, handle.await) });
        }

        let mut finished = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let Ok((position, outcome)) = joined else {
                continue;
            };
            let Some(record) = unfinished.remove(&position) else {
                continue;
            };
            let entry = match outcome {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Task for {} did not complete: {}", record.id, e);
                    let reason = if e.is_cancelled() {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Internal(e.to_string())
                    };
                    interrupted_entry(position, record, reason)
                }
            };
            finished += 1;
            debug!("{}/{} records finished", finished, total);
            slots[position] = Some(entry);
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        for (position, record) in unfinished {
            warn!("No result collected for {}", record.id);
            slots[position] = Some(interrupted_entry(
                position,
                record,
                FailureReason::Internal("no result collected".to_string()),
            ));
        }
        let entries: Vec<ReportEntry> = slots.into_iter().flatten().collect();

        info!("Stage 3: Assembling report...");
        let report = assemble_report(entries, generated_at, self.period);
        info!(
            "Complete: {} entries, {} evaluated, {} failed ({} rejected, {} outside period)",
            report.summary.total,
            report.summary.evaluated,
            report.summary.failed,
            report.summary.rejected,
            report.summary.out_of_period
        );
        report
    }

    fn in_period(&self, record: &InteractionRecord) -> bool {
        self.period
            .as_ref()
            .is_none_or(|period| period.covers(record.timestamp))
    }
}

/// Everything one record's task needs; shared parts are read-only
struct RecordWorker {
    transcriber: Arc<Transcriber>,
    evaluator: Arc<Evaluator>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RecordWorker {
    async fn run(self, position: usize, mut record: InteractionRecord) -> ReportEntry {
        let mut state = RecordState::Ingested;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            None => None,
            Some(_permit) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.process(&mut record, &mut state) => Some(result),
            },
        };

        let result = result.unwrap_or_else(|| {
            debug!("{} cancelled in state {}", record.id, state);
            state = cancelled_state(state);
            EvaluationResult::failed(&record.id, FailureReason::Cancelled)
        });

        ReportEntry {
            position,
            subject: EntrySubject::Record(record),
            state,
            result,
        }
    }

    /// Drive one record to a terminal state.
    ///
    /// Phone records are transcribed before anything else; a record reaches
    /// the evaluator only once it has content.
    async fn process(
        &self,
        record: &mut InteractionRecord,
        state: &mut RecordState,
    ) -> EvaluationResult {
        if record.source_kind == SourceKind::Phone {
            advance(state, RecordState::Transcribing, record);
            if let Err(reason) = self.transcribe(record).await {
                advance(state, RecordState::TranscriptionFailed, record);
                return EvaluationResult::failed(&record.id, FailureReason::Transcription(reason));
            }
            advance(state, RecordState::Transcribed, record);
        }

        if !record.has_content() {
            advance(state, RecordState::EvaluationFailed, record);
            return EvaluationResult::failed(&record.id, FailureReason::EmptyContent);
        }

        advance(state, RecordState::Evaluating, record);
        let result = self.evaluator.evaluate(record).await;
        let next = if result.is_ok() {
            RecordState::Evaluated
        } else {
            RecordState::EvaluationFailed
        };
        advance(state, next, record);
        result
    }

    async fn transcribe(&self, record: &mut InteractionRecord) -> Result<(), String> {
        if !record.needs_transcript() {
            return Ok(());
        }
        let audio_ref = match &record.raw_reference {
            RawReference::File { path } => path.clone(),
            RawReference::Row { .. } => return Err("no audio file for record".to_string()),
        };
        let transcript = self
            .transcriber
            .transcribe(&audio_ref)
            .await
            .map_err(|failure| failure.to_string())?;
        if record.attach_transcript(transcript) {
            Ok(())
        } else {
            Err("empty transcript".to_string())
        }
    }
}

fn interrupted_entry(
    position: usize,
    record: InteractionRecord,
    reason: FailureReason,
) -> ReportEntry {
    ReportEntry {
        position,
        state: RecordState::EvaluationFailed,
        result: EvaluationResult::failed(&record.id, reason),
        subject: EntrySubject::Record(record),
    }
}

fn advance(state: &mut RecordState, next: RecordState, record: &InteractionRecord) {
    debug_assert!(
        state.can_transition_to(next, record.source_kind),
        "{}: illegal transition {} -> {}",
        record.id,
        state,
        next
    );
    debug!("{}: {} -> {}", record.id, state, next);
    *state = next;
}

/// Terminal state for a record interrupted in `state`
fn cancelled_state(state: RecordState) -> RecordState {
    match state {
        RecordState::Transcribing => RecordState::TranscriptionFailed,
        terminal if terminal.is_terminal() => terminal,
        _ => RecordState::EvaluationFailed,
    }
}
