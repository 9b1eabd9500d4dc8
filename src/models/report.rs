use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedInputError;
use crate::models::{EvaluationResult, FailureReason, InteractionRecord, RecordState, SourceKind};

/// Reporting period; both ends are inclusive days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportPeriod {
    /// Whether an interaction at `timestamp` belongs to this period.
    ///
    /// An unknown timestamp cannot be placed, so it is kept in scope.
    pub fn covers(&self, timestamp: Option<NaiveDateTime>) -> bool {
        match timestamp {
            Some(ts) => (self.start..=self.end).contains(&ts.date()),
            None => true,
        }
    }
}

/// What a report entry is about: a normalized record, or an input that never
/// became one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrySubject {
    Record(InteractionRecord),
    Rejected(MalformedInputError),
}

impl EntrySubject {
    pub fn id(&self) -> &str {
        match self {
            EntrySubject::Record(record) => &record.id,
            EntrySubject::Rejected(err) => &err.id,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self {
            EntrySubject::Record(record) => record.source_kind,
            EntrySubject::Rejected(err) => err.source_kind,
        }
    }

    pub fn record(&self) -> Option<&InteractionRecord> {
        match self {
            EntrySubject::Record(record) => Some(record),
            EntrySubject::Rejected(_) => None,
        }
    }
}

/// One line of the weekly report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Ingestion position (0-based); entries are always sorted by it
    pub position: usize,
    pub subject: EntrySubject,
    /// Terminal state the record reached
    pub state: RecordState,
    pub result: EvaluationResult,
}

/// Counts for one slice of the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, ok: bool) {
        self.total += 1;
        if ok {
            self.evaluated += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Per-agent aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub counts: StatusCounts,
    /// Sum of overall scores of evaluated records
    pub score_total: u32,
    /// Hold seconds summed over calls with a hold measurement
    #[serde(default)]
    pub hold_total_secs: u32,
    /// Calls that came back with a hold measurement
    #[serde(default)]
    pub hold_measured_calls: usize,
}

impl AgentSummary {
    /// Average overall score of evaluated records, if any
    pub fn average_score(&self) -> Option<f64> {
        if self.counts.evaluated == 0 {
            None
        } else {
            Some(self.score_total as f64 / self.counts.evaluated as f64)
        }
    }

    /// Average hold per measured call, if any call was measured
    pub fn average_hold_secs(&self) -> Option<f64> {
        if self.hold_measured_calls == 0 {
            None
        } else {
            Some(self.hold_total_secs as f64 / self.hold_measured_calls as f64)
        }
    }
}

/// Aggregate counts over the whole report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Every ingested input, including rejected ones
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,
    /// Inputs that failed normalization (a subset of `failed`)
    pub rejected: usize,
    /// Records dated outside the reporting period (a subset of `failed`)
    #[serde(default)]
    pub out_of_period: usize,
    pub by_source: BTreeMap<SourceKind, StatusCounts>,
    pub by_agent: BTreeMap<String, AgentSummary>,
}

impl ReportSummary {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut summary = ReportSummary::default();

        for entry in entries {
            let ok = entry.result.is_ok();
            summary.total += 1;
            if ok {
                summary.evaluated += 1;
            } else {
                summary.failed += 1;
            }
            if matches!(entry.subject, EntrySubject::Rejected(_)) {
                summary.rejected += 1;
            }
            if entry.result.failure_reason() == Some(&FailureReason::OutsidePeriod) {
                summary.out_of_period += 1;
            }

            summary
                .by_source
                .entry(entry.subject.source_kind())
                .or_default()
                .add(ok);

            if let Some(record) = entry.subject.record() {
                let agent = summary.by_agent.entry(record.agent().to_string()).or_default();
                agent.counts.add(ok);
                if let Some(grade) = entry.result.grade() {
                    agent.score_total += grade.score as u32;
                }
                if let Some(hold) = &record.hold {
                    agent.hold_total_secs += hold.total_secs;
                    agent.hold_measured_calls += 1;
                }
            }
        }

        summary
    }
}

/// The assembled weekly report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<ReportPeriod>,
    pub entries: Vec<ReportEntry>,
    pub summary: ReportSummary,
}
