use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{
    EntrySubject, EvaluationOutcome, HoldTime, ReportEntry, ReportPeriod, ReportSummary,
    WeeklyReport,
};

/// Output formats for the rendered report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format {:?} (expected markdown or json)", other)),
        }
    }
}

/// Build the report from entries.
///
/// Entries are put in ingestion order regardless of the order they arrive
/// in; nothing is re-sorted by score.
pub fn assemble_report(
    mut entries: Vec<ReportEntry>,
    generated_at: DateTime<Utc>,
    period: Option<ReportPeriod>,
) -> WeeklyReport {
    entries.sort_by_key(|e| e.position);
    let summary = ReportSummary::from_entries(&entries);
    WeeklyReport {
        generated_at,
        period,
        entries,
        summary,
    }
}

/// Render a report document; a pure function of the report
pub fn render_report(report: &WeeklyReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Markdown => Ok(render_markdown(report)),
        ReportFormat::Json => {
            let mut json =
                serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// Render the report as Markdown
pub fn render_markdown(report: &WeeklyReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Weekly Interaction Report");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Generated: {}",
        report.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if let Some(period) = report.period {
        let _ = writeln!(out, "Period: {} ~ {}", period.start, period.end);
    }
    let _ = writeln!(out);

    render_summary(&mut out, &report.summary);

    let _ = writeln!(out, "## Entries");
    let _ = writeln!(out);
    for entry in &report.entries {
        render_entry(&mut out, entry);
    }

    out
}

fn render_summary(out: &mut String, summary: &ReportSummary) {
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Total processed: {}", summary.total);
    let _ = writeln!(out, "- Evaluated: {}", summary.evaluated);
    let _ = writeln!(out, "- Failed: {}", summary.failed);
    let _ = writeln!(out, "- Rejected at ingestion: {}", summary.rejected);
    if summary.out_of_period > 0 {
        let _ = writeln!(out, "- Outside reporting period: {}", summary.out_of_period);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "| Source | Total | Evaluated | Failed |");
    let _ = writeln!(out, "|--------|-------|-----------|--------|");
    for (kind, counts) in &summary.by_source {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            kind, counts.total, counts.evaluated, counts.failed
        );
    }
    let _ = writeln!(out);

    if !summary.by_agent.is_empty() {
        let _ = writeln!(out, "### By agent");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Agent | Total | Evaluated | Failed | Avg score | Avg hold |");
        let _ = writeln!(out, "|-------|-------|-----------|--------|-----------|----------|");
        for (agent, agent_summary) in &summary.by_agent {
            let average = agent_summary
                .average_score()
                .map(|avg| format!("{:.1}/5", avg))
                .unwrap_or_else(|| "n/a".to_string());
            let hold = agent_summary
                .average_hold_secs()
                .map(|secs| format!("{:.0}s", secs))
                .unwrap_or_else(|| "n/a".to_string());
            let counts = agent_summary.counts;
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                escape_cell(agent),
                counts.total,
                counts.evaluated,
                counts.failed,
                average,
                hold
            );
        }
        let _ = writeln!(out);
    }
}

fn render_entry(out: &mut String, entry: &ReportEntry) {
    let status = match &entry.result.outcome {
        EvaluationOutcome::Ok(_) => "OK",
        EvaluationOutcome::Failed { .. } => "FAILED",
    };
    let _ = writeln!(
        out,
        "### {}. {} [{}] {}",
        entry.position + 1,
        entry.subject.id(),
        entry.subject.source_kind(),
        status
    );
    let _ = writeln!(out);

    match &entry.subject {
        EntrySubject::Record(record) => {
            let _ = writeln!(out, "- Participants: {}", record.participants.join(", "));
            let timestamp = record
                .timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = writeln!(out, "- Timestamp: {}", timestamp);
            if let Some(subject) = &record.subject {
                let _ = writeln!(out, "- Subject: {}", single_line(subject));
            }
            let _ = writeln!(out, "- Reference: {}", record.raw_reference);
            if let Some(hold) = &record.hold {
                let _ = writeln!(out, "- Hold: {}", describe_hold(hold));
            }
        }
        EntrySubject::Rejected(err) => {
            let _ = writeln!(out, "- Reference: {}", err.reference);
        }
    }
    let _ = writeln!(out, "- State: {}", entry.state);

    match &entry.result.outcome {
        EvaluationOutcome::Ok(grade) => {
            let _ = writeln!(out, "- Score: {}/5", grade.score);
            if !grade.criteria.is_empty() {
                let criteria: Vec<String> = grade
                    .criteria
                    .iter()
                    .map(|(name, score)| format!("{} {}", name, score))
                    .collect();
                let _ = writeln!(out, "- Criteria: {}", criteria.join(", "));
            }
            let _ = writeln!(out, "- Rationale: {}", single_line(&grade.rationale));
            let _ = writeln!(out, "- Evidence:");
            for item in &grade.evidence {
                let _ = writeln!(out, "  - \"{}\"", single_line(item));
            }
            if let Some(improvement) = &grade.improvement {
                let _ = writeln!(out, "- Improvement: {}", single_line(improvement));
            }
        }
        EvaluationOutcome::Failed { reason } => {
            let _ = writeln!(out, "- FAILED: {}", single_line(&reason.to_string()));
        }
    }
    let _ = writeln!(out);
}

/// e.g. "95s in 2 segment(s), 15.8% of a 600s call"
fn describe_hold(hold: &HoldTime) -> String {
    let mut text = format!("{}s in {} segment(s)", hold.total_secs, hold.segments.len());
    if let (Some(percent), Some(call)) = (hold.percent_of_call(), hold.call_secs) {
        let _ = write!(text, ", {:.1}% of a {}s call", percent, call);
    }
    text
}

/// Collapse newlines so free text stays inside its list item
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_cell(text: &str) -> String {
    single_line(text).replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::error::MalformedInputError;
    use crate::models::{
        EvaluationResult, FailureReason, Grade, HoldSegment, InteractionRecord, RawReference,
        RecordState, SourceKind,
    };

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 18, 0, 0).unwrap()
    }

    fn record(id: &str, kind: SourceKind, agent: &str) -> InteractionRecord {
        InteractionRecord {
            id: id.to_string(),
            source_kind: kind,
            timestamp: NaiveDate::from_ymd_opt(2026, 2, 10)
                .unwrap()
                .and_hms_opt(9, 0, 0),
            participants: vec![agent.to_string(), "guest@example.com".to_string()],
            subject: Some("Change of\nbooking".to_string()),
            content: "body".to_string(),
            raw_reference: RawReference::Row {
                source: "emails.json".to_string(),
                row: 0,
            },
            hold: None,
        }
    }

    fn ok_entry(position: usize, id: &str, kind: SourceKind, agent: &str, score: u8) -> ReportEntry {
        ReportEntry {
            position,
            subject: EntrySubject::Record(record(id, kind, agent)),
            state: RecordState::Evaluated,
            result: EvaluationResult::ok(
                id,
                Grade {
                    score,
                    criteria: BTreeMap::from([("clarity".to_string(), 4), ("accuracy".to_string(), 5)]),
                    rationale: "Clear answer".to_string(),
                    evidence: vec!["your booking is confirmed".to_string()],
                    improvement: Some("Offer alternatives".to_string()),
                },
            ),
        }
    }

    fn entries() -> Vec<ReportEntry> {
        vec![
            ok_entry(2, "M1", SourceKind::Phone, "Sato", 3),
            ok_entry(0, "email-0", SourceKind::Email, "Sato", 5),
            ReportEntry {
                position: 1,
                subject: EntrySubject::Rejected(MalformedInputError {
                    id: "email-1".to_string(),
                    source_kind: SourceKind::Email,
                    reference: RawReference::Row {
                        source: "emails.json".to_string(),
                        row: 1,
                    },
                    reason: "row 1: missing agent".to_string(),
                }),
                state: RecordState::Rejected,
                result: EvaluationResult::failed(
                    "email-1",
                    FailureReason::MalformedInput("row 1: missing agent".to_string()),
                ),
            },
            ReportEntry {
                position: 3,
                subject: EntrySubject::Record(record("M2", SourceKind::Phone, "Tanaka")),
                state: RecordState::TranscriptionFailed,
                result: EvaluationResult::failed(
                    "M2",
                    FailureReason::Transcription("permanent: corrupt audio".to_string()),
                ),
            },
        ]
    }

    #[test]
    fn test_assemble_orders_by_position() {
        let report = assemble_report(entries(), generated_at(), None);
        let ids: Vec<_> = report.entries.iter().map(|e| e.subject.id()).collect();
        assert_eq!(ids, vec!["email-0", "email-1", "M1", "M2"]);
    }

    #[test]
    fn test_summary_counts() {
        let report = assemble_report(entries(), generated_at(), None);
        let summary = &report.summary;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.rejected, 1);

        let email = summary.by_source[&SourceKind::Email];
        assert_eq!((email.total, email.evaluated, email.failed), (2, 1, 1));
        let phone = summary.by_source[&SourceKind::Phone];
        assert_eq!((phone.total, phone.evaluated, phone.failed), (2, 1, 1));

        let sato = &summary.by_agent["Sato"];
        assert_eq!(sato.counts.evaluated, 2);
        assert_eq!(sato.average_score(), Some(4.0));
        assert_eq!(summary.by_agent["Tanaka"].average_score(), None);
    }

    #[test]
    fn test_markdown_renders_every_entry() {
        let period = ReportPeriod {
            start: NaiveDate::from_ymd_opt(2026, 2, 9).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
        };
        let report = assemble_report(entries(), generated_at(), Some(period));
        let md = render_markdown(&report);

        assert!(md.starts_with("# Weekly Interaction Report\n"));
        assert!(md.contains("Generated: 2026-02-14T18:00:00Z"));
        assert!(md.contains("Period: 2026-02-09 ~ 2026-02-14"));
        assert!(md.contains("| EMAIL | 2 | 1 | 1 |"));
        assert!(md.contains("| Sato | 2 | 2 | 0 | 4.0/5 | n/a |"));
        assert!(!md.contains("- Hold:"));
        assert!(!md.contains("Outside reporting period"));
        assert!(md.contains("### 1. email-0 [EMAIL] OK"));
        assert!(md.contains("### 2. email-1 [EMAIL] FAILED"));
        assert!(md.contains("- FAILED: malformed input: row 1: missing agent"));
        assert!(md.contains("### 4. M2 [PHONE] FAILED"));
        assert!(md.contains("- State: TRANSCRIPTION_FAILED"));
        assert!(md.contains("- Criteria: accuracy 5, clarity 4"));
        assert!(md.contains("- Subject: Change of booking"));
        assert_eq!(md.matches("] OK\n").count() + md.matches("] FAILED\n").count(), 4);
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_report(&assemble_report(entries(), generated_at(), None), ReportFormat::Markdown)
            .unwrap();
        let b = render_report(&assemble_report(entries(), generated_at(), None), ReportFormat::Markdown)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_rendering() {
        let report = assemble_report(entries(), generated_at(), None);
        let json = render_report(&report, ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"].as_array().unwrap().len(), 4);
        assert_eq!(value["entries"][1]["result"]["status"], "FAILED");
        assert_eq!(value["summary"]["rejected"], 1);

        let back: WeeklyReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_report_format_parse() {
        assert_eq!("md".parse::<ReportFormat>(), Ok(ReportFormat::Markdown));
        assert_eq!("JSON".parse::<ReportFormat>(), Ok(ReportFormat::Json));
        assert!("pdf".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_file_reference_renders() {
        let mut entry = ok_entry(0, "M9", SourceKind::Phone, "Sato", 4);
        if let EntrySubject::Record(record) = &mut entry.subject {
            record.raw_reference = RawReference::File {
                path: PathBuf::from("/calls/M9_20260210_Sato.mp3"),
            };
        }
        let md = render_markdown(&assemble_report(vec![entry], generated_at(), None));
        assert!(md.contains("- Reference: /calls/M9_20260210_Sato.mp3"));
    }

    #[test]
    fn test_hold_time_per_entry_and_per_agent() {
        let mut measured = ok_entry(0, "M1", SourceKind::Phone, "Sato", 4);
        if let EntrySubject::Record(record) = &mut measured.subject {
            record.hold = Some(HoldTime {
                total_secs: 95,
                call_secs: Some(600),
                segments: vec![
                    HoldSegment {
                        start_secs: 60,
                        end_secs: 120,
                        trigger: Some("please hold".to_string()),
                    },
                    HoldSegment {
                        start_secs: 300,
                        end_secs: 335,
                        trigger: None,
                    },
                ],
            });
        }
        let mut short = ok_entry(1, "M2", SourceKind::Phone, "Sato", 4);
        if let EntrySubject::Record(record) = &mut short.subject {
            record.hold = Some(HoldTime {
                total_secs: 25,
                call_secs: None,
                segments: Vec::new(),
            });
        }
        let unmeasured = ok_entry(2, "M3", SourceKind::Phone, "Sato", 4);

        let report = assemble_report(vec![measured, short, unmeasured], generated_at(), None);
        let sato = &report.summary.by_agent["Sato"];
        assert_eq!(sato.hold_measured_calls, 2);
        assert_eq!(sato.average_hold_secs(), Some(60.0));

        let md = render_markdown(&report);
        assert!(md.contains("- Hold: 95s in 2 segment(s), 15.8% of a 600s call"));
        assert!(md.contains("- Hold: 25s in 0 segment(s)\n"));
        assert_eq!(md.matches("- Hold:").count(), 2);
        assert!(md.contains("| Sato | 3 | 3 | 0 | 4.0/5 | 60s |"));
    }

    #[test]
    fn test_out_of_period_count_is_rendered() {
        let mut entries = entries();
        entries.push(ReportEntry {
            position: 4,
            subject: EntrySubject::Record(record("email-9", SourceKind::Email, "Kim")),
            state: RecordState::EvaluationFailed,
            result: EvaluationResult::failed("email-9", FailureReason::OutsidePeriod),
        });
        let report = assemble_report(entries, generated_at(), None);
        assert_eq!(report.summary.out_of_period, 1);
        assert_eq!(report.summary.failed, 3);
        assert_eq!(report.summary.evaluated + report.summary.failed, report.summary.total);

        let md = render_markdown(&report);
        assert!(md.contains("- Outside reporting period: 1"));
        assert!(md.contains("- FAILED: outside reporting period"));
    }
}
