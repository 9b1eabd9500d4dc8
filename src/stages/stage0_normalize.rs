use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::NormalizerConfig;
use crate::error::MalformedInputError;
use crate::io::{EmailRow, EmailSource};
use crate::llm::audio_mime_type;
use crate::models::{InteractionRecord, RawReference, SourceKind};

/// Everything the pipeline ingests in one run
#[derive(Debug, Clone, Default)]
pub struct RawInputs {
    /// Email logs, in the order they should appear in the report
    pub email_sources: Vec<EmailSource>,
    /// Audio files, in the order they should appear in the report
    pub audio_files: Vec<PathBuf>,
}

impl RawInputs {
    /// Number of inputs (rows plus files); every one yields exactly one report entry
    pub fn len(&self) -> usize {
        self.email_sources.iter().map(|s| s.rows.len()).sum::<usize>() + self.audio_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One normalized input: a record, or the reason it could not become one
pub type NormalizedInput = Result<InteractionRecord, MalformedInputError>;

/// Parts encoded in a call recording's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFileName {
    pub call_id: String,
    pub timestamp: NaiveDateTime,
    pub agent: String,
    pub counterpart: Option<String>,
}

/// Normalize raw email rows and audio references into records.
///
/// Output order is fixed: every email row (sources in the given order, rows
/// in source order), then every audio file in the given order. Exactly one
/// item is produced per input, so malformed inputs keep their slot.
pub fn normalize(inputs: &RawInputs, config: &NormalizerConfig) -> Vec<NormalizedInput> {
    let mut output = Vec::with_capacity(inputs.len());
    let mut seen_ids = HashSet::new();
    let mut row_index = 0usize;

    for source in &inputs.email_sources {
        for row in &source.rows {
            let reference = RawReference::Row {
                source: source.label.clone(),
                row: row_index,
            };
            let item = normalize_email_row(row, row_index, reference, config)
                .and_then(|record| claim_id(record, &mut seen_ids));
            output.push(item);
            row_index += 1;
        }
    }

    for path in &inputs.audio_files {
        let item = normalize_audio_file(path, config)
            .and_then(|record| claim_id(record, &mut seen_ids));
        output.push(item);
    }

    let rejected = output.iter().filter(|item| item.is_err()).count();
    if rejected > 0 {
        warn!("Normalizer rejected {} of {} inputs", rejected, output.len());
    }
    debug!("Normalized {} inputs", output.len());

    output
}

/// Reject a record whose id was already taken by an earlier input
fn claim_id(record: InteractionRecord, seen: &mut HashSet<String>) -> NormalizedInput {
    if seen.insert(record.id.clone()) {
        Ok(record)
    } else {
        Err(MalformedInputError {
            reason: format!("duplicate record id {}", record.id),
            id: record.id,
            source_kind: record.source_kind,
            reference: record.raw_reference,
        })
    }
}

fn normalize_email_row(
    row: &EmailRow,
    row_index: usize,
    reference: RawReference,
    config: &NormalizerConfig,
) -> NormalizedInput {
    let id = non_blank(&row.message_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("email-{}", row_index));

    let malformed = |reason: &str| MalformedInputError {
        id: id.clone(),
        source_kind: SourceKind::Email,
        reference: reference.clone(),
        reason: format!("row {}: {}", row_index, reason),
    };

    let agent = non_blank(&row.agent)
        .map(|a| normalize_agent(a, config))
        .ok_or_else(|| malformed("missing agent"))?;
    let counterpart = non_blank(&row.counterpart)
        .map(str::to_string)
        .ok_or_else(|| malformed("missing counterpart"))?;

    Ok(InteractionRecord {
        id: id.clone(),
        source_kind: SourceKind::Email,
        timestamp: non_blank(&row.timestamp).and_then(parse_timestamp),
        participants: vec![agent, counterpart],
        subject: non_blank(&row.subject).map(str::to_string),
        content: row.body.as_deref().map(str::trim).unwrap_or_default().to_string(),
        raw_reference: reference,
        hold: None,
    })
}

fn normalize_audio_file(path: &Path, config: &NormalizerConfig) -> NormalizedInput {
    let reference = RawReference::File {
        path: path.to_path_buf(),
    };
    let parsed = parse_call_filename(path).map_err(|reason| MalformedInputError {
        id: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        source_kind: SourceKind::Phone,
        reference: reference.clone(),
        reason,
    })?;

    let mut participants = vec![normalize_agent(&parsed.agent, config)];
    participants.extend(parsed.counterpart);

    Ok(InteractionRecord {
        id: parsed.call_id,
        source_kind: SourceKind::Phone,
        timestamp: Some(parsed.timestamp),
        participants,
        subject: None,
        content: String::new(),
        raw_reference: reference,
        hold: None,
    })
}

/// Parse `<CALLID>_<YYYYMMDD>[-HHMMSS]_<agent>[_<counterpart>].<ext>`.
///
/// CALLID is `M` followed by digits. A date without a time of day maps to
/// midnight. Participant identities come from the name alone.
pub fn parse_call_filename(path: &Path) -> Result<CallFileName, String> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| "path has no file name".to_string())?;

    if audio_mime_type(path).is_none() {
        return Err(format!("{}: unsupported audio extension", file_name));
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let parts: Vec<&str> = stem.split('_').collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(format!(
            "{}: expected CALLID_YYYYMMDD_agent[_counterpart]",
            file_name
        ));
    }

    let call_id = parts[0];
    let digits = call_id.strip_prefix('M').unwrap_or("");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("{}: call id {:?} is not M<digits>", file_name, call_id));
    }

    let timestamp = parse_call_timestamp(parts[1])
        .ok_or_else(|| format!("{}: invalid call date {:?}", file_name, parts[1]))?;

    let agent = parts[2].trim();
    if agent.is_empty() {
        return Err(format!("{}: missing agent", file_name));
    }
    let counterpart = match parts.get(3).map(|c| c.trim()) {
        Some("") => return Err(format!("{}: empty counterpart", file_name)),
        Some(c) => Some(c.to_string()),
        None => None,
    };

    Ok(CallFileName {
        call_id: call_id.to_string(),
        timestamp,
        agent: agent.to_string(),
        counterpart,
    })
}

fn parse_call_timestamp(s: &str) -> Option<NaiveDateTime> {
    match s.split_once('-') {
        Some(_) => NaiveDateTime::parse_from_str(s, "%Y%m%d-%H%M%S").ok(),
        None => NaiveDate::parse_from_str(s, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
    }
}

/// Parse the timestamp formats found in email exports.
///
/// Returns `None` for anything unrecognized; an unknown time is never
/// replaced with the current time.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    const DATETIME_FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Canonicalize an agent name: configured aliases first, then the 崎/﨑
/// variant is standardized
pub fn normalize_agent(name: &str, config: &NormalizerConfig) -> String {
    let name = name.trim();
    if let Some(canonical) = config.agent_aliases.get(&name.to_uppercase()) {
        return canonical.clone();
    }
    name.replace('崎', "﨑")
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn row(id: Option<&str>, agent: Option<&str>, counterpart: Option<&str>, body: &str) -> EmailRow {
        EmailRow {
            message_id: id.map(str::to_string),
            timestamp: Some("2026-02-10 09:30".to_string()),
            agent: agent.map(str::to_string),
            counterpart: counterpart.map(str::to_string),
            subject: Some("Booking".to_string()),
            body: Some(body.to_string()),
        }
    }

    fn source(rows: Vec<EmailRow>) -> EmailSource {
        EmailSource {
            label: "emails.json".to_string(),
            rows,
        }
    }

    #[test]
    fn test_emails_then_phones_in_input_order() {
        let inputs = RawInputs {
            email_sources: vec![source(vec![
                row(None, Some("Sato"), Some("a@example.com"), "first"),
                row(Some("1042"), Some("Tanaka"), Some("b@example.com"), "second"),
            ])],
            audio_files: vec![
                PathBuf::from("/calls/M200_20260211_Sato.mp3"),
                PathBuf::from("/calls/M100_20260210-143000_Tanaka_Kim.wav"),
            ],
        };

        let out = normalize(&inputs, &NormalizerConfig::default());
        let ids: Vec<_> = out.iter().map(|r| r.as_ref().unwrap().id.as_str()).collect();
        assert_eq!(ids, vec!["email-0", "1042", "M200", "M100"]);

        let call = out[3].as_ref().unwrap();
        assert_eq!(call.source_kind, SourceKind::Phone);
        assert_eq!(call.participants, vec!["Tanaka", "Kim"]);
        assert!(call.content.is_empty());
        assert_eq!(
            call.timestamp,
            NaiveDate::from_ymd_opt(2026, 2, 10).unwrap().and_hms_opt(14, 30, 0)
        );
    }

    #[test]
    fn test_missing_participants_rejected_with_row_index() {
        let inputs = RawInputs {
            email_sources: vec![
                source(vec![row(None, Some("Sato"), Some("a@example.com"), "ok")]),
                source(vec![row(None, Some("Sato"), None, "no sender")]),
                source(vec![row(None, Some("  "), Some("c@example.com"), "no agent")]),
            ],
            audio_files: vec![],
        };

        let out = normalize(&inputs, &NormalizerConfig::default());
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());

        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.id, "email-1");
        assert_eq!(
            err.reference,
            RawReference::Row {
                source: "emails.json".to_string(),
                row: 1
            }
        );
        assert!(err.reason.contains("missing counterpart"));

        let err = out[2].as_ref().unwrap_err();
        assert!(err.reason.contains("row 2: missing agent"));
    }

    #[test]
    fn test_bad_filename_rejected_not_skipped() {
        let inputs = RawInputs {
            email_sources: vec![],
            audio_files: vec![
                PathBuf::from("M1_20260210_Sato.mp3"),
                PathBuf::from("voicemail-final.mp3"),
            ],
        };

        let out = normalize(&inputs, &NormalizerConfig::default());
        assert_eq!(out.len(), 2);
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.id, "voicemail-final");
        assert_eq!(err.source_kind, SourceKind::Phone);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let inputs = RawInputs {
            email_sources: vec![source(vec![
                row(Some("7"), Some("Sato"), Some("a@example.com"), "one"),
                row(Some("7"), Some("Sato"), Some("a@example.com"), "two"),
            ])],
            audio_files: vec![],
        };
        let out = normalize(&inputs, &NormalizerConfig::default());
        assert!(out[0].is_ok());
        assert!(out[1].as_ref().unwrap_err().reason.contains("duplicate"));
    }

    #[test]
    fn test_parse_call_filename_errors() {
        assert!(parse_call_filename(Path::new("X1_20260210_Sato.mp3")).is_err());
        assert!(parse_call_filename(Path::new("M_20260210_Sato.mp3")).is_err());
        assert!(parse_call_filename(Path::new("M1_20261340_Sato.mp3")).is_err());
        assert!(parse_call_filename(Path::new("M1_20260210.mp3")).is_err());
        assert!(parse_call_filename(Path::new("M1_20260210_Sato_Kim_extra.mp3")).is_err());
        assert!(parse_call_filename(Path::new("M1_20260210_Sato.txt")).is_err());

        let parsed = parse_call_filename(Path::new("M1_20260210_Sato.mp3")).unwrap();
        assert_eq!(parsed.call_id, "M1");
        assert_eq!(parsed.counterpart, None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 10)
            .unwrap()
            .and_hms_opt(9, 30, 0);
        assert_eq!(parse_timestamp("2026-02-10 09:30"), expected);
        assert_eq!(parse_timestamp("2026/02/10 09:30:00"), expected);
        assert_eq!(parse_timestamp("2026-02-10T09:30:00+09:00"), expected);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_unparseable_timestamp_is_unknown() {
        let mut r = row(None, Some("Sato"), Some("a@example.com"), "hi");
        r.timestamp = Some("sometime".to_string());
        let inputs = RawInputs {
            email_sources: vec![source(vec![r])],
            audio_files: vec![],
        };
        let out = normalize(&inputs, &NormalizerConfig::default());
        assert_eq!(out[0].as_ref().unwrap().timestamp, None);
    }

    #[test]
    fn test_normalize_agent() {
        let config = NormalizerConfig {
            agent_aliases: BTreeMap::from([
                ("HAMASAKI".to_string(), "濱﨑彩那".to_string()),
                ("濱崎".to_string(), "濱﨑彩那".to_string()),
            ]),
        };
        assert_eq!(normalize_agent("Hamasaki", &config), "濱﨑彩那");
        assert_eq!(normalize_agent(" 濱崎 ", &config), "濱﨑彩那");
        assert_eq!(normalize_agent("山崎", &config), "山﨑");
        assert_eq!(normalize_agent("Yumoto", &config), "Yumoto");
    }

    #[test]
    fn test_raw_inputs_len() {
        let inputs = RawInputs {
            email_sources: vec![source(vec![row(None, None, None, ""); 3])],
            audio_files: vec![PathBuf::from("a.mp3")],
        };
        assert_eq!(inputs.len(), 4);
    }
}
