use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Where an interaction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Email,
    Phone,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Email => "EMAIL",
            SourceKind::Phone => "PHONE",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle back to the source artifact, kept for traceability and re-processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawReference {
    /// A row of a tabular email log. `row` is the global ingestion row index.
    Row { source: String, row: usize },
    /// An audio file on disk
    File { path: PathBuf },
}

impl fmt::Display for RawReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawReference::Row { source, row } => write!(f, "{}#row{}", source, row),
            RawReference::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// One stretch of a call spent on hold, in whole seconds from the start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldSegment {
    pub start_secs: u32,
    pub end_secs: u32,
    /// What the hold was announced with, e.g. "please hold"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl HoldSegment {
    pub fn duration_secs(&self) -> u32 {
        self.end_secs.saturating_sub(self.start_secs)
    }
}

/// Hold time detected in a call recording
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldTime {
    pub total_secs: u32,
    /// Length of the whole call, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_secs: Option<u32>,
    #[serde(default)]
    pub segments: Vec<HoldSegment>,
}

impl HoldTime {
    /// Share of the call spent on hold, as a percentage
    pub fn percent_of_call(&self) -> Option<f64> {
        match self.call_secs {
            Some(call) if call > 0 => Some(self.total_secs as f64 * 100.0 / call as f64),
            _ => None,
        }
    }
}

/// A transcription result: the text and whatever call metrics came with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub hold: Option<HoldTime>,
}

impl Transcript {
    /// A transcript with no call metrics
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hold: None,
        }
    }
}

/// A normalized agent/customer interaction (email or call)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Unique per run
    pub id: String,
    pub source_kind: SourceKind,
    /// `None` when the source carried no parseable time
    pub timestamp: Option<NaiveDateTime>,
    /// Agent first, then the counterpart when known
    pub participants: Vec<String>,
    /// Email subject or call topic
    pub subject: Option<String>,
    /// Email body, or the call transcript once transcription has completed
    pub content: String,
    pub raw_reference: RawReference,
    /// Hold-time measurements of a call, when the transcription provider reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<HoldTime>,
}

impl InteractionRecord {
    /// The agent handling this interaction
    pub fn agent(&self) -> &str {
        self.participants.first().map(String::as_str).unwrap_or("Unknown")
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Whether this record still needs a transcript before it can be graded
    pub fn needs_transcript(&self) -> bool {
        self.source_kind == SourceKind::Phone && !self.has_content()
    }

    /// Fill in the transcript of a phone record.
    ///
    /// Content moves from empty to populated exactly once. Email records,
    /// phone records that already have content, and blank transcripts are
    /// left untouched and report `false`. Hold time travels with the text.
    pub fn attach_transcript(&mut self, transcript: Transcript) -> bool {
        if !self.needs_transcript() || transcript.text.trim().is_empty() {
            return false;
        }
        self.content = transcript.text;
        self.hold = transcript.hold;
        true
    }
}

/// Per-record processing state
///
/// ```text
/// INGESTED -> (TRANSCRIBING -> TRANSCRIBED | TRANSCRIPTION_FAILED)
///          -> EVALUATING -> (EVALUATED | EVALUATION_FAILED)
/// ```
///
/// Email records go straight from `Ingested` to `Evaluating`. `Rejected`
/// marks inputs that never became a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Rejected,
    Ingested,
    Transcribing,
    Transcribed,
    TranscriptionFailed,
    Evaluating,
    Evaluated,
    EvaluationFailed,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Rejected
                | RecordState::Evaluated
                | RecordState::TranscriptionFailed
                | RecordState::EvaluationFailed
        )
    }

    /// Check a transition against the state machine.
    ///
    /// `Ingested` may jump to `EvaluationFailed` directly: that is how a record
    /// that could not be dispatched at all (cancellation, empty body) ends.
    pub fn can_transition_to(&self, next: RecordState, kind: SourceKind) -> bool {
        use RecordState::*;
        match (self, next) {
            (Ingested, Transcribing) => kind == SourceKind::Phone,
            (Ingested, Evaluating) => kind == SourceKind::Email,
            (Ingested, EvaluationFailed) => true,
            (Transcribing, Transcribed) | (Transcribing, TranscriptionFailed) => true,
            (Transcribed, Evaluating) => true,
            (Transcribed, EvaluationFailed) => true,
            (Evaluating, Evaluated) | (Evaluating, EvaluationFailed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Rejected => "REJECTED",
            RecordState::Ingested => "INGESTED",
            RecordState::Transcribing => "TRANSCRIBING",
            RecordState::Transcribed => "TRANSCRIBED",
            RecordState::TranscriptionFailed => "TRANSCRIPTION_FAILED",
            RecordState::Evaluating => "EVALUATING",
            RecordState::Evaluated => "EVALUATED",
            RecordState::EvaluationFailed => "EVALUATION_FAILED",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
