pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod stages;

pub use config::{GroundingConfig, NormalizerConfig, PipelineConfig, ProviderConfig, ProviderKind};
pub use error::{ConfigurationError, EvaluationFailure, MalformedInputError, ProviderError, TranscriptionFailure};
pub use io::{list_audio_files, load_email_file, parse_email_json, write_report, EmailRow, EmailSource};
pub use llm::{GeminiBackend, ModelBackend, OpenAiBackend, RetryPolicy};
pub use models::{
    EvaluationResult, FailureReason, Grade, HoldSegment, HoldTime, InteractionRecord, RecordState,
    ReportEntry, ReportPeriod, ReportSummary, SourceKind, Transcript, WeeklyReport,
};
pub use pipeline::Pipeline;
pub use stages::{
    assemble_report, normalize, render_report, Evaluator, RawInputs, ReportFormat, Transcriber,
};
