use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{RawReference, SourceKind};

/// An input that could not be normalized into a record.
///
/// Fatal for that input only; the pipeline reports it and continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("malformed {source_kind} input {reference}: {reason}")]
pub struct MalformedInputError {
    /// Identifier the input would have had (row-derived or filename-derived)
    pub id: String,
    pub source_kind: SourceKind,
    pub reference: RawReference,
    pub reason: String,
}

/// Error from a single call to a remote provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth retrying: network trouble, timeouts, rate limits, 5xx, unusable output
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help: bad request, unsupported audio, rejected credentials
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{} API error: {} - {}", provider, status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ProviderError::Transient(message)
        } else {
            ProviderError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if !(status.as_u16() == 429 || status.is_server_error()) => {
                ProviderError::Permanent(e.to_string())
            }
            _ => ProviderError::Transient(e.to_string()),
        }
    }
}

/// Terminal transcription failure for one audio file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transcription of {} failed after {attempts} attempt(s): {last_error}", audio_ref.display())]
pub struct TranscriptionFailure {
    pub audio_ref: PathBuf,
    pub attempts: u32,
    pub last_error: ProviderError,
}

/// Terminal evaluation failure for one record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationFailure {
    #[error("record {record_id} has no content to evaluate")]
    EmptyContent { record_id: String },

    #[error("evaluation of {record_id} failed after {attempts} attempt(s): {last_error}")]
    Provider {
        record_id: String,
        attempts: u32,
        last_error: ProviderError,
    },

    #[error("evaluation of {record_id} cited no evidence from the content")]
    UngroundedRationale { record_id: String },
}

/// Missing or invalid configuration; aborts the run before any processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{variable} must be set to use the {provider} provider")]
    MissingCredential {
        provider: &'static str,
        variable: &'static str,
    },

    #[error("unknown provider {0:?} (expected \"gemini\" or \"openai\")")]
    UnknownProvider(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to build the {provider} HTTP client: {reason}")]
    HttpClient {
        provider: &'static str,
        reason: String,
    },
}
