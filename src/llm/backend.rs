use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ConfigurationError, ProviderError};
use crate::llm::gemini::GeminiBackend;
use crate::llm::openai::OpenAiBackend;
use crate::llm::retry::{retry_with_backoff, RetryExhausted, RetryPolicy};
use crate::models::Transcript;

/// Audio formats the transcription providers accept, by file extension
const AUDIO_FORMATS: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    ("flac", "audio/flac"),
    ("webm", "audio/webm"),
];

/// MIME type for a supported audio file, by extension
pub fn audio_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    AUDIO_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// An audio file loaded into memory, ready to upload
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    /// Read an audio file from disk.
    ///
    /// Unsupported formats, unreadable and empty files are permanent errors:
    /// no provider can do anything with them.
    pub async fn load(path: &Path) -> Result<Self, ProviderError> {
        let mime_type = audio_mime_type(path).ok_or_else(|| {
            ProviderError::Permanent(format!("unsupported audio format: {}", path.display()))
        })?;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ProviderError::Permanent(format!("failed to read {}: {}", path.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "audio file is empty: {}",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            mime_type,
            bytes,
        })
    }
}

/// A grading prompt: system rules plus the record-specific user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingRequest {
    pub system: String,
    pub user: String,
}

/// A remote model provider able to transcribe audio and grade interactions.
///
/// Implementors hold only read-only configuration and a connection pool, so
/// one instance is shared by every in-flight record.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Turn an audio clip into transcript text, plus hold time when the
    /// provider can measure it
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, ProviderError>;

    /// Send a grading request; returns the raw JSON text the model produced
    async fn grade(&self, request: &GradingRequest) -> Result<String, ProviderError>;
}

/// Build the backend for one configured provider
pub fn build_backend(config: &ProviderConfig) -> Result<Arc<dyn ModelBackend>, ConfigurationError> {
    let backend: Arc<dyn ModelBackend> = match config.kind {
        ProviderKind::Gemini => Arc::new(GeminiBackend::new(config.clone())?),
        ProviderKind::OpenAi => Arc::new(OpenAiBackend::new(config.clone())?),
    };
    Ok(backend)
}

/// Build backends for all configured providers, in fallback order
pub fn build_backends(
    configs: &[ProviderConfig],
) -> Result<Vec<Arc<dyn ModelBackend>>, ConfigurationError> {
    configs.iter().map(build_backend).collect()
}

/// Run `op` against each backend in order, with retries.
///
/// The next backend is tried only when the current one has exhausted its
/// retry budget on transient errors. A permanent error ends the call. The
/// returned attempt count covers every backend tried.
pub async fn with_fallback<T, F, Fut>(
    backends: &[Arc<dyn ModelBackend>],
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(Arc<dyn ModelBackend>) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0;
    let mut last_error = ProviderError::Permanent("no providers configured".to_string());

    for (i, backend) in backends.iter().enumerate() {
        let call_label = format!("{} via {}", label, backend.name());
        match retry_with_backoff(policy, &call_label, |_| op(Arc::clone(backend))).await {
            Ok(value) => return Ok(value),
            Err(exhausted) => {
                attempts += exhausted.attempts;
                let transient = exhausted.last_error.is_transient();
                last_error = exhausted.last_error;
                if !transient {
                    break;
                }
                if let Some(next) = backends.get(i + 1) {
                    warn!(
                        "{}: {} exhausted retries, falling back to {}",
                        label,
                        backend.name(),
                        next.name()
                    );
                }
            }
        }
    }

    Err(RetryExhausted {
        attempts,
        last_error,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process backends for tests

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::models::HoldTime;

    /// A backend that replays scripted responses keyed by a substring of the
    /// input (file name for audio, user prompt for grading). Unscripted inputs
    /// fall back to the default response.
    pub struct ScriptedBackend {
        name: String,
        transcripts: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
        holds: Mutex<HashMap<String, HoldTime>>,
        grades: Mutex<Vec<(String, VecDeque<Result<String, ProviderError>>)>>,
        default_grade: Result<String, ProviderError>,
        pub transcribe_calls: AtomicU32,
        pub grade_calls: AtomicU32,
        /// User prompts of every grading call, in call order
        pub graded_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn new(name: &str, default_grade: Result<String, ProviderError>) -> Self {
            Self {
                name: name.to_string(),
                transcripts: Mutex::new(HashMap::new()),
                holds: Mutex::new(HashMap::new()),
                grades: Mutex::new(Vec::new()),
                default_grade,
                transcribe_calls: AtomicU32::new(0),
                grade_calls: AtomicU32::new(0),
                graded_prompts: Mutex::new(Vec::new()),
            }
        }

        /// Queue transcription responses for a file name
        pub fn with_transcripts(
            self,
            file_name: &str,
            responses: Vec<Result<String, ProviderError>>,
        ) -> Self {
            self.transcripts
                .lock()
                .unwrap()
                .insert(file_name.to_string(), responses.into());
            self
        }

        /// Report `hold` with every successful transcript of a file name
        pub fn with_hold(self, file_name: &str, hold: HoldTime) -> Self {
            self.holds.lock().unwrap().insert(file_name.to_string(), hold);
            self
        }

        /// Queue grading responses for prompts containing `needle`
        pub fn with_grades(self, needle: &str, responses: Vec<Result<String, ProviderError>>) -> Self {
            self.grades
                .lock()
                .unwrap()
                .push((needle.to_string(), responses.into()));
            self
        }

        pub fn transcribe_count(&self) -> u32 {
            self.transcribe_calls.load(Ordering::SeqCst)
        }

        pub fn grade_count(&self) -> u32 {
            self.grade_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, ProviderError> {
            self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
            let text = {
                let mut transcripts = self.transcripts.lock().unwrap();
                match transcripts.get_mut(&clip.file_name) {
                    Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                    Some(queue) => queue
                        .front()
                        .cloned()
                        .unwrap_or_else(|| Err(ProviderError::Permanent("no script".to_string()))),
                    None => Ok(format!("transcript of {}", clip.file_name)),
                }
            }?;
            Ok(Transcript {
                text,
                hold: self.holds.lock().unwrap().get(&clip.file_name).cloned(),
            })
        }

        async fn grade(&self, request: &GradingRequest) -> Result<String, ProviderError> {
            self.grade_calls.fetch_add(1, Ordering::SeqCst);
            self.graded_prompts.lock().unwrap().push(request.user.clone());
            let mut grades = self.grades.lock().unwrap();
            for (needle, queue) in grades.iter_mut() {
                if request.user.contains(needle.as_str()) {
                    return match queue.len() {
                        0 => self.default_grade.clone(),
                        1 => queue[0].clone(),
                        _ => queue.pop_front().unwrap(),
                    };
                }
            }
            self.default_grade.clone()
        }
    }

    /// Grade JSON citing `evidence`
    pub fn grade_json(score: u8, evidence: &str) -> String {
        serde_json::json!({
            "score": score,
            "criteria": {"politeness": 4, "clarity": 4, "accuracy": score, "empathy": 3},
            "rationale": format!("The agent said \"{}\"", evidence),
            "evidence": [evidence],
            "improvement": "Summarize next steps before closing."
        })
        .to_string()
    }
}
