use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::TranscriptionFailure;
use crate::llm::{with_fallback, AudioClip, ModelBackend, RetryPolicy};
use crate::models::Transcript;

/// Speech-to-text adapter over one or more providers
pub struct Transcriber {
    backends: Vec<Arc<dyn ModelBackend>>,
    retry: RetryPolicy,
}

impl Transcriber {
    /// `backends` are tried in order; the first is the primary provider
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>, retry: RetryPolicy) -> Self {
        Self { backends, retry }
    }

    /// Transcribe one audio file.
    ///
    /// Unsupported or unreadable audio fails immediately. Transient provider
    /// errors are retried with backoff, then the next provider is tried.
    /// Safe to call again for the same file: nothing is written anywhere.
    pub async fn transcribe(&self, audio_ref: &Path) -> Result<Transcript, TranscriptionFailure> {
        let clip = AudioClip::load(audio_ref)
            .await
            .map_err(|e| TranscriptionFailure {
                audio_ref: audio_ref.to_path_buf(),
                attempts: 0,
                last_error: e,
            })?;

        debug!(
            "Transcribing {} ({} bytes, {})",
            clip.file_name,
            clip.bytes.len(),
            clip.mime_type
        );

        let label = format!("transcribe {}", clip.file_name);
        let clip = &clip;
        let result = with_fallback(&self.backends, &self.retry, &label, |backend| async move {
            backend.transcribe(clip).await
        })
        .await;

        match result {
            Ok(transcript) => {
                match &transcript.hold {
                    Some(hold) => info!(
                        "Transcribed {}: {} chars, {}s on hold",
                        clip.file_name,
                        transcript.text.chars().count(),
                        hold.total_secs
                    ),
                    None => info!(
                        "Transcribed {}: {} chars",
                        clip.file_name,
                        transcript.text.chars().count()
                    ),
                }
                Ok(transcript)
            }
            Err(exhausted) => {
                warn!(
                    "Transcription of {} failed after {} attempt(s): {}",
                    clip.file_name, exhausted.attempts, exhausted.last_error
                );
                Err(TranscriptionFailure {
                    audio_ref: audio_ref.to_path_buf(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                })
            }
        }
    }
}
