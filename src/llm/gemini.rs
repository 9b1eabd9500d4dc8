use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::{ConfigurationError, ProviderError};
use crate::llm::backend::{AudioClip, GradingRequest, ModelBackend};
use crate::llm::prompts::TRANSCRIPTION_PROMPT;
use crate::llm::validation::strip_code_fence;
use crate::models::{HoldSegment, HoldTime, Transcript};

/// Google Gemini `generateContent` client.
///
/// Audio is sent inline (base64), so clips are bound by the API's inline
/// request size limit.
pub struct GeminiBackend {
    client: Client,
    config: ProviderConfig,
}

impl GeminiBackend {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient {
                provider: "gemini",
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("Gemini", status, &body));
        }

        let response: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::Transient(format!("failed to parse Gemini response: {}", e))
        })?;

        // Concatenate the text parts of the first candidate
        let text: String = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, ProviderError> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::inline(clip.mime_type, STANDARD.encode(&clip.bytes)),
                    Part::text(TRANSCRIPTION_PROMPT),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: Some("application/json".to_string()),
            },
        };

        let raw = self.generate(&request).await?;
        let transcript = parse_transcript(&raw, &clip.file_name);
        if transcript.text.trim().is_empty() {
            return Err(ProviderError::Permanent(format!(
                "Gemini returned an empty transcript for {}",
                clip.file_name
            )));
        }
        Ok(transcript)
    }

    async fn grade(&self, request: &GradingRequest) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: "system".to_string(),
                parts: vec![Part::text(&request.system)],
            }),
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::text(&request.user)],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: Some("application/json".to_string()),
            },
        };

        let text = self.generate(&request).await?;
        if text.trim().is_empty() {
            return Err(ProviderError::Transient(
                "Gemini returned no grading content".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Structured transcription answer
#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    text: String,
    #[serde(default)]
    total_duration_sec: Option<f64>,
    #[serde(default)]
    hold_total_sec: Option<f64>,
    #[serde(default)]
    hold_segments: Vec<HoldSegmentResponse>,
}

#[derive(Debug, Deserialize)]
struct HoldSegmentResponse {
    start: f64,
    end: f64,
    #[serde(default)]
    trigger: Option<String>,
}

/// Round a model-reported number of seconds; negative and NaN become 0
fn whole_secs(secs: f64) -> u32 {
    if secs.is_finite() && secs > 0.0 {
        secs.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Read the transcription answer.
///
/// Output that is not the requested JSON object is kept as a plain
/// transcript with no hold measurement. A missing hold total is the sum of
/// the segments; a zero call length means the model could not tell.
fn parse_transcript(raw: &str, file_name: &str) -> Transcript {
    let cleaned = strip_code_fence(raw);
    let response: TranscriptResponse = match serde_json::from_str(cleaned) {
        Ok(response) => response,
        Err(e) => {
            warn!("{}: transcript is not structured ({}), hold time unknown", file_name, e);
            return Transcript::text(cleaned.trim());
        }
    };

    let segments: Vec<HoldSegment> = response
        .hold_segments
        .into_iter()
        .map(|s| HoldSegment {
            start_secs: whole_secs(s.start),
            end_secs: whole_secs(s.end).max(whole_secs(s.start)),
            trigger: s.trigger.filter(|t| !t.trim().is_empty()),
        })
        .collect();
    let total_secs = match response.hold_total_sec {
        Some(total) => whole_secs(total),
        None => segments.iter().map(HoldSegment::duration_secs).sum(),
    };
    let call_secs = response
        .total_duration_sec
        .map(whole_secs)
        .filter(|&secs| secs > 0);

    Transcript {
        text: response.text.trim().to_string(),
        hold: Some(HoldTime {
            total_secs,
            call_secs,
            segments,
        }),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::inline("audio/mpeg", "AAAA".to_string()), Part::text("go")],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: Some("application/json".to_string()),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "audio/mpeg");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "go");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"score\": "}, {"text": "4}"}]},
                "finishReason": "STOP"
            }]
        }"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        let parts = &response.candidates[0].content.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].text.as_deref(), Some("4}"));
    }

    #[test]
    fn test_structured_transcript_with_hold() {
        let raw = r#"```json
{
  "text": "Agent: Let me check. Please hold.\nCustomer: Sure.",
  "total_duration_sec": 300.5,
  "hold_total_sec": 60,
  "hold_segments": [
    {"start": 10.5, "end": 70.4, "duration": 60, "trigger": "少々お待ちください"}
  ]
}
```"#;
        let transcript = parse_transcript(raw, "M1_20260210_Sato.mp3");
        assert!(transcript.text.starts_with("Agent: Let me check."));

        let hold = transcript.hold.unwrap();
        assert_eq!(hold.total_secs, 60);
        assert_eq!(hold.call_secs, Some(301));
        assert_eq!(hold.segments.len(), 1);
        assert_eq!(hold.segments[0].start_secs, 11);
        assert_eq!(hold.segments[0].end_secs, 70);
        assert_eq!(hold.segments[0].trigger.as_deref(), Some("少々お待ちください"));
    }

    #[test]
    fn test_hold_total_defaults_to_segment_sum() {
        let raw = r#"{"text": "Agent: hello", "total_duration_sec": 0,
            "hold_segments": [{"start": 5, "end": 35}, {"start": 100, "end": 130, "trigger": ""}]}"#;
        let hold = parse_transcript(raw, "call.mp3").hold.unwrap();
        assert_eq!(hold.total_secs, 60);
        assert_eq!(hold.call_secs, None);
        assert!(hold.segments[1].trigger.is_none());
    }

    #[test]
    fn test_plain_text_transcript_has_unknown_hold() {
        let transcript = parse_transcript("Agent: Good morning.\nCustomer: Hi.", "call.mp3");
        assert_eq!(transcript.text, "Agent: Good morning.\nCustomer: Hi.");
        assert!(transcript.hold.is_none());
    }

    #[test]
    fn test_endpoint() {
        let backend = GeminiBackend::new(ProviderConfig::gemini(
            "key".to_string(),
            "gemini-2.5-flash".to_string(),
        ))
        .unwrap();
        assert_eq!(
            backend.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
