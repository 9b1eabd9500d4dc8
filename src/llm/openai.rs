use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{ConfigurationError, ProviderError};
use crate::llm::backend::{AudioClip, GradingRequest, ModelBackend};
use crate::models::Transcript;

/// OpenAI client: Whisper-style transcription plus chat-completions grading
pub struct OpenAiBackend {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiBackend {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient {
                provider: "openai",
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    /// Whisper reports no hold segments, so hold time stays unknown
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, ProviderError> {
        let file = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(clip.mime_type)
            .map_err(|e| ProviderError::Permanent(format!("invalid audio part: {}", e)))?;

        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "text")
            .part("file", file);

        let response = self
            .client
            .post(self.url("/v1/audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("OpenAI", status, &body));
        }

        let text = response.text().await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "OpenAI returned an empty transcript for {}",
                clip.file_name
            )));
        }
        Ok(Transcript::text(text))
    }

    async fn grade(&self, request: &GradingRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
        };

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("OpenAI", status, &body));
        }

        let response: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::Transient(format!("failed to parse OpenAI response: {}", e))
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Transient("OpenAI returned no grading content".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f64,
    response_format: ResponseFormat,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
