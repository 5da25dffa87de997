//! Gemini `generateContent` client
//!
//! Request: `{contents:[{role:"user", parts:[{text}, {inlineData:{mimeType, data}}]}]}`
//! Response: `{candidates:[{content:{parts:[{text}]}}], promptFeedback?:{blockReason}}`
//!
//! The API key travels as the `key` query parameter and is never logged.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use kitaba_common::config::InferenceConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ImageUpload, InferenceError, Transcription, TranscriptionBackend, TRANSCRIPTION_PROMPT};

const USER_AGENT: &str = concat!("kitaba/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 (standard alphabet) image bytes
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentRequest {
    /// Prompt part followed by the inline image part
    pub fn for_image(image: &ImageUpload) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: Some(TRANSCRIPTION_PROMPT.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: image.media_type.clone(),
                            data: STANDARD.encode(&image.data),
                        }),
                    },
                ],
            }],
        }
    }
}

impl GenerateContentResponse {
    /// First candidate's first text part, else the block reason, else empty
    pub fn into_transcription(self) -> Transcription {
        let first_text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text);

        if let Some(text) = first_text {
            return Transcription::Text(text);
        }

        match self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            Some(reason) => Transcription::Blocked(reason),
            None => Transcription::Empty,
        }
    }
}

/// Gemini API client
pub struct GeminiClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build a client from configuration; a missing key is a hard precondition failure
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let api_key = config.api_key().ok_or(InferenceError::MissingApiKey)?;

        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http_client = builder
            .build()
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }

    /// `{endpoint}/models/{model}:generateContent` (key added as query parameter)
    pub fn request_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranscriptionBackend for GeminiClient {
    fn backend_id(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, image: &ImageUpload) -> Result<Transcription, InferenceError> {
        let payload = GenerateContentRequest::for_image(image);

        tracing::debug!(
            model = %self.model,
            media_type = %image.media_type,
            image_bytes = image.data.len(),
            "Submitting transcription request"
        );

        let response = self
            .http_client
            .post(self.request_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Transcription request rejected");
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Parse(e.without_url().to_string()))?;

        let transcription = parsed.into_transcription();
        match &transcription {
            Transcription::Text(text) => {
                tracing::info!(chars = text.chars().count(), "Transcription received")
            }
            Transcription::Blocked(reason) => {
                tracing::warn!(reason = %reason, "Transcription blocked by endpoint")
            }
            Transcription::Empty => tracing::warn!("Transcription response had no candidates"),
        }

        Ok(transcription)
    }
}
