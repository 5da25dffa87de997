//! Remote inference
//!
//! One synchronous request per user-initiated detection: the fixed
//! transcription prompt plus the encoded image go out, a single response comes
//! back. No streaming, no retry, no cancellation.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;

pub use gemini::GeminiClient;

/// Fixed instruction sent with every image
pub const TRANSCRIPTION_PROMPT: &str = "You are a world-class expert in historical Arabic epigraphy and paleography. \
Your task is to meticulously analyze the provided image of a historical object (stucco, coin, manuscript, tile, etc.) \
and transcribe ONLY the Arabic script visible.
- Provide a clear transcription of the Arabic text.
- If parts of the text are illegible, use [...] to indicate the missing or unreadable section.
- Do not describe the object itself or provide historical context unless it is part of the script.
- If no Arabic text is discernible in the image, respond with \"No clear Arabic text detected.\".";

/// Uploaded image content as received from the file input
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// Original filename, display-only
    pub file_name: String,
    /// Declared media type (e.g. `image/jpeg`)
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Interpreted model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcription {
    /// First text part of the first candidate
    Text(String),
    /// No candidate; the prompt was blocked for the given reason
    Blocked(String),
    /// Neither a candidate nor a block reason
    Empty,
}

impl Transcription {
    /// Text shown in the result pane and persisted to history
    pub fn display_text(&self) -> String {
        match self {
            Transcription::Text(text) => text.clone(),
            Transcription::Blocked(reason) => format!("Detection blocked. Reason: {}", reason),
            Transcription::Empty => {
                "Could not extract text. The model's response was empty.".to_string()
            }
        }
    }
}

/// Inference client errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Gemini API key is not configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Transcription endpoint seam
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Endpoint identifier for logging (e.g. the model name)
    fn backend_id(&self) -> &str;

    async fn transcribe(&self, image: &ImageUpload) -> Result<Transcription, InferenceError>;
}
