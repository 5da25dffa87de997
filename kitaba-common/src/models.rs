//! Detection record model
//!
//! A detection record is one transcription event, scoped under the subject
//! that owns it. `corrected_text` takes display precedence over `text` once
//! a privileged subject has saved a correction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session identity identifier (anonymous or authenticated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a new anonymous subject
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Store-assigned opaque record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Creation time of a record as seen by a client
///
/// A freshly written record is visible before the store commits its server
/// timestamp; until then it sorts by the client's clock. Ordering may shift
/// slightly once the committed value arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "at", rename_all = "snake_case")]
pub enum RecordTime {
    /// Client clock at materialization time, server value still pending
    Provisional(DateTime<Utc>),
    /// Server-assigned creation time
    Committed(DateTime<Utc>),
}

impl RecordTime {
    /// Normalize an optional server timestamp, falling back to `now`
    pub fn resolve(server: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match server {
            Some(at) => RecordTime::Committed(at),
            None => RecordTime::Provisional(now),
        }
    }

    /// The concrete point in time used for ordering and display
    pub fn effective(&self) -> DateTime<Utc> {
        match self {
            RecordTime::Provisional(at) | RecordTime::Committed(at) => *at,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, RecordTime::Committed(_))
    }
}

/// One persisted transcription event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: RecordId,
    pub owner: SubjectId,
    /// Raw transcription from the inference endpoint
    pub text: String,
    pub corrected_text: Option<String>,
    pub image_name: String,
    /// None until the store commits the server timestamp
    pub created_at: Option<DateTime<Utc>>,
    pub corrected_at: Option<DateTime<Utc>>,
    pub is_corrected: bool,
}

impl DetectionRecord {
    /// Text shown to the user: the correction when present, else the raw transcription
    pub fn display_text(&self) -> &str {
        self.corrected_text.as_deref().unwrap_or(&self.text)
    }
}

/// Fields supplied when persisting a new detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub text: String,
    pub image_name: String,
}

/// The only update a record accepts: a human correction of its text
///
/// The store sets `is_corrected = true` and stamps `corrected_at` with its own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub corrected_text: String,
}
