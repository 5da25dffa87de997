//! Derived view model
//!
//! `render` is a pure function of the component states. The page never
//! computes anything itself; it draws whatever `AppView` says.

use kitaba_common::events::DetectionPhase;
use kitaba_common::{RecordId, SubjectId};
use serde::Serialize;

use crate::correction::CorrectionState;
use crate::detection::{DetectionState, ImageSummary};
use crate::history::HistoryState;
use crate::session::SessionState;

pub const DETECT_LABEL: &str = "Detect Arabic Text";
pub const DETECTING_LABEL: &str = "Detecting...";
pub const ANALYZING_TEXT: &str = "Analyzing image...";
pub const RESULT_PLACEHOLDER: &str = "Detected text will appear here.";
pub const HISTORY_CONNECTING: &str = "Connecting to history...";
pub const HISTORY_EMPTY: &str = "No history yet. Detections will be saved here.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppView {
    pub session: SessionView,
    pub detection: DetectionView,
    pub history: HistoryView,
    /// Persistent banner messages (auth, store, correction)
    pub banners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub ready: bool,
    pub subject_id: Option<SubjectId>,
    pub is_anonymous: bool,
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionView {
    pub phase: DetectionPhase,
    pub image: Option<ImageSummary>,
    pub detect_enabled: bool,
    pub detect_label: &'static str,
    pub result: ResultPane,
}

/// What the transcription pane shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ResultPane {
    Loading(String),
    Error(String),
    Text(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryView {
    pub items: Vec<HistoryItemView>,
    /// Shown instead of the list when there are no items
    pub placeholder: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryItemView {
    pub id: RecordId,
    /// `{image_name or "Untitled"} - {date}`
    pub label: String,
    /// Full timestamp for the hover title
    pub timestamp: String,
    pub text: String,
    pub is_corrected: bool,
    /// Server timestamp not yet committed
    pub pending: bool,
    pub can_edit: bool,
    pub editing: bool,
    pub draft: Option<String>,
    pub saving: bool,
    pub saved: bool,
}

pub fn render(
    session: &SessionState,
    detection: &DetectionState,
    history: &HistoryState,
    correction: &CorrectionState,
) -> AppView {
    let mut banners = Vec::new();
    banners.extend(session.error.clone());
    banners.extend(history.error.clone());
    banners.extend(correction.error.clone());

    AppView {
        session: SessionView {
            ready: session.ready,
            subject_id: session.subject_id.clone(),
            is_anonymous: session.is_anonymous,
            privileged: session.privileged,
        },
        detection: render_detection(detection),
        history: render_history(session, history, correction),
        banners,
    }
}

fn render_detection(detection: &DetectionState) -> DetectionView {
    let result = if detection.busy && detection.phase == DetectionPhase::Pending {
        ResultPane::Loading(ANALYZING_TEXT.to_string())
    } else if let Some(error) = &detection.error {
        ResultPane::Error(error.clone())
    } else if let Some(text) = detection.result.as_ref().filter(|t| !t.is_empty()) {
        ResultPane::Text(text.clone())
    } else {
        ResultPane::Placeholder(RESULT_PLACEHOLDER.to_string())
    };

    DetectionView {
        phase: detection.phase,
        image: detection.image.clone(),
        detect_enabled: detection.image.is_some() && !detection.busy,
        detect_label: if detection.busy {
            DETECTING_LABEL
        } else {
            DETECT_LABEL
        },
        result,
    }
}

fn render_history(
    session: &SessionState,
    history: &HistoryState,
    correction: &CorrectionState,
) -> HistoryView {
    // A list left over from a previous subject is never shown
    let current = session.ready && history.subject_id == session.subject_id;

    let items: Vec<HistoryItemView> = if current {
        history
            .entries
            .iter()
            .map(|entry| {
                let id = entry.record.id.clone();
                let at = entry.time.effective();
                let name = if entry.record.image_name.is_empty() {
                    "Untitled"
                } else {
                    entry.record.image_name.as_str()
                };
                let editing = session.privileged && correction.editing.as_ref() == Some(&id);

                HistoryItemView {
                    label: format!("{} - {}", name, at.format("%Y-%m-%d")),
                    timestamp: at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    text: entry.display_text().to_string(),
                    is_corrected: entry.record.is_corrected,
                    pending: !entry.time.is_committed(),
                    can_edit: session.privileged,
                    editing,
                    draft: editing.then(|| correction.draft.clone()),
                    saving: correction.saving.contains(&id),
                    saved: correction.saved.contains(&id),
                    id,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let placeholder = match (session.ready, items.is_empty()) {
        (false, _) => Some(HISTORY_CONNECTING),
        (true, true) => Some(HISTORY_EMPTY),
        (true, false) => None,
    };

    HistoryView { items, placeholder }
}
