//! Detection workflow
//!
//! Idle → Ready (image selected) → Pending (request outstanding) →
//! Succeeded | Failed. `busy` is tracked separately from the phase so a new
//! selection during a request keeps detect gated until the request settles.
//!
//! Each selection bumps a generation counter. A response for an older
//! generation is not displayed, but the transcription is still persisted.

use chrono::Utc;
use kitaba_common::events::{DetectionPhase, EventBus, KitabaEvent};
use kitaba_common::models::NewDetection;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::history::HistorySync;
use crate::inference::{ImageUpload, TranscriptionBackend};
use crate::{Error, Result};

/// Shown when detect is invoked without a configured API key
pub const MISSING_KEY_MESSAGE: &str =
    "Gemini API key is not configured. Please set it in your configuration.";

/// Media types the file input accepts
pub const ACCEPTED_MEDIA_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// Declared types that carry no information about the content
const GENERIC_MEDIA_TYPES: [&str; 2] = ["application/octet-stream", "binary/octet-stream"];

/// Selected image as shown in the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionState {
    pub phase: DetectionPhase,
    pub image: Option<ImageSummary>,
    /// Displayed transcription
    pub result: Option<String>,
    pub error: Option<String>,
    /// A request is outstanding
    pub busy: bool,
}

impl Default for DetectionState {
    fn default() -> Self {
        Self {
            phase: DetectionPhase::Idle,
            image: None,
            result: None,
            error: None,
            busy: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NoImage,
    Busy,
}

/// Result of one `detect` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectOutcome {
    Completed { text: String },
    Failed { error: String },
    Ignored { reason: IgnoreReason },
    /// A newer image was selected while the request was pending
    Superseded,
}

/// Media type of an upload, from the declared type or sniffed from the bytes
pub fn resolve_media_type(declared: Option<&str>, data: &[u8]) -> Result<String> {
    let declared = declared
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty() && !GENERIC_MEDIA_TYPES.contains(&d.as_str()));

    let media_type = match declared {
        Some(media_type) => media_type,
        None => infer::get(data)
            .map(|kind| kind.mime_type().to_string())
            .ok_or_else(|| Error::BadRequest("Unrecognized image format".to_string()))?,
    };

    if ACCEPTED_MEDIA_TYPES.contains(&media_type.as_str()) {
        Ok(media_type)
    } else {
        Err(Error::BadRequest(format!(
            "Unsupported image type: {}",
            media_type
        )))
    }
}

struct Selection {
    upload: Option<Arc<ImageUpload>>,
    generation: u64,
}

pub struct DetectionController {
    backend: Option<Arc<dyn TranscriptionBackend>>,
    history: Arc<HistorySync>,
    selection: Arc<Mutex<Selection>>,
    state: Arc<watch::Sender<DetectionState>>,
    events: EventBus,
}

impl DetectionController {
    /// `backend` is `None` when no API key is configured
    pub fn new(
        backend: Option<Arc<dyn TranscriptionBackend>>,
        history: Arc<HistorySync>,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(DetectionState::default());
        Self {
            backend,
            history,
            selection: Arc::new(Mutex::new(Selection {
                upload: None,
                generation: 0,
            })),
            state: Arc::new(state),
            events,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> DetectionState {
        self.state.borrow().clone()
    }

    /// Replace the selected image; clears the displayed result and error
    pub async fn select_image(
        &self,
        file_name: impl Into<String>,
        declared_type: Option<&str>,
        data: Vec<u8>,
    ) -> Result<ImageSummary> {
        if data.is_empty() {
            return Err(Error::BadRequest("Uploaded file is empty".to_string()));
        }
        let media_type = resolve_media_type(declared_type, &data)?;
        let upload = ImageUpload {
            file_name: file_name.into(),
            media_type,
            data,
        };
        let summary = ImageSummary {
            file_name: upload.file_name.clone(),
            media_type: upload.media_type.clone(),
            size_bytes: upload.data.len(),
        };

        let mut selection = self.selection.lock().await;
        selection.generation += 1;
        selection.upload = Some(Arc::new(upload));

        info!(
            file = %summary.file_name,
            media_type = %summary.media_type,
            bytes = summary.size_bytes,
            "Image selected"
        );

        let image = summary.clone();
        publish(&self.state, &self.events, move |state| {
            state.phase = if state.busy {
                DetectionPhase::Pending
            } else {
                DetectionPhase::Ready
            };
            state.image = Some(image);
            state.result = None;
            state.error = None;
        });

        Ok(summary)
    }

    /// Run one detection for the selected image
    ///
    /// The request runs on its own task; the caller only awaits its outcome.
    pub async fn detect(&self) -> Result<DetectOutcome> {
        let (upload, backend, generation) = {
            let selection = self.selection.lock().await;
            let Some(upload) = selection.upload.clone() else {
                debug!("Detect ignored: no image selected");
                return Ok(DetectOutcome::Ignored {
                    reason: IgnoreReason::NoImage,
                });
            };
            if self.state.borrow().busy {
                debug!("Detect ignored: request already in flight");
                return Ok(DetectOutcome::Ignored {
                    reason: IgnoreReason::Busy,
                });
            }

            let Some(backend) = self.backend.clone() else {
                warn!("Detect refused: API key missing");
                publish(&self.state, &self.events, |state| {
                    state.phase = DetectionPhase::Failed;
                    state.error = Some(MISSING_KEY_MESSAGE.to_string());
                });
                return Ok(DetectOutcome::Failed {
                    error: MISSING_KEY_MESSAGE.to_string(),
                });
            };

            publish(&self.state, &self.events, |state| {
                state.phase = DetectionPhase::Pending;
                state.busy = true;
                state.result = None;
                state.error = None;
            });

            (upload, backend, selection.generation)
        };

        let task = tokio::spawn(run_detection(
            backend,
            upload,
            generation,
            self.selection.clone(),
            self.state.clone(),
            self.events.clone(),
            self.history.clone(),
        ));

        task.await
            .map_err(|e| Error::Internal(format!("Detection task failed: {}", e)))
    }
}

async fn run_detection(
    backend: Arc<dyn TranscriptionBackend>,
    upload: Arc<ImageUpload>,
    generation: u64,
    selection: Arc<Mutex<Selection>>,
    state: Arc<watch::Sender<DetectionState>>,
    events: EventBus,
    history: Arc<HistorySync>,
) -> DetectOutcome {
    info!(
        backend = backend.backend_id(),
        file = %upload.file_name,
        "Detection started"
    );
    let result = backend.transcribe(&upload).await;

    // Held until the result is published so a newer selection cannot interleave
    let selection = selection.lock().await;
    let current = selection.generation == generation;

    let outcome = match result {
        Ok(transcription) => {
            let text = transcription.display_text();
            persist(
                history,
                NewDetection {
                    text: text.clone(),
                    image_name: upload.file_name.clone(),
                },
            );
            DetectOutcome::Completed { text }
        }
        Err(e) => {
            error!("Detection failed: {}", e);
            DetectOutcome::Failed {
                error: format!("An error occurred during detection: {}. Please try again.", e),
            }
        }
    };

    if !current {
        info!("Detection result superseded by a newer selection");
        publish(&state, &events, |state| {
            state.busy = false;
            state.phase = DetectionPhase::Ready;
        });
        return DetectOutcome::Superseded;
    }

    let displayed = outcome.clone();
    publish(&state, &events, move |state| {
        state.busy = false;
        match displayed {
            DetectOutcome::Completed { text } => {
                state.phase = DetectionPhase::Succeeded;
                state.result = Some(text);
            }
            DetectOutcome::Failed { error } => {
                state.phase = DetectionPhase::Failed;
                state.result = None;
                state.error = Some(error);
            }
            DetectOutcome::Ignored { .. } | DetectOutcome::Superseded => {}
        }
    });
    drop(selection);

    outcome
}

/// Fire-and-forget history write; failures are only logged
fn persist(history: Arc<HistorySync>, detection: NewDetection) {
    if history.active_subject().is_err() {
        debug!("No active subject; detection not saved to history");
        return;
    }
    tokio::spawn(async move {
        match history.create(detection).await {
            Ok(id) => debug!(record = %id, "Detection saved to history"),
            Err(e) => error!("Failed to save detection to history: {}", e),
        }
    });
}

fn publish(
    state: &watch::Sender<DetectionState>,
    events: &EventBus,
    modify: impl FnOnce(&mut DetectionState),
) {
    state.send_modify(modify);
    let phase = state.borrow().phase;
    events.emit_lossy(KitabaEvent::DetectionStateChanged {
        phase,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, Transcription};
    use crate::session::SessionState;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    struct ScriptedBackend {
        result: std::result::Result<Transcription, u16>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl TranscriptionBackend for ScriptedBackend {
        fn backend_id(&self) -> &str {
            "scripted"
        }

        async fn transcribe(
            &self,
            _image: &ImageUpload,
        ) -> std::result::Result<Transcription, InferenceError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.result.clone().map_err(|status| InferenceError::Api {
                status,
                body: "Resource exhausted".into(),
            })
        }
    }

    fn controller(backend: Option<ScriptedBackend>) -> Arc<DetectionController> {
        let (_tx, session_rx) = watch::channel(SessionState::default());
        let events = EventBus::new(64);
        let history = Arc::new(HistorySync::new(None, session_rx, events.clone()));
        Arc::new(DetectionController::new(
            backend.map(|b| Arc::new(b) as Arc<dyn TranscriptionBackend>),
            history,
            events,
        ))
    }

    #[test]
    fn test_media_type_resolution() {
        assert_eq!(
            resolve_media_type(Some("image/jpeg"), b"").unwrap(),
            "image/jpeg"
        );
        assert_eq!(
            resolve_media_type(Some("application/octet-stream"), &PNG_MAGIC).unwrap(),
            "image/png"
        );
        assert_eq!(resolve_media_type(None, &PNG_MAGIC).unwrap(), "image/png");
        assert!(matches!(
            resolve_media_type(Some("image/gif"), b"GIF89a"),
            Err(Error::BadRequest(_))
        ));
        assert!(resolve_media_type(None, b"plain text").is_err());
    }

    #[tokio::test]
    async fn test_detect_without_image_is_ignored() {
        let controller = controller(Some(ScriptedBackend {
            result: Ok(Transcription::Text("x".into())),
            gate: None,
        }));
        let before = controller.current();

        let outcome = controller.detect().await.unwrap();
        assert_eq!(
            outcome,
            DetectOutcome::Ignored {
                reason: IgnoreReason::NoImage
            }
        );
        assert_eq!(controller.current(), before);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let controller = controller(None);
        controller
            .select_image("coin1.jpg", Some("image/jpeg"), vec![1, 2, 3])
            .await
            .unwrap();

        let outcome = controller.detect().await.unwrap();
        assert_eq!(
            outcome,
            DetectOutcome::Failed {
                error: MISSING_KEY_MESSAGE.into()
            }
        );
        let state = controller.current();
        assert_eq!(state.phase, DetectionPhase::Failed);
        assert!(!state.busy);
    }

    #[tokio::test]
    async fn test_success_then_reselect_clears_result() {
        let controller = controller(Some(ScriptedBackend {
            result: Ok(Transcription::Text("Text: \"...\"".into())),
            gate: None,
        }));
        controller
            .select_image("coin1.jpg", Some("image/jpeg"), vec![1, 2, 3])
            .await
            .unwrap();

        controller.detect().await.unwrap();
        let state = controller.current();
        assert_eq!(state.phase, DetectionPhase::Succeeded);
        assert_eq!(state.result.as_deref(), Some("Text: \"...\""));
        assert!(!state.busy);

        controller
            .select_image("coin2.png", None, PNG_MAGIC.to_vec())
            .await
            .unwrap();
        let state = controller.current();
        assert_eq!(state.phase, DetectionPhase::Ready);
        assert!(state.result.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_api_error_is_displayed() {
        let controller = controller(Some(ScriptedBackend {
            result: Err(429),
            gate: None,
        }));
        controller
            .select_image("coin1.jpg", Some("image/jpeg"), vec![1])
            .await
            .unwrap();

        controller.detect().await.unwrap();
        let state = controller.current();
        assert_eq!(state.phase, DetectionPhase::Failed);
        assert!(state.result.is_none());
        assert_eq!(
            state.error.as_deref(),
            Some("An error occurred during detection: API request failed with status 429: Resource exhausted. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_busy_gating_and_superseded_result() {
        let gate = Arc::new(Notify::new());
        let controller = controller(Some(ScriptedBackend {
            result: Ok(Transcription::Text("first".into())),
            gate: Some(gate.clone()),
        }));
        controller
            .select_image("a.jpg", Some("image/jpeg"), vec![1])
            .await
            .unwrap();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.detect().await.unwrap() }
        });

        let mut state_rx = controller.subscribe();
        state_rx.wait_for(|state| state.busy).await.unwrap();

        assert_eq!(
            controller.detect().await.unwrap(),
            DetectOutcome::Ignored {
                reason: IgnoreReason::Busy
            }
        );

        controller
            .select_image("b.jpg", Some("image/jpeg"), vec![2])
            .await
            .unwrap();
        assert_eq!(controller.current().phase, DetectionPhase::Pending);

        gate.notify_one();
        assert_eq!(pending.await.unwrap(), DetectOutcome::Superseded);

        let state = controller.current();
        assert!(!state.busy);
        assert_eq!(state.phase, DetectionPhase::Ready);
        assert!(state.result.is_none());
        assert_eq!(state.image.unwrap().file_name, "b.jpg");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reselect_racing_completion_never_shows_stale_result() {
        for round in 0..50 {
            let gate = Arc::new(Notify::new());
            let controller = controller(Some(ScriptedBackend {
                result: Ok(Transcription::Text("old".into())),
                gate: Some(gate.clone()),
            }));
            controller
                .select_image("a.jpg", Some("image/jpeg"), vec![1])
                .await
                .unwrap();

            let pending = tokio::spawn({
                let controller = controller.clone();
                async move { controller.detect().await.unwrap() }
            });
            controller
                .subscribe()
                .wait_for(|state| state.busy)
                .await
                .unwrap();

            gate.notify_one();
            controller
                .select_image("b.jpg", Some("image/jpeg"), vec![2])
                .await
                .unwrap();
            pending.await.unwrap();

            let state = controller.current();
            assert_eq!(state.image.unwrap().file_name, "b.jpg", "round {}", round);
            assert!(state.result.is_none(), "round {}", round);
            assert!(!state.busy, "round {}", round);
        }
    }
}
