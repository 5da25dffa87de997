//! Event types and EventBus
//!
//! Every component publishes a `KitabaEvent` after it changes its own state.
//! Subscribers (the SSE endpoint in kitaba-ui) re-render from the current
//! state rather than from event payloads, so a lagged receiver loses nothing
//! but intermediate frames.

use crate::models::{RecordId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Detection workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPhase {
    /// Nothing selected yet
    Idle,
    /// Image selected, detect not yet invoked
    Ready,
    /// Inference request outstanding
    Pending,
    /// Last request produced a displayed result
    Succeeded,
    /// Last request failed; error displayed
    Failed,
}

/// Kitaba event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KitabaEvent {
    /// Session identity, readiness or privilege changed
    SessionChanged {
        subject_id: Option<SubjectId>,
        ready: bool,
        privileged: bool,
        timestamp: DateTime<Utc>,
    },

    /// Materialized history list was rebuilt (or cleared on teardown)
    HistoryUpdated {
        subject_id: Option<SubjectId>,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Detection workflow moved to a new phase or changed its displayed result
    DetectionStateChanged {
        phase: DetectionPhase,
        timestamp: DateTime<Utc>,
    },

    /// Correction editor, saving or saved flags changed
    CorrectionStateChanged {
        record_id: Option<RecordId>,
        timestamp: DateTime<Utc>,
    },
}

impl KitabaEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            KitabaEvent::SessionChanged { .. } => "SessionChanged",
            KitabaEvent::HistoryUpdated { .. } => "HistoryUpdated",
            KitabaEvent::DetectionStateChanged { .. } => "DetectionStateChanged",
            KitabaEvent::CorrectionStateChanged { .. } => "CorrectionStateChanged",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow subscribers
/// see `Lagged`, and receivers clean up when dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KitabaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<KitabaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: KitabaEvent,
    ) -> Result<usize, broadcast::error::SendError<KitabaEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KitabaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
