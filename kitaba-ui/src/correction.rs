//! Correction workflow (privileged subjects only)
//!
//! At most one record is open for editing. A save disables further saves for
//! that record until it completes, then closes the editor and shows a
//! transient "Saved" flag. Deletes go straight to the store; the row only
//! disappears when the history subscription next rebuilds the list.

use chrono::Utc;
use kitaba_common::events::{EventBus, KitabaEvent};
use kitaba_common::RecordId;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use crate::history::HistorySync;
use crate::session::SessionState;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrectionState {
    /// Record whose editor is open
    pub editing: Option<RecordId>,
    pub draft: String,
    /// Records with a save outstanding
    pub saving: BTreeSet<RecordId>,
    /// Records showing the transient "Saved" flag
    pub saved: BTreeSet<RecordId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    /// A save for this record is already outstanding
    Ignored,
}

pub struct CorrectionController {
    session_rx: watch::Receiver<SessionState>,
    history: Arc<HistorySync>,
    state: Arc<watch::Sender<CorrectionState>>,
    /// Latest flash per record; an older clear timer must not remove a newer flag
    flashes: Arc<Mutex<HashMap<RecordId, u64>>>,
    saved_flash: Duration,
    events: EventBus,
}

impl CorrectionController {
    pub fn new(
        session_rx: watch::Receiver<SessionState>,
        history: Arc<HistorySync>,
        saved_flash: Duration,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(CorrectionState::default());
        Self {
            session_rx,
            history,
            state: Arc::new(state),
            flashes: Arc::new(Mutex::new(HashMap::new())),
            saved_flash,
            events,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CorrectionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> CorrectionState {
        self.state.borrow().clone()
    }

    fn require_privileged(&self) -> Result<()> {
        if self.session_rx.borrow().privileged {
            Ok(())
        } else {
            Err(Error::Forbidden(
                "Corrections require a privileged subject".to_string(),
            ))
        }
    }

    /// Open the editor for `id`, or close it when it is already open
    pub fn toggle_edit(&self, id: &RecordId) -> Result<CorrectionState> {
        self.require_privileged()?;

        if self.state.borrow().editing.as_ref() == Some(id) {
            publish(&self.state, &self.events, Some(id), |state| {
                state.editing = None;
                state.draft.clear();
            });
            return Ok(self.current());
        }

        let entry = self
            .history
            .entry(id)
            .ok_or_else(|| Error::NotFound(format!("Record {}", id)))?;
        let draft = entry.display_text().to_string();

        publish(&self.state, &self.events, Some(id), |state| {
            state.editing = Some(id.clone());
            state.draft = draft;
            state.error = None;
        });
        Ok(self.current())
    }

    /// Replace the draft of the open editor
    pub fn set_draft(&self, id: &RecordId, text: String) -> Result<CorrectionState> {
        self.require_privileged()?;
        if self.state.borrow().editing.as_ref() != Some(id) {
            return Err(Error::BadRequest(format!("Record {} is not being edited", id)));
        }

        publish(&self.state, &self.events, Some(id), |state| {
            state.draft = text;
        });
        Ok(self.current())
    }

    /// Persist the open draft as the record's correction
    pub async fn save(&self, id: &RecordId) -> Result<SaveOutcome> {
        self.require_privileged()?;

        // Checked and marked in one step so two racing saves cannot both start
        let mut begin: Result<Option<String>> = Ok(None);
        self.state.send_if_modified(|state| {
            if state.saving.contains(id) {
                return false;
            }
            if state.editing.as_ref() != Some(id) {
                begin = Err(Error::BadRequest(format!("Record {} is not being edited", id)));
                return false;
            }
            state.saving.insert(id.clone());
            begin = Ok(Some(state.draft.clone()));
            true
        });
        let Some(draft) = begin? else {
            debug!(record = %id, "Save ignored: already saving");
            return Ok(SaveOutcome::Ignored);
        };
        notify(&self.events, Some(id));

        let task = tokio::spawn(run_save(
            self.history.clone(),
            self.state.clone(),
            self.flashes.clone(),
            self.saved_flash,
            self.events.clone(),
            id.clone(),
            draft,
        ));

        task.await
            .map_err(|e| Error::Internal(format!("Save task failed: {}", e)))?
    }

    /// Delete a record; no confirmation and no local removal
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        self.require_privileged()?;

        let history = self.history.clone();
        let target = id.clone();
        let result = tokio::spawn(async move { history.delete(&target).await })
            .await
            .map_err(|e| Error::Internal(format!("Delete task failed: {}", e)))?;

        match result {
            Ok(()) => {
                info!(record = %id, "Delete requested");
                let stale = {
                    let state = self.state.borrow();
                    state.editing.as_ref() == Some(id) || state.error.is_some()
                };
                if stale {
                    publish(&self.state, &self.events, Some(id), |state| {
                        if state.editing.as_ref() == Some(id) {
                            state.editing = None;
                            state.draft.clear();
                        }
                        state.error = None;
                    });
                }
                Ok(())
            }
            Err(e) => {
                error!(record = %id, "Delete failed: {}", e);
                let message = format!("Could not delete record: {}", e);
                publish(&self.state, &self.events, Some(id), |state| {
                    state.error = Some(message);
                });
                Err(e)
            }
        }
    }
}

async fn run_save(
    history: Arc<HistorySync>,
    state: Arc<watch::Sender<CorrectionState>>,
    flashes: Arc<Mutex<HashMap<RecordId, u64>>>,
    saved_flash: Duration,
    events: EventBus,
    id: RecordId,
    draft: String,
) -> Result<SaveOutcome> {
    let result = history.update(&id, draft).await;

    match result {
        Ok(()) => {
            let seq = {
                let mut flashes = flashes.lock().await;
                let seq = flashes.get(&id).copied().unwrap_or(0) + 1;
                flashes.insert(id.clone(), seq);
                seq
            };

            publish(&state, &events, Some(&id), |s| {
                s.saving.remove(&id);
                s.saved.insert(id.clone());
                if s.editing.as_ref() == Some(&id) {
                    s.editing = None;
                    s.draft.clear();
                }
                s.error = None;
            });

            tokio::spawn(clear_flash_after(state, flashes, saved_flash, events, id, seq));
            Ok(SaveOutcome::Saved)
        }
        Err(e) => {
            error!(record = %id, "Saving correction failed: {}", e);
            let message = format!("Could not save correction: {}", e);
            publish(&state, &events, Some(&id), |s| {
                s.saving.remove(&id);
                s.error = Some(message);
            });
            Err(e)
        }
    }
}

async fn clear_flash_after(
    state: Arc<watch::Sender<CorrectionState>>,
    flashes: Arc<Mutex<HashMap<RecordId, u64>>>,
    delay: Duration,
    events: EventBus,
    id: RecordId,
    seq: u64,
) {
    tokio::time::sleep(delay).await;

    let mut flashes = flashes.lock().await;
    if flashes.get(&id) != Some(&seq) {
        return;
    }
    flashes.remove(&id);
    drop(flashes);

    publish(&state, &events, Some(&id), |s| {
        s.saved.remove(&id);
    });
}

fn publish(
    state: &watch::Sender<CorrectionState>,
    events: &EventBus,
    record_id: Option<&RecordId>,
    modify: impl FnOnce(&mut CorrectionState),
) {
    state.send_modify(modify);
    notify(events, record_id);
}

fn notify(events: &EventBus, record_id: Option<&RecordId>) {
    events.emit_lossy(KitabaEvent::CorrectionStateChanged {
        record_id: record_id.cloned(),
        timestamp: Utc::now(),
    });
}
