//! History store adapter
//!
//! Keeps the materialized history list for the current subject. Exactly one
//! subscription task runs per (ready, subject) pair; it is cancelled and
//! awaited before the next one opens, so a stale snapshot can never overwrite
//! the list of a newer subject.
//!
//! The list is rebuilt from a full snapshot on every change notification and
//! is never patched in place.

use chrono::{DateTime, Utc};
use kitaba_common::events::{EventBus, KitabaEvent};
use kitaba_common::models::{Correction, NewDetection};
use kitaba_common::{DetectionRecord, RecordId, RecordTime, SubjectId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::SessionState;
use crate::store::{DocumentStore, StoreError};
use crate::{Error, Result};

/// Shown when the subscription cannot read the collection
pub const HISTORY_LOAD_ERROR: &str =
    "Could not load detection history. Check store access rules.";

/// One materialized history item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: DetectionRecord,
    pub time: RecordTime,
}

impl HistoryEntry {
    pub fn display_text(&self) -> &str {
        self.record.display_text()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryState {
    /// Subject whose collection is materialized
    pub subject_id: Option<SubjectId>,
    /// Newest first
    pub entries: Vec<HistoryEntry>,
    /// At least one snapshot (or load failure) arrived for `subject_id`
    pub loaded: bool,
    pub error: Option<String>,
}

/// Normalize timestamps and sort newest first
///
/// Records without a committed server timestamp sort as of `now`. The sort is
/// stable, so records with equal times keep store order.
pub fn materialize(records: Vec<DetectionRecord>, now: DateTime<Utc>) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = records
        .into_iter()
        .map(|record| {
            let time = RecordTime::resolve(record.created_at, now);
            HistoryEntry { record, time }
        })
        .collect();
    entries.sort_by(|a, b| b.time.effective().cmp(&a.time.effective()));
    entries
}

struct ActiveSubscription {
    subject: SubjectId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HistorySync {
    store: Option<Arc<dyn DocumentStore>>,
    session_rx: watch::Receiver<SessionState>,
    state: Arc<watch::Sender<HistoryState>>,
    active: Mutex<Option<ActiveSubscription>>,
    events: EventBus,
}

impl HistorySync {
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        session_rx: watch::Receiver<SessionState>,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(HistoryState::default());
        Self {
            store,
            session_rx,
            state: Arc::new(state),
            active: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HistoryState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> HistoryState {
        self.state.borrow().clone()
    }

    /// Follow session changes until the session manager goes away
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut session_rx = self.session_rx.clone();
            loop {
                let session = session_rx.borrow_and_update().clone();
                self.reconcile(&session).await;

                if session_rx.changed().await.is_err() {
                    break;
                }
            }
            self.shutdown().await;
        })
    }

    /// Open, keep or replace the subscription to match `session`
    pub async fn reconcile(&self, session: &SessionState) {
        let desired = match (&self.store, session.ready, &session.subject_id) {
            (Some(_), true, Some(subject)) => Some(subject.clone()),
            _ => None,
        };

        let mut active = self.active.lock().await;
        if active.as_ref().map(|a| &a.subject) == desired.as_ref() {
            return;
        }

        if let Some(previous) = active.take() {
            Self::teardown(previous).await;
            self.reset();
        }

        let (Some(subject), Some(store)) = (desired, self.store.clone()) else {
            return;
        };

        info!(subject = %subject, "Opening history subscription");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(subscription_loop(
            store,
            subject.clone(),
            self.state.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        *active = Some(ActiveSubscription {
            subject,
            cancel,
            task,
        });
    }

    async fn teardown(subscription: ActiveSubscription) {
        debug!(subject = %subscription.subject, "Closing history subscription");
        subscription.cancel.cancel();
        if let Err(e) = subscription.task.await {
            warn!("History subscription task ended abnormally: {}", e);
        }
    }

    fn reset(&self) {
        self.state.send_replace(HistoryState::default());
        self.events.emit_lossy(KitabaEvent::HistoryUpdated {
            subject_id: None,
            count: 0,
            timestamp: Utc::now(),
        });
    }

    /// Close the active subscription, if any
    pub async fn shutdown(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            Self::teardown(previous).await;
            self.reset();
        }
    }

    /// Subject whose collection all writes go to
    pub fn active_subject(&self) -> Result<SubjectId> {
        if self.store.is_none() {
            return Err(Error::PersistenceDisabled);
        }
        self.session_rx
            .borrow()
            .subject_id
            .clone()
            .ok_or(Error::NoSession)
    }

    fn store(&self) -> Result<&Arc<dyn DocumentStore>> {
        self.store.as_ref().ok_or(Error::PersistenceDisabled)
    }

    /// Append a record to the current subject's collection
    pub async fn create(&self, detection: NewDetection) -> Result<RecordId> {
        let store = self.store()?;
        let subject = self.active_subject()?;
        Ok(store.create(&subject, &subject, detection).await?)
    }

    /// Save a correction for a record of the current subject
    pub async fn update(&self, id: &RecordId, corrected_text: String) -> Result<()> {
        let store = self.store()?;
        let subject = self.active_subject()?;
        store
            .update(&subject, &subject, id, Correction { corrected_text })
            .await?;
        Ok(())
    }

    /// Delete a record; deleting a missing record succeeds
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let store = self.store()?;
        let subject = self.active_subject()?;
        match store.delete(&subject, &subject, id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                debug!(record = %id, "Delete of missing record ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a materialized entry by id
    pub fn entry(&self, id: &RecordId) -> Option<HistoryEntry> {
        self.state
            .borrow()
            .entries
            .iter()
            .find(|entry| &entry.record.id == id)
            .cloned()
    }
}

async fn subscription_loop(
    store: Arc<dyn DocumentStore>,
    subject: SubjectId,
    state: Arc<watch::Sender<HistoryState>>,
    events: EventBus,
    cancel: CancellationToken,
) {
    // Subscribe before the first load so no change slips between them
    let mut changes = store.changes();
    load_snapshot(store.as_ref(), &subject, &state, &events, &cancel).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(change) if change.owner == subject => {
                    load_snapshot(store.as_ref(), &subject, &state, &events, &cancel).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "History subscription lagged; reloading");
                    load_snapshot(store.as_ref(), &subject, &state, &events, &cancel).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn load_snapshot(
    store: &dyn DocumentStore,
    subject: &SubjectId,
    state: &watch::Sender<HistoryState>,
    events: &EventBus,
    cancel: &CancellationToken,
) {
    let result = store.list(subject, subject).await;
    if cancel.is_cancelled() {
        return;
    }

    let next = match result {
        Ok(records) => HistoryState {
            subject_id: Some(subject.clone()),
            entries: materialize(records, Utc::now()),
            loaded: true,
            error: None,
        },
        Err(e) => {
            error!(subject = %subject, "Failed to load history: {}", e);
            HistoryState {
                subject_id: Some(subject.clone()),
                entries: Vec::new(),
                loaded: true,
                error: Some(HISTORY_LOAD_ERROR.to_string()),
            }
        }
    };

    let count = next.entries.len();
    state.send_replace(next);
    events.emit_lossy(KitabaEvent::HistoryUpdated {
        subject_id: Some(subject.clone()),
        count,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(id: &str, created_at: Option<DateTime<Utc>>) -> DetectionRecord {
        DetectionRecord {
            id: RecordId::new(id),
            owner: SubjectId::new("alice"),
            text: format!("text {}", id),
            corrected_text: None,
            image_name: format!("{}.png", id),
            created_at,
            corrected_at: None,
            is_corrected: false,
        }
    }

    #[test]
    fn test_materialize_sorts_newest_first() {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let now = base + Duration::hours(1);
        let records = vec![
            record("old", Some(base - Duration::days(1))),
            record("pending", None),
            record("mid", Some(base)),
            record("tie-a", Some(base)),
        ];

        let ids: Vec<String> = materialize(records, now)
            .iter()
            .map(|e| e.record.id.to_string())
            .collect();
        assert_eq!(ids, vec!["pending", "mid", "tie-a", "old"]);
    }

    #[test]
    fn test_sort_invariant_over_snapshots() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for len in 0..12usize {
            let records: Vec<_> = (0..len)
                .map(|i| {
                    // scrambled, some pending
                    let offset = ((i * 7) % 5) as i64;
                    let created = (i % 4 != 3).then(|| base + Duration::minutes(offset));
                    record(&i.to_string(), created)
                })
                .collect();
            let entries = materialize(records, base + Duration::minutes(2));
            assert_eq!(entries.len(), len);
            for pair in entries.windows(2) {
                assert!(pair[0].time.effective() >= pair[1].time.effective());
            }
        }
    }

    #[test]
    fn test_pending_record_is_provisional() {
        let now = Utc::now();
        let entries = materialize(vec![record("p", None)], now);
        assert_eq!(entries[0].time, RecordTime::Provisional(now));
    }
}
