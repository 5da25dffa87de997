//! SQLite-backed document store
//!
//! A new record is written in two steps: the row first lands with a NULL
//! `created_at` (visible to subscribers immediately), then the server
//! timestamp is committed. Subscribers see one notification per step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kitaba_common::models::{Correction, NewDetection};
use kitaba_common::{DetectionRecord, RecordId, SubjectId};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    AccessPolicy, DocumentStore, Operation, PrivilegeRegistry, StoreChange, StoreChangeKind,
    StoreError,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(sqlx::FromRow)]
struct DetectionRow {
    id: String,
    owner: String,
    text: String,
    corrected_text: Option<String>,
    image_name: String,
    created_at: Option<i64>,
    corrected_at: Option<i64>,
    is_corrected: i64,
}

impl From<DetectionRow> for DetectionRecord {
    fn from(row: DetectionRow) -> Self {
        DetectionRecord {
            id: RecordId::new(row.id),
            owner: SubjectId::new(row.owner),
            text: row.text,
            corrected_text: row.corrected_text,
            image_name: row.image_name,
            created_at: row.created_at.and_then(DateTime::from_timestamp_millis),
            corrected_at: row.corrected_at.and_then(DateTime::from_timestamp_millis),
            is_corrected: row.is_corrected != 0,
        }
    }
}

/// Server clock in epoch milliseconds
fn server_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct SqliteStore {
    db: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { db, changes }
    }

    /// Live change subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn notify(&self, owner: &SubjectId, record_id: &RecordId, kind: StoreChangeKind) {
        // No subscribers is fine: nobody is displaying this collection
        let _ = self.changes.send(StoreChange {
            owner: owner.clone(),
            record_id: record_id.clone(),
            kind,
        });
    }

    async fn lookup_privileged(&self, subject: &SubjectId) -> Result<bool, StoreError> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT subject_id FROM admin_users WHERE subject_id = ?")
                .bind(subject.as_str())
                .fetch_optional(&self.db)
                .await?;
        Ok(found.is_some())
    }

    async fn authorize(
        &self,
        operation: Operation,
        actor: &SubjectId,
        owner: &SubjectId,
    ) -> Result<(), StoreError> {
        // Own-scope reads and creates never need the registry
        let privileged = if AccessPolicy::allows(operation, actor, owner, false) {
            false
        } else {
            self.lookup_privileged(actor).await?
        };
        AccessPolicy::check(operation, actor, owner, privileged)
    }

    /// Register `subject` in the privileged-subjects registry
    pub async fn grant_privilege(&self, subject: &SubjectId) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO admin_users (subject_id, granted_at) VALUES (?, ?)")
            .bind(subject.as_str())
            .bind(server_now_ms())
            .execute(&self.db)
            .await?;
        info!(subject = %subject, "Granted correction privileges");
        Ok(())
    }

    /// Remove `subject` from the registry; returns whether it was registered
    pub async fn revoke_privilege(&self, subject: &SubjectId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM admin_users WHERE subject_id = ?")
            .bind(subject.as_str())
            .execute(&self.db)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            info!(subject = %subject, "Revoked correction privileges");
        }
        Ok(removed)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn list(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
    ) -> Result<Vec<DetectionRecord>, StoreError> {
        self.authorize(Operation::Read, actor, owner).await?;

        let rows: Vec<DetectionRow> = sqlx::query_as(
            r#"
            SELECT id, owner, text, corrected_text, image_name,
                   created_at, corrected_at, is_corrected
            FROM detections
            WHERE owner = ?
            ORDER BY rowid
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(DetectionRecord::from).collect())
    }

    async fn create(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        detection: NewDetection,
    ) -> Result<RecordId, StoreError> {
        self.authorize(Operation::Create, actor, owner).await?;

        let id = RecordId::generate();
        sqlx::query(
            "INSERT INTO detections (id, owner, text, image_name, is_corrected) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(id.as_str())
        .bind(owner.as_str())
        .bind(&detection.text)
        .bind(&detection.image_name)
        .execute(&self.db)
        .await?;
        self.notify(owner, &id, StoreChangeKind::Created);

        sqlx::query("UPDATE detections SET created_at = ? WHERE id = ?")
            .bind(server_now_ms())
            .bind(id.as_str())
            .execute(&self.db)
            .await?;
        self.notify(owner, &id, StoreChangeKind::TimestampCommitted);

        debug!(record = %id, owner = %owner, "Detection record created");
        Ok(id)
    }

    async fn update(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        id: &RecordId,
        correction: Correction,
    ) -> Result<(), StoreError> {
        self.authorize(Operation::Correct, actor, owner).await?;

        let result = sqlx::query(
            r#"
            UPDATE detections
            SET corrected_text = ?, is_corrected = 1, corrected_at = ?
            WHERE id = ? AND owner = ?
            "#,
        )
        .bind(&correction.corrected_text)
        .bind(server_now_ms())
        .bind(id.as_str())
        .bind(owner.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        self.notify(owner, id, StoreChangeKind::Corrected);
        info!(record = %id, actor = %actor, "Correction saved");
        Ok(())
    }

    async fn delete(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        id: &RecordId,
    ) -> Result<(), StoreError> {
        self.authorize(Operation::Delete, actor, owner).await?;

        let result = sqlx::query("DELETE FROM detections WHERE id = ? AND owner = ?")
            .bind(id.as_str())
            .bind(owner.as_str())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        self.notify(owner, id, StoreChangeKind::Deleted);
        info!(record = %id, actor = %actor, "Detection record deleted");
        Ok(())
    }
}

#[async_trait]
impl PrivilegeRegistry for SqliteStore {
    async fn is_privileged(&self, subject: &SubjectId) -> Result<bool, StoreError> {
        self.lookup_privileged(subject).await
    }
}
