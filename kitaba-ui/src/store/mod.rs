//! Document store contract
//!
//! Records live in one collection per owner (`detections/{owner}/items`).
//! Every call names the acting subject so the store can enforce the access
//! policy itself; the client-side privileged flag is only a UI hint.
//!
//! Stores publish a `StoreChange` after every mutation. Subscribers reload the
//! owner's collection; the change carries no record data.

use async_trait::async_trait;
use kitaba_common::models::{Correction, NewDetection};
use kitaba_common::{DetectionRecord, RecordId, SubjectId};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod policy;
pub mod sqlite;

pub use policy::{AccessPolicy, Operation};
pub use sqlite::SqliteStore;

/// Document store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChangeKind {
    /// Record written; server timestamp still pending
    Created,
    /// Server creation timestamp committed
    TimestampCommitted,
    Corrected,
    Deleted,
}

/// Change notification for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub owner: SubjectId,
    pub record_id: RecordId,
    pub kind: StoreChangeKind,
}

/// Per-owner detection record collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Subscribe to change notifications for all collections
    fn changes(&self) -> broadcast::Receiver<StoreChange>;

    /// All records in `owner`'s collection, in store order
    async fn list(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
    ) -> Result<Vec<DetectionRecord>, StoreError>;

    /// Append a record; the store assigns the id and the creation timestamp
    async fn create(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        detection: NewDetection,
    ) -> Result<RecordId, StoreError>;

    /// Apply a correction: sets `corrected_text`, `is_corrected` and `corrected_at` (server clock)
    async fn update(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        id: &RecordId,
        correction: Correction,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        actor: &SubjectId,
        owner: &SubjectId,
        id: &RecordId,
    ) -> Result<(), StoreError>;
}

/// Privileged-subject registry lookup
#[async_trait]
pub trait PrivilegeRegistry: Send + Sync {
    async fn is_privileged(&self, subject: &SubjectId) -> Result<bool, StoreError>;
}
