//! # Kitaba Common Library
//!
//! Shared code for the Kitaba detector service:
//! - Detection record model and the two-phase record time
//! - Event types (KitabaEvent) and the EventBus
//! - Configuration loading and root folder resolution
//! - Database bootstrap

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use models::{DetectionRecord, RecordId, RecordTime, SubjectId};
