//! Local auth provider backed by the `subjects` and `session` tables
//!
//! Anonymous sign-in issues a fresh subject; token sign-in maps a registered
//! custom token to its subject. The signed-in subject is cached in the
//! single-row `session` table so it survives restarts.

use async_trait::async_trait;
use chrono::Utc;
use kitaba_common::SubjectId;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::info;

use super::{AuthError, AuthProvider, Identity};

pub struct LocalAuthProvider {
    db: SqlitePool,
    state: watch::Sender<Option<Identity>>,
}

impl LocalAuthProvider {
    /// Open the provider, restoring the cached session if there is one
    pub async fn open(db: SqlitePool) -> Result<Self, AuthError> {
        let cached: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT s.id, s.is_anonymous
            FROM session
            JOIN subjects s ON s.id = session.subject_id
            WHERE session.slot = 0
            "#,
        )
        .fetch_optional(&db)
        .await?;

        let identity = cached.map(|(id, is_anonymous)| Identity {
            subject_id: SubjectId::new(id),
            is_anonymous: is_anonymous != 0,
        });

        if let Some(identity) = &identity {
            info!(subject = %identity.subject_id, "Restored cached session");
        }

        let (state, _) = watch::channel(identity);
        Ok(Self { db, state })
    }

    /// Subject for a custom sign-in token, creating it on first use
    pub async fn register_token_subject(&self, token: &str) -> Result<SubjectId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        if let Some(existing) = self.subject_for_token(token).await? {
            return Ok(existing);
        }

        let subject = SubjectId::generate();
        sqlx::query(
            "INSERT INTO subjects (id, is_anonymous, token, created_at) VALUES (?, 0, ?, ?)",
        )
        .bind(subject.as_str())
        .bind(token)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await?;

        info!(subject = %subject, "Registered token subject");
        Ok(subject)
    }

    async fn subject_for_token(&self, token: &str) -> Result<Option<SubjectId>, AuthError> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM subjects WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        Ok(id.map(SubjectId::new))
    }

    async fn remember(&self, identity: &Identity) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT OR REPLACE INTO session (slot, subject_id, signed_in_at) VALUES (0, ?, ?)",
        )
        .bind(identity.subject_id.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await?;

        self.state.send_replace(Some(identity.clone()));
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    fn auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }

    async fn sign_in_anonymously(&self) -> Result<Identity, AuthError> {
        let subject = SubjectId::generate();
        sqlx::query("INSERT INTO subjects (id, is_anonymous, created_at) VALUES (?, 1, ?)")
            .bind(subject.as_str())
            .bind(Utc::now().timestamp_millis())
            .execute(&self.db)
            .await
            .map_err(|e| AuthError::SignInFailed(e.to_string()))?;

        let identity = Identity {
            subject_id: subject,
            is_anonymous: true,
        };
        self.remember(&identity).await?;
        info!(subject = %identity.subject_id, "Signed in anonymously");
        Ok(identity)
    }

    async fn sign_in_with_token(&self, token: &str) -> Result<Identity, AuthError> {
        let subject = self
            .subject_for_token(token.trim())
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let identity = Identity {
            subject_id: subject,
            is_anonymous: false,
        };
        self.remember(&identity).await?;
        info!(subject = %identity.subject_id, "Signed in with token");
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM session WHERE slot = 0")
            .execute(&self.db)
            .await?;
        self.state.send_replace(None);
        info!("Signed out");
        Ok(())
    }
}
