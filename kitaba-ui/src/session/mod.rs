//! Session management
//!
//! Resolves the identity that owns history records. On startup the current
//! auth state is used as-is; when there is none, exactly one sign-in is
//! attempted for the lifetime of the process (token sign-in when an initial
//! token is configured, anonymous otherwise). Readiness is reached either way.

use async_trait::async_trait;
use chrono::Utc;
use kitaba_common::events::{EventBus, KitabaEvent};
use kitaba_common::SubjectId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::PrivilegeRegistry;

pub mod local;

pub use local::LocalAuthProvider;

/// Shown when the one startup sign-in fails
pub const AUTH_FAILED_MESSAGE: &str = "Could not authenticate. History may not be saved.";
/// Shown when no auth provider or store could be opened
pub const DATABASE_UNAVAILABLE_MESSAGE: &str =
    "Could not connect to the database. History is disabled.";

/// A signed-in identity as reported by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: SubjectId,
    pub is_anonymous: bool,
}

/// Auth provider errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Sign-in failed: {0}")]
    SignInFailed(String),

    #[error("Unknown sign-in token")]
    InvalidToken,

    #[error("Auth provider unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Unavailable(err.to_string())
    }
}

/// Identity provider contract
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current identity plus every later change
    fn auth_state(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in_anonymously(&self) -> Result<Identity, AuthError>;

    async fn sign_in_with_token(&self, token: &str) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Published session state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Identity resolution finished (successfully or not)
    pub ready: bool,
    pub subject_id: Option<SubjectId>,
    pub is_anonymous: bool,
    /// Registered in the privileged-subjects registry
    pub privileged: bool,
    /// Persistent banner text
    pub error: Option<String>,
    /// False when the process runs without auth provider and store
    pub persistence_enabled: bool,
}

pub struct SessionManager {
    provider: Option<Arc<dyn AuthProvider>>,
    privileges: Option<Arc<dyn PrivilegeRegistry>>,
    initial_token: Option<String>,
    /// One-shot latch for the startup sign-in
    sign_in_attempted: AtomicBool,
    /// Set once any identity has been observed
    identity_seen: AtomicBool,
    state: watch::Sender<SessionState>,
    events: EventBus,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        privileges: Option<Arc<dyn PrivilegeRegistry>>,
        initial_token: Option<String>,
        events: EventBus,
    ) -> Self {
        let initial = SessionState {
            persistence_enabled: true,
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        Self {
            provider: Some(provider),
            privileges,
            initial_token: initial_token.filter(|t| !t.trim().is_empty()),
            sign_in_attempted: AtomicBool::new(false),
            identity_seen: AtomicBool::new(false),
            state,
            events,
        }
    }

    /// Session for a process that could not open its auth provider
    pub fn disabled(message: impl Into<String>, events: EventBus) -> Self {
        let initial = SessionState {
            ready: true,
            error: Some(message.into()),
            persistence_enabled: false,
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        Self {
            provider: None,
            privileges: None,
            initial_token: None,
            sign_in_attempted: AtomicBool::new(true),
            identity_seen: AtomicBool::new(false),
            state,
            events,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn sign_in_attempted(&self) -> bool {
        self.sign_in_attempted.load(Ordering::SeqCst)
    }

    /// Follow the provider's auth state until it closes
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(provider) = self.provider.clone() else {
                debug!("Session disabled, not following auth state");
                return;
            };

            let mut auth_rx = provider.auth_state();
            loop {
                let identity = auth_rx.borrow_and_update().clone();
                self.handle_auth_state(identity).await;

                if auth_rx.changed().await.is_err() {
                    debug!("Auth state channel closed");
                    break;
                }
            }
        })
    }

    /// React to one auth state value
    pub async fn handle_auth_state(&self, identity: Option<Identity>) {
        match identity {
            Some(identity) => self.apply_identity(identity).await,
            None => self.handle_signed_out().await,
        }
    }

    async fn handle_signed_out(&self) {
        if self.identity_seen.load(Ordering::SeqCst) {
            info!("Signed out; clearing subject");
            self.publish(|state| {
                state.ready = true;
                state.subject_id = None;
                state.is_anonymous = false;
                state.privileged = false;
            });
            return;
        }

        if self.sign_in_attempted.swap(true, Ordering::SeqCst) {
            // Startup sign-in already used up
            self.publish(|state| state.ready = true);
            return;
        }

        let Some(provider) = self.provider.clone() else {
            return;
        };

        let result = match &self.initial_token {
            Some(token) => {
                info!("No existing identity; signing in with configured token");
                provider.sign_in_with_token(token).await
            }
            None => {
                info!("No existing identity; signing in anonymously");
                provider.sign_in_anonymously().await
            }
        };

        match result {
            Ok(identity) => self.apply_identity(identity).await,
            Err(e) => {
                error!("Startup sign-in failed: {}", e);
                self.publish(|state| {
                    state.ready = true;
                    state.error = Some(AUTH_FAILED_MESSAGE.to_string());
                });
            }
        }
    }

    async fn apply_identity(&self, identity: Identity) {
        self.identity_seen.store(true, Ordering::SeqCst);

        {
            let state = self.state.borrow();
            if state.ready && state.subject_id.as_ref() == Some(&identity.subject_id) {
                return;
            }
        }

        let privileged = self.lookup_privileged(&identity.subject_id).await;
        info!(
            subject = %identity.subject_id,
            anonymous = identity.is_anonymous,
            privileged,
            "Session ready"
        );

        self.publish(|state| {
            state.ready = true;
            state.subject_id = Some(identity.subject_id.clone());
            state.is_anonymous = identity.is_anonymous;
            state.privileged = privileged;
            state.error = None;
        });
    }

    async fn lookup_privileged(&self, subject: &SubjectId) -> bool {
        let Some(registry) = &self.privileges else {
            return false;
        };
        match registry.is_privileged(subject).await {
            Ok(privileged) => privileged,
            Err(e) => {
                warn!(subject = %subject, "Privilege lookup failed: {}", e);
                false
            }
        }
    }

    /// Switch to the identity registered for `token`
    pub async fn sign_in_with_token(&self, token: &str) -> crate::Result<SessionState> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(crate::Error::PersistenceDisabled)?;
        let identity = provider.sign_in_with_token(token).await?;
        self.apply_identity(identity).await;
        Ok(self.current())
    }

    pub async fn sign_out(&self) -> crate::Result<SessionState> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(crate::Error::PersistenceDisabled)?;
        provider.sign_out().await?;
        self.handle_signed_out().await;
        Ok(self.current())
    }

    fn publish(&self, modify: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(modify);
        let state = self.state.borrow().clone();
        self.events.emit_lossy(KitabaEvent::SessionChanged {
            subject_id: state.subject_id,
            ready: state.ready,
            privileged: state.privileged,
            timestamp: Utc::now(),
        });
    }
}
