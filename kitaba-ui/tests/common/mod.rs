//! Shared helpers for kitaba-ui integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use kitaba_common::db::init_database;
use kitaba_ui::inference::{ImageUpload, InferenceError, Transcription, TranscriptionBackend};
use kitaba_ui::session::{AuthProvider, LocalAuthProvider};
use kitaba_ui::store::{DocumentStore, PrivilegeRegistry, SqliteStore};
use kitaba_ui::{AppContext, AppOptions, Backends};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Backend returning a fixed result and counting calls
pub struct StubBackend {
    result: Result<Transcription, (u16, String)>,
    pub calls: AtomicUsize,
}

impl StubBackend {
    pub fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(Transcription::Text(text.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn status(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err((status, body.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for StubBackend {
    fn backend_id(&self) -> &str {
        "stub"
    }

    async fn transcribe(&self, _image: &ImageUpload) -> Result<Transcription, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map_err(|(status, body)| InferenceError::Api { status, body })
    }
}

/// Local auth provider and SQLite store over one temporary database
pub struct LocalStack {
    pub dir: TempDir,
    pub auth: Arc<LocalAuthProvider>,
    pub store: Arc<SqliteStore>,
}

impl LocalStack {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self::open(dir).await
    }

    /// Reopen the stack on an existing database directory
    pub async fn open(dir: TempDir) -> Self {
        let pool = init_database(&dir.path().join("kitaba.db")).await.unwrap();
        let auth = Arc::new(LocalAuthProvider::open(pool.clone()).await.unwrap());
        let store = Arc::new(SqliteStore::new(pool));
        Self { dir, auth, store }
    }

    pub fn backends(&self, inference: Option<Arc<StubBackend>>) -> Backends {
        Backends {
            auth: Some(self.auth.clone() as Arc<dyn AuthProvider>),
            store: Some(self.store.clone() as Arc<dyn DocumentStore>),
            privileges: Some(self.store.clone() as Arc<dyn PrivilegeRegistry>),
            inference: inference.map(|b| b as Arc<dyn TranscriptionBackend>),
        }
    }
}

pub fn fast_options(initial_auth_token: Option<&str>) -> AppOptions {
    AppOptions {
        initial_auth_token: initial_auth_token.map(str::to_string),
        saved_flash: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Build and start a context
pub fn start(backends: Backends, options: AppOptions) -> AppContext {
    let ctx = AppContext::new(backends, options);
    ctx.start();
    ctx
}

/// Wait (bounded) until the watched value satisfies `pred`
pub async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    pred: impl FnMut(&T) -> bool,
) -> T {
    let value = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("Timed out waiting for state")
        .expect("State channel closed");
    value.clone()
}
