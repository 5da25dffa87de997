//! kitaba-ui library - Historical Arabic text detector
//!
//! Owns the application state server-side: session, history, detection and
//! correction components are built once into an `AppContext` and shared with
//! the HTTP handlers. The browser page only renders `AppView`.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use kitaba_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod api;
pub mod correction;
pub mod detection;
pub mod error;
pub mod history;
pub mod inference;
pub mod session;
pub mod store;
pub mod view;

pub use error::{Error, Result};

use correction::CorrectionController;
use detection::DetectionController;
use history::HistorySync;
use inference::TranscriptionBackend;
use session::{AuthProvider, SessionManager, DATABASE_UNAVAILABLE_MESSAGE};
use store::{DocumentStore, PrivilegeRegistry};
use view::AppView;

/// External collaborators; any of them may be absent
#[derive(Default, Clone)]
pub struct Backends {
    pub auth: Option<Arc<dyn AuthProvider>>,
    pub store: Option<Arc<dyn DocumentStore>>,
    pub privileges: Option<Arc<dyn PrivilegeRegistry>>,
    /// `None` when no API key is configured
    pub inference: Option<Arc<dyn TranscriptionBackend>>,
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Token for the one startup sign-in instead of an anonymous identity
    pub initial_auth_token: Option<String>,
    /// How long the "Saved" flag stays after a correction
    pub saved_flash: Duration,
    pub event_capacity: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            initial_auth_token: None,
            saved_flash: Duration::from_millis(kitaba_common::config::DEFAULT_SAVED_FLASH_MS),
            event_capacity: 256,
        }
    }
}

/// Application context shared across HTTP handlers
#[derive(Clone)]
pub struct AppContext {
    pub session: Arc<SessionManager>,
    pub history: Arc<HistorySync>,
    pub detection: Arc<DetectionController>,
    pub correction: Arc<CorrectionController>,
    pub events: EventBus,
}

impl AppContext {
    pub fn new(backends: Backends, options: AppOptions) -> Self {
        let events = EventBus::new(options.event_capacity);

        let session = Arc::new(match backends.auth {
            Some(auth) => SessionManager::new(
                auth,
                backends.privileges,
                options.initial_auth_token,
                events.clone(),
            ),
            None => SessionManager::disabled(DATABASE_UNAVAILABLE_MESSAGE, events.clone()),
        });

        // Records are owned by subjects, so a store without auth is unusable
        let store = backends
            .store
            .filter(|_| session.current().persistence_enabled);

        let history = Arc::new(HistorySync::new(store, session.subscribe(), events.clone()));
        let detection = Arc::new(DetectionController::new(
            backends.inference,
            history.clone(),
            events.clone(),
        ));
        let correction = Arc::new(CorrectionController::new(
            session.subscribe(),
            history.clone(),
            options.saved_flash,
            events.clone(),
        ));

        Self {
            session,
            history,
            detection,
            correction,
            events,
        }
    }

    /// Start the session and history background tasks
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        vec![self.session.clone().run(), self.history.clone().run()]
    }

    /// Render the current view
    pub fn view(&self) -> AppView {
        view::render(
            &self.session.current(),
            &self.detection.current(),
            &self.history.current(),
            &self.correction.current(),
        )
    }

    /// Close the history subscription
    pub async fn shutdown(&self) {
        self.history.shutdown().await;
    }
}

/// Build application router
pub fn build_router(ctx: AppContext) -> Router {
    use axum::routing::{delete, get, post, put};

    let actions = Router::new()
        .route("/api/image", post(api::upload_image))
        .route("/api/detect", post(api::detect))
        .route("/api/history/:id/edit", post(api::toggle_edit))
        .route("/api/history/:id/draft", put(api::set_draft))
        .route("/api/history/:id/save", post(api::save_correction))
        .route("/api/history/:id", delete(api::delete_record))
        .route("/api/session/sign-in", post(api::sign_in))
        .route("/api/session/sign-out", post(api::sign_out))
        .layer(DefaultBodyLimit::max(api::MAX_UPLOAD_BYTES));

    let reads = Router::new()
        .route("/", get(api::serve_index))
        .route("/api/state", get(api::get_state))
        .route("/api/events", get(api::event_stream))
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes());

    Router::new().merge(actions).merge(reads).with_state(ctx)
}
