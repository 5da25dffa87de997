//! Current view snapshot

use axum::{extract::State, Json};

use crate::view::AppView;
use crate::AppContext;

/// GET /api/state
pub async fn get_state(State(ctx): State<AppContext>) -> Json<AppView> {
    Json(ctx.view())
}
