//! Correction workflow endpoints (privileged subjects only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kitaba_common::RecordId;
use serde::{Deserialize, Serialize};

use crate::correction::{CorrectionState, SaveOutcome};
use crate::{AppContext, Result};

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub outcome: SaveOutcome,
}

/// POST /api/history/:id/edit
pub async fn toggle_edit(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<CorrectionState>> {
    Ok(Json(ctx.correction.toggle_edit(&RecordId::new(id))?))
}

/// PUT /api/history/:id/draft
pub async fn set_draft(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(request): Json<DraftRequest>,
) -> Result<Json<CorrectionState>> {
    Ok(Json(
        ctx.correction.set_draft(&RecordId::new(id), request.text)?,
    ))
}

/// POST /api/history/:id/save
pub async fn save_correction(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SaveResponse>> {
    let outcome = ctx.correction.save(&RecordId::new(id)).await?;
    Ok(Json(SaveResponse { outcome }))
}

/// DELETE /api/history/:id
pub async fn delete_record(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    ctx.correction.delete(&RecordId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
