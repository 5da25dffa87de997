//! Image selection and detection endpoints

use axum::{
    extract::{Multipart, State},
    Json,
};
use tracing::debug;

use crate::detection::{DetectOutcome, ImageSummary};
use crate::{AppContext, Error, Result};

/// Upload size limit for `POST /api/image`
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// POST /api/image
///
/// Multipart form with one `file` field.
pub async fn upload_image(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<ImageSummary>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::BadRequest(format!("Failed to read upload: {}", e)))?;

        let summary = ctx
            .detection
            .select_image(file_name, content_type.as_deref(), data.to_vec())
            .await?;
        return Ok(Json(summary));
    }

    Err(Error::BadRequest("Missing multipart field 'file'".to_string()))
}

/// POST /api/detect
pub async fn detect(State(ctx): State<AppContext>) -> Result<Json<DetectOutcome>> {
    Ok(Json(ctx.detection.detect().await?))
}
