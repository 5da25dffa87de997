//! Identity swap endpoints

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::session::SessionState;
use crate::{AppContext, Error, Result};

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub token: String,
}

/// POST /api/session/sign-in
pub async fn sign_in(
    State(ctx): State<AppContext>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SessionState>> {
    if request.token.trim().is_empty() {
        return Err(Error::BadRequest("Token must not be empty".to_string()));
    }
    Ok(Json(ctx.session.sign_in_with_token(&request.token).await?))
}

/// POST /api/session/sign-out
pub async fn sign_out(State(ctx): State<AppContext>) -> Result<Json<SessionState>> {
    Ok(Json(ctx.session.sign_out().await?))
}
