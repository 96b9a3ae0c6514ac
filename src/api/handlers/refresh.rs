use crate::{
    api::handlers::{client_ip::ClientIp, error_response, token_response},
    rotation::{Rotator, TokenPair},
};
use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct RefreshRequest {
    access_token: String,
    refresh_token: String,
}

// Never print the tokens themselves.
impl std::fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshRequest").finish_non_exhaustive()
    }
}

#[utoipa::path(
    post,
    path = "/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 400, description = "invalid request body", body = String),
        (status = 401, description = "unauthorized", body = String),
        (status = 500, description = "internal error", body = String),
    ),
    tag = "auth",
)]
/// Exchange a refresh token for a new token pair.
#[instrument(skip(rotator, payload))]
pub async fn refresh(
    ClientIp(client_ip): ClientIp,
    rotator: Extension<Arc<Rotator>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("Rejected refresh body: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
        }
    };

    match rotator
        .refresh(&request.access_token, &request.refresh_token, &client_ip)
        .await
    {
        Ok(pair) => token_response(pair),
        Err(err) => error_response(&err),
    }
}
