use crate::{
    api::handlers::{client_ip::ClientIp, error_response, token_response},
    rotation::{Rotator, TokenPair},
};
use axum::{
    extract::{Extension, Query},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct AuthQuery {
    /// Subject UUID; a new one is generated when omitted.
    guid: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth",
    params(AuthQuery),
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "invalid guid format", body = String),
        (status = 500, description = "internal error", body = String),
    ),
    tag = "auth",
)]
/// Issue an access and refresh token pair for a subject.
#[instrument(skip(rotator, query))]
pub async fn auth(
    Query(query): Query<AuthQuery>,
    ClientIp(client_ip): ClientIp,
    rotator: Extension<Arc<Rotator>>,
) -> Response {
    let guid = match query.guid.filter(|guid| !guid.trim().is_empty()) {
        Some(guid) => guid,
        None => {
            let guid = Uuid::new_v4().to_string();
            info!("Generated new subject id {}", guid);
            guid
        }
    };

    match rotator.issue(&guid, &client_ip).await {
        Ok(pair) => token_response(pair),
        Err(err) => error_response(&err),
    }
}
