pub mod auth;
pub mod client_ip;
pub mod health;
pub mod refresh;

use crate::rotation::{Error, TokenPair};
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

/// Successful token response; the pair must never be cached.
pub(crate) fn token_response(pair: TokenPair) -> Response {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(pair),
    )
        .into_response()
}

/// Map a rotation failure to its HTTP response.
///
/// Every authentication failure gets the same status and body.
pub(crate) fn error_response(err: &Error) -> Response {
    match err {
        Error::InvalidInput(_) => {
            debug!("Rejected request: {}", err);
            (StatusCode::BAD_REQUEST, "invalid guid format").into_response()
        }
        Error::Unauthenticated(_) | Error::ReplayDetected | Error::NotFound => {
            debug!("Rejected request: {}", err);
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
        Error::Internal(_) => {
            error!("Request failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
