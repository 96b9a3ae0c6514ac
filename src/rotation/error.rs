use thiserror::Error;

/// Failure kinds surfaced by the rotation engine.
///
/// The transport layer collapses `Unauthenticated`, `ReplayDetected` and
/// `NotFound` into one response so callers cannot tell the cases apart.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),
    #[error("renewal secret already used")]
    ReplayDetected,
    #[error("session not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{context}: {err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
