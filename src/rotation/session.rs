use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, pin::Pin};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::Result;

/// Durable record of one renewal grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub subject_id: Uuid,
    /// PHC string of the renewal secret; the plaintext is never stored.
    pub secret_hash: String,
    /// `jti` of the access credential issued with this session.
    pub linking_id: String,
    pub client_ip: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn new(
        subject_id: Uuid,
        secret_hash: String,
        linking_id: String,
        client_ip: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject_id,
            secret_hash,
            linking_id,
            client_ip: client_ip.to_string(),
            expires_at,
            used: false,
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Token pair handed to the client. The renewal secret appears here once.
#[derive(ToSchema, Serialize, Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence contract for sessions.
///
/// `mark_session_used` is the rotation's atomic unit: it flips `used` on the
/// predecessor only if it was still `false` and inserts the successor in the
/// same transaction. When the predecessor was already consumed it must return
/// `Error::ReplayDetected` and leave the store untouched. A predecessor that
/// does not exist is `Error::NotFound`.
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `Error::Internal` on a duplicate
    /// linking id or storage error.
    fn create_session<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()>;

    /// Fails with `Error::NotFound` if no session carries `linking_id`.
    fn find_session_by_linking_id<'a>(&'a self, linking_id: &'a str) -> StoreFuture<'a, Session>;

    fn mark_session_used<'a>(
        &'a self,
        session_id: Uuid,
        successor: &'a Session,
    ) -> StoreFuture<'a, ()>;
}
