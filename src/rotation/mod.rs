//! Token issuance and refresh rotation.
//!
//! A [`Rotator`] issues an access credential together with a renewal secret
//! and persists a [`Session`] holding the secret's hash. Redeeming the secret
//! consumes that session and atomically creates its successor; presenting an
//! already consumed secret again is reported as a replay.

pub mod codec;
pub mod error;
pub mod hasher;
pub mod notify;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub use self::codec::{AccessClaims, CredentialCodec};
pub use self::error::{Error, Result};
pub use self::hasher::SecretHasher;
pub use self::notify::{LogNotifier, Notifier, WebhookNotifier};
pub use self::session::{Session, SessionStore, TokenPair};

pub const REFRESH_TOKEN_TTL: i64 = 7 * 24 * 60 * 60; // 7 days
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable settings for a [`Rotator`].
#[derive(Debug, Clone, Copy)]
pub struct RotationConfig {
    refresh_ttl_seconds: i64,
    operation_timeout: Duration,
}

impl RotationConfig {
    #[must_use]
    pub fn new(refresh_ttl_seconds: i64, operation_timeout: Duration) -> Self {
        Self {
            refresh_ttl_seconds,
            operation_timeout,
        }
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    /// Expiry of a session created at `now`, `None` when out of range.
    #[must_use]
    pub fn session_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::TimeDelta::try_seconds(self.refresh_ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self::new(REFRESH_TOKEN_TTL, OPERATION_TIMEOUT)
    }
}

pub struct Rotator {
    codec: CredentialCodec,
    hasher: SecretHasher,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    config: RotationConfig,
}

impl std::fmt::Debug for Rotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotator")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Credential, renewal secret and session minted together.
struct Minted {
    access_token: String,
    refresh_token: String,
    session: Session,
}

impl Rotator {
    #[must_use]
    pub fn new(
        codec: CredentialCodec,
        hasher: SecretHasher,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        config: RotationConfig,
    ) -> Self {
        Self {
            codec,
            hasher,
            store,
            notifier,
            config,
        }
    }

    /// Issue a token pair for `subject_id` and persist its session.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if `subject_id` is not a UUID, `Error::Internal`
    /// if minting, hashing or persisting fails. No tokens are returned unless
    /// the session is durable.
    #[instrument(skip(self))]
    pub async fn issue(&self, subject_id: &str, client_ip: &str) -> Result<TokenPair> {
        let subject = subject_id.parse::<Uuid>().map_err(|err| {
            debug!("Rejected subject id: {}", err);
            Error::InvalidInput("invalid subject identifier".to_string())
        })?;

        let minted = self.mint(subject, client_ip)?;
        self.bounded("create session", self.store.create_session(&minted.session))
            .await?;

        debug!(session_id = %minted.session.id, "Issued token pair");

        Ok(minted.into_pair())
    }

    /// Exchange a valid, unused renewal secret for a new token pair.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` for a bad access credential, an expired
    ///   grant, or a wrong renewal secret;
    /// - `Error::NotFound` when no session matches the credential;
    /// - `Error::ReplayDetected` when the session was already consumed,
    ///   including when a concurrent refresh consumed it first;
    /// - `Error::Internal` on storage, hashing or signing failure.
    #[instrument(skip(self, access_token, renewal_secret))]
    pub async fn refresh(
        &self,
        access_token: &str,
        renewal_secret: &str,
        client_ip: &str,
    ) -> Result<TokenPair> {
        let claims = self.codec.verify(access_token).map_err(|err| {
            debug!("Access token rejected: {}", err);
            Error::Unauthenticated("invalid access token")
        })?;

        let session = self
            .bounded(
                "find session",
                self.store.find_session_by_linking_id(&claims.jti),
            )
            .await?;

        // Checked before the secret so a reused secret is always a replay.
        if session.used {
            warn!(session_id = %session.id, "Renewal secret replay detected");
            return Err(Error::ReplayDetected);
        }

        if session.is_expired(Utc::now()) {
            return Err(Error::Unauthenticated("renewal grant expired"));
        }

        if !self.hasher.verify(&session.secret_hash, renewal_secret)? {
            return Err(Error::Unauthenticated("invalid renewal secret"));
        }

        if session.client_ip != client_ip {
            notify::dispatch_warning(
                Arc::clone(&self.notifier),
                session.subject_id,
                client_ip.to_string(),
                self.config.operation_timeout,
            );
        }

        let minted = self.mint(session.subject_id, client_ip)?;
        self.bounded(
            "rotate session",
            self.store.mark_session_used(session.id, &minted.session),
        )
        .await
        .inspect_err(|err| {
            if matches!(err, Error::ReplayDetected) {
                warn!(session_id = %session.id, "Concurrent refresh lost the rotation");
            }
        })?;

        debug!(
            previous = %session.id,
            successor = %minted.session.id,
            "Rotated session"
        );

        Ok(minted.into_pair())
    }

    fn mint(&self, subject: Uuid, client_ip: &str) -> Result<Minted> {
        let credential = self
            .codec
            .issue(subject, client_ip)
            .map_err(|err| Error::internal("failed to generate access token", err))?;
        let refresh_token = codec::generate_renewal_secret()
            .map_err(|err| Error::internal("failed to generate renewal secret", err))?;
        let secret_hash = self.hasher.hash(&refresh_token)?;

        let now = Utc::now();
        let expires_at = self.config.session_expiry(now).ok_or_else(|| {
            Error::Internal("refresh token ttl overflows the session expiry".to_string())
        })?;
        let session = Session::new(
            subject,
            secret_hash,
            credential.linking_id,
            client_ip,
            now,
            expires_at,
        );

        Ok(Minted {
            access_token: credential.token,
            refresh_token,
            session,
        })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.config.operation_timeout, future)
            .await
            .map_err(|_| {
                warn!("Session store call timed out: {}", operation);
                Error::Internal(format!("{operation} timed out"))
            })?
    }
}

impl Minted {
    fn into_pair(self) -> TokenPair {
        TokenPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
        }
    }
}
