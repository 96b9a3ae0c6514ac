//! # Tessera (Token Issuance and Rotation)
//!
//! `tessera` issues a short-lived **access credential** (an HMAC-signed JWT)
//! together with an opaque **renewal secret**, and later exchanges that secret
//! for a fresh pair. Every exchange retires the previous secret.
//!
//! ## Sessions
//!
//! Each issued pair is backed by one row in the `sessions` table. The access
//! credential's `jti` (the *linking id*) points at that row, and the row holds
//! an Argon2id hash of the renewal secret, never the secret itself.
//!
//! ## Rotation and replay detection
//!
//! A refresh verifies the access credential, loads the linked session, checks
//! the secret against the stored hash, and then claims the session with a
//! conditional update inside the same transaction that inserts its successor.
//! A second refresh with the same secret, sequential or concurrent, finds the
//! session already consumed and is rejected as a replay.
//!
//! Redeeming a secret from an IP other than the one it was issued to raises a
//! best-effort warning through a [`rotation::Notifier`]; it never blocks or
//! fails the rotation.
//!
//! Schema: `db/sql/01_sessions.sql`.

pub mod api;
pub mod cli;
pub mod rotation;

pub mod built_info {
    #![allow(dead_code, clippy::doc_markdown)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
