//! Access credential (HMAC-signed JWT) and renewal secret handling.
//!
//! Access credentials are compact JWTs signed with HS512. Verification accepts
//! any member of the HMAC family (HS256/HS384/HS512) keyed with the same shared
//! secret and rejects every other `alg`, so a token cannot downgrade itself to
//! `none` or to an asymmetric scheme.
//!
//! Renewal secrets are opaque: 32 bytes from the OS RNG, base64url encoded.
//! They carry no claims and have no relationship to the access credential.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac, digest::KeyInit};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL: i64 = 900; // 15 minutes
const RENEWAL_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("access token is empty")]
    Empty,
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("ttl overflows the expiry timestamp")]
    ExpiryOverflow,
    #[error("missing jti")]
    MissingJti,
    #[error("invalid signing key")]
    Key,
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

/// Signing algorithms of the HMAC family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Hs256,
    Hs384,
    Hs512,
}

impl Algorithm {
    fn parse(alg: &str) -> Option<Self> {
        match alg {
            "HS256" => Some(Self::Hs256),
            "HS384" => Some(Self::Hs384),
            "HS512" => Some(Self::Hs512),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    fn sign(self, key: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Hs256 => mac_sign::<Hmac<Sha256>>(key, input),
            Self::Hs384 => mac_sign::<Hmac<Sha384>>(key, input),
            Self::Hs512 => mac_sign::<Hmac<Sha512>>(key, input),
        }
    }

    fn verify(self, key: &[u8], input: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::Hs256 => mac_verify::<Hmac<Sha256>>(key, input, signature),
            Self::Hs384 => mac_verify::<Hmac<Sha384>>(key, input, signature),
            Self::Hs512 => mac_verify::<Hmac<Sha512>>(key, input, signature),
        }
    }
}

fn mac_sign<M: Mac + KeyInit>(key: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| Error::Key)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

// `verify_slice` compares in constant time.
fn mac_verify<M: Mac + KeyInit>(key: &[u8], input: &[u8], signature: &[u8]) -> Result<(), Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| Error::Key)?;
    mac.update(input);
    mac.verify_slice(signature)
        .map_err(|_| Error::InvalidSignature)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Claims carried by an access credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (identity) the credential was issued to.
    pub sub: Uuid,
    /// Client IP observed at issuance.
    pub ip: String,
    pub iat: i64,
    pub exp: i64,
    /// Linking id of the session minted alongside this credential.
    pub jti: String,
}

/// A freshly signed access credential and the linking id embedded in it.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub linking_id: String,
}

#[derive(Debug, Clone)]
pub struct CredentialCodec {
    key: SecretString,
    ttl_seconds: i64,
}

impl CredentialCodec {
    #[must_use]
    pub fn new(key: SecretString, ttl_seconds: i64) -> Self {
        Self { key, ttl_seconds }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Mint a signed access credential with a new linking id.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded or signing fails.
    pub fn issue(&self, subject: Uuid, client_ip: &str) -> Result<IssuedCredential, Error> {
        self.issue_at(subject, client_ip, Utc::now().timestamp())
    }

    /// Same as [`CredentialCodec::issue`] with an explicit issuance time.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded or signing fails.
    pub fn issue_at(
        &self,
        subject: Uuid,
        client_ip: &str,
        now_unix_seconds: i64,
    ) -> Result<IssuedCredential, Error> {
        let linking_id = Uuid::new_v4().to_string();
        let claims = AccessClaims {
            sub: subject,
            ip: client_ip.to_string(),
            iat: now_unix_seconds,
            exp: now_unix_seconds
                .checked_add(self.ttl_seconds)
                .ok_or(Error::ExpiryOverflow)?,
            jti: linking_id.clone(),
        };
        let token = encode(
            Algorithm::Hs512,
            self.key.expose_secret().as_bytes(),
            &claims,
        )?;

        Ok(IssuedCredential { token, linking_id })
    }

    /// Verify an access credential and return its claims.
    ///
    /// This only proves the credential is authentic and unexpired; whether the
    /// session it links to still exists is a separate check.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty or malformed, declares a non-HMAC
    /// algorithm, fails signature verification, is expired, or lacks a `jti`.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, Error> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Same as [`CredentialCodec::verify`] against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`CredentialCodec::verify`].
    pub fn verify_at(&self, token: &str, now_unix_seconds: i64) -> Result<AccessClaims, Error> {
        if token.is_empty() {
            return Err(Error::Empty);
        }

        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: AccessHeader = b64d_json(header_b64)?;
        let alg = Algorithm::parse(&header.alg).ok_or(Error::UnsupportedAlg(header.alg))?;

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        alg.verify(
            self.key.expose_secret().as_bytes(),
            signing_input.as_bytes(),
            &signature,
        )?;

        let claims: AccessClaims = b64d_json(claims_b64)?;
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }
        if claims.jti.is_empty() {
            return Err(Error::MissingJti);
        }

        Ok(claims)
    }
}

/// Generate an opaque renewal secret.
///
/// # Errors
///
/// Returns an error if the OS RNG cannot provide entropy.
pub fn generate_renewal_secret() -> Result<String, Error> {
    let mut bytes = [0u8; RENEWAL_SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::Entropy(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

fn encode<T: Serialize>(alg: Algorithm, key: &[u8], claims: &T) -> Result<String, Error> {
    let header = AccessHeader {
        alg: alg.as_str().to_string(),
        typ: Some("JWT".to_string()),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
    let signature = alg.sign(key, signing_input.as_bytes())?;
    Ok(format!(
        "{signing_input}.{}",
        Base64UrlUnpadded::encode_string(&signature)
    ))
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "test-signing-key-with-enough-entropy";
    const NOW: i64 = 1_700_000_000;

    fn codec() -> CredentialCodec {
        CredentialCodec::new(SecretString::from(KEY), ACCESS_TOKEN_TTL)
    }

    fn forge(header: &serde_json::Value, claims: &serde_json::Value, key: &[u8]) -> String {
        let signing_input = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(header.to_string().as_bytes()),
            Base64UrlUnpadded::encode_string(claims.to_string().as_bytes())
        );
        let signature = mac_sign::<Hmac<Sha256>>(key, signing_input.as_bytes()).unwrap_or_default();
        format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        )
    }

    #[test]
    fn issue_and_verify() -> Result<(), Error> {
        let subject = Uuid::new_v4();
        let issued = codec().issue_at(subject, "203.0.113.10", NOW)?;
        let claims = codec().verify_at(&issued.token, NOW + 1)?;

        assert_eq!(claims.sub, subject);
        assert_eq!(claims.ip, "203.0.113.10");
        assert_eq!(claims.jti, issued.linking_id);
        assert_eq!(claims.exp, NOW + ACCESS_TOKEN_TTL);
        Ok(())
    }

    #[test]
    fn issued_header_is_hs512() -> Result<(), Error> {
        let issued = codec().issue_at(Uuid::new_v4(), "ip", NOW)?;
        let header_b64 = issued.token.split('.').next().unwrap_or_default();
        let header: AccessHeader = b64d_json(header_b64)?;
        assert_eq!(header.alg, "HS512");
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        Ok(())
    }

    #[test]
    fn each_issue_mints_a_new_linking_id() -> Result<(), Error> {
        let subject = Uuid::new_v4();
        let first = codec().issue_at(subject, "ip", NOW)?;
        let second = codec().issue_at(subject, "ip", NOW)?;
        assert_ne!(first.linking_id, second.linking_id);
        Ok(())
    }

    #[test]
    fn rejects_empty_token() {
        assert!(matches!(codec().verify_at("", NOW), Err(Error::Empty)));
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(matches!(
            codec().verify_at("only.two", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            codec().verify_at("a.b.c.d", NOW),
            Err(Error::TokenFormat)
        ));
    }

    #[test]
    fn rejects_tampered_payload() -> Result<(), Error> {
        let issued = codec().issue_at(Uuid::new_v4(), "203.0.113.10", NOW)?;
        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let forged_claims = Base64UrlUnpadded::encode_string(
            json!({
                "sub": Uuid::new_v4(),
                "ip": "203.0.113.10",
                "iat": NOW,
                "exp": NOW + ACCESS_TOKEN_TTL,
                "jti": issued.linking_id,
            })
            .to_string()
            .as_bytes(),
        );
        parts[1] = &forged_claims;
        let tampered = parts.join(".");

        assert!(matches!(
            codec().verify_at(&tampered, NOW),
            Err(Error::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rejects_tampered_signature() -> Result<(), Error> {
        let issued = codec().issue_at(Uuid::new_v4(), "ip", NOW)?;
        let (signing_input, _) = issued.token.rsplit_once('.').unwrap_or_default();
        let tampered = format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&[0u8; 64])
        );
        assert!(matches!(
            codec().verify_at(&tampered, NOW),
            Err(Error::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rejects_wrong_key() -> Result<(), Error> {
        let issued = codec().issue_at(Uuid::new_v4(), "ip", NOW)?;
        let other = CredentialCodec::new(SecretString::from("another-key"), ACCESS_TOKEN_TTL);
        assert!(matches!(
            other.verify_at(&issued.token, NOW),
            Err(Error::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<(), Error> {
        let issued = codec().issue_at(Uuid::new_v4(), "ip", NOW)?;
        assert!(matches!(
            codec().verify_at(&issued.token, NOW + ACCESS_TOKEN_TTL),
            Err(Error::Expired)
        ));
        Ok(())
    }

    #[test]
    fn rejects_non_hmac_algorithms() {
        let claims = json!({
            "sub": Uuid::new_v4(),
            "ip": "ip",
            "iat": NOW,
            "exp": NOW + 60,
            "jti": "jti-1",
        });
        for alg in ["none", "RS256", "ES256", "EdDSA"] {
            let token = forge(&json!({ "alg": alg, "typ": "JWT" }), &claims, KEY.as_bytes());
            assert!(
                matches!(codec().verify_at(&token, NOW), Err(Error::UnsupportedAlg(ref a)) if a == alg),
                "{alg} must be rejected"
            );
        }
    }

    #[test]
    fn accepts_other_hmac_family_members() -> Result<(), Error> {
        let claims = json!({
            "sub": Uuid::new_v4(),
            "ip": "ip",
            "iat": NOW,
            "exp": NOW + 60,
            "jti": "jti-1",
        });
        let token = forge(&json!({ "alg": "HS256", "typ": "JWT" }), &claims, KEY.as_bytes());
        let verified = codec().verify_at(&token, NOW)?;
        assert_eq!(verified.jti, "jti-1");
        Ok(())
    }

    #[test]
    fn header_without_typ_is_judged_on_alg() -> Result<(), Error> {
        let claims = json!({
            "sub": Uuid::new_v4(),
            "ip": "ip",
            "iat": NOW,
            "exp": NOW + 60,
            "jti": "jti-1",
        });
        let token = forge(&json!({ "alg": "HS256" }), &claims, KEY.as_bytes());
        assert_eq!(codec().verify_at(&token, NOW)?.jti, "jti-1");

        let token = forge(&json!({ "alg": "none" }), &claims, KEY.as_bytes());
        assert!(matches!(
            codec().verify_at(&token, NOW),
            Err(Error::UnsupportedAlg(ref a)) if a == "none"
        ));
        Ok(())
    }

    #[test]
    fn issue_rejects_overflowing_ttl() {
        let codec = CredentialCodec::new(SecretString::from(KEY), i64::MAX);
        assert!(matches!(
            codec.issue_at(Uuid::new_v4(), "ip", NOW),
            Err(Error::ExpiryOverflow)
        ));
    }

    #[test]
    fn rejects_missing_or_mistyped_jti() {
        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let base = |jti: serde_json::Value| {
            json!({
                "sub": Uuid::new_v4(),
                "ip": "ip",
                "iat": NOW,
                "exp": NOW + 60,
                "jti": jti,
            })
        };

        let missing = forge(
            &header,
            &json!({ "sub": Uuid::new_v4(), "ip": "ip", "iat": NOW, "exp": NOW + 60 }),
            KEY.as_bytes(),
        );
        assert!(matches!(codec().verify_at(&missing, NOW), Err(Error::Json(_))));

        let numeric = forge(&header, &base(json!(42)), KEY.as_bytes());
        assert!(matches!(codec().verify_at(&numeric, NOW), Err(Error::Json(_))));

        let empty = forge(&header, &base(json!("")), KEY.as_bytes());
        assert!(matches!(
            codec().verify_at(&empty, NOW),
            Err(Error::MissingJti)
        ));
    }

    #[test]
    fn renewal_secrets_are_random_and_url_safe() -> Result<(), Error> {
        let first = generate_renewal_secret()?;
        let second = generate_renewal_secret()?;
        assert_ne!(first, second);

        let decoded = Base64UrlUnpadded::decode_vec(&first).map_err(|_| Error::Base64)?;
        assert_eq!(decoded.len(), RENEWAL_SECRET_BYTES);
        assert!(
            first
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        );
        Ok(())
    }
}
