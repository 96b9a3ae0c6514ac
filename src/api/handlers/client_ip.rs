//! Client address resolution.
//!
//! The configured header (default `X-Forwarded-For`) wins when present; its
//! first comma separated entry is the originating client. Otherwise the TCP
//! peer address from `ConnectInfo` is used.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, HeaderName, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr};

/// Header trusted to carry the client IP, installed as a request extension.
#[derive(Debug, Clone)]
pub struct IpHeader(pub HeaderName);

impl Default for IpHeader {
    fn default() -> Self {
        Self(HeaderName::from_static("x-forwarded-for"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

const UNKNOWN: &str = "unknown";

fn from_header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts.extensions.get::<IpHeader>().cloned().unwrap_or_default();

        if let Some(ip) = from_header(&parts.headers, &header.0) {
            return Ok(Self(ip));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| UNKNOWN.to_string(), |info| info.0.ip().to_string());

        Ok(Self(peer))
    }
}
