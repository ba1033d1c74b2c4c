//! Bearer token authentication and requester identity.
//!
//! Behavior:
//! - Token configured: requires `Authorization: Bearer <token>` header
//! - Token not configured: only accepts requests from loopback addresses
//!
//! The authenticated caller is a trusted gateway that forwards the end
//! user's identity in the `x-user-id` header.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

use super::problem_details;
use crate::server::AppState;
use crate::store::UserId;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Check if a request is authorized against an optional token.
///
/// Token comparison hashes both sides with SHA-256 so timing does not depend
/// on the length of the matching prefix.
pub fn is_authorized(token: &Option<String>, addr: &SocketAddr, headers: &HeaderMap) -> bool {
    match token {
        Some(expected) => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|provided| {
                Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
            }),
        None => addr.ip().is_loopback(),
    }
}

/// Middleware that guards API routes (`/api/v1/*`).
pub async fn require_api_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if is_authorized(&state.api_token, &addr, request.headers()) {
        next.run(request).await
    } else {
        problem_details::unauthorized("missing or invalid credentials").into_response()
    }
}

/// The end user on whose behalf a request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester(pub UserId);

impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .map(Requester)
            .ok_or_else(|| {
                problem_details::unauthorized(format!("missing or invalid {USER_ID_HEADER} header"))
                    .into_response()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:5000").parse().unwrap()
    }

    #[test]
    fn loopback_only_without_token() {
        let headers = HeaderMap::new();
        assert!(is_authorized(&None, &addr("127.0.0.1"), &headers));
        assert!(!is_authorized(&None, &addr("10.0.0.8"), &headers));
    }

    #[test]
    fn token_must_match() {
        let token = Some("s3cret".to_string());
        let mut headers = HeaderMap::new();
        assert!(!is_authorized(&token, &addr("127.0.0.1"), &headers));

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(!is_authorized(&token, &addr("10.0.0.8"), &headers));

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert!(is_authorized(&token, &addr("10.0.0.8"), &headers));
    }
}
