use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::{models::ApiResponse, AppState};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_DOMAIN: &[u8] = b"studio-admin-token";

/// Shared admin secret, kept only as its keyed digest.
///
/// Presented tokens are digested the same way and compared with
/// [`Mac::verify_slice`], so the comparison time does not depend on where
/// the two tokens first differ, nor on their lengths.
pub struct AdminKey {
    digest: Vec<u8>,
}

fn token_mac(token: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(TOKEN_DOMAIN).expect("HMAC can take key of any size");
    mac.update(token.as_bytes());
    mac
}

impl AdminKey {
    pub fn new(token: &str) -> Self {
        Self {
            digest: token_mac(token).finalize().into_bytes().to_vec(),
        }
    }

    pub fn verify(&self, presented: &str) -> bool {
        token_mac(presented).verify_slice(&self.digest).is_ok()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn unauthorized(msg: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiResponse::<()>::error(msg))).into_response()
}

/// Axum middleware guarding every admin route.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let token = bearer_token(auth_header).ok_or_else(|| unauthorized("Expected a bearer token"))?;
    if !state.admin_key.verify(token) {
        tracing::warn!("Rejected admin request to {}", req.uri().path());
        return Err(unauthorized("Invalid admin token"));
    }

    Ok(next.run(req).await)
}
