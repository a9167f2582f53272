use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

use crate::error::AppError;
use crate::AppState;

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Single-operator API-key gate. Accepts `X-Api-Key: <key>` or
/// `Authorization: Bearer <key>`; keys are compared as SHA-256 digests.
/// Failures log one structured warning with the peer address, which the
/// external fail2ban collaborator tails.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        // No key configured: local open mode.
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match provided {
        Some(key) if digest(key) == digest(expected) => Ok(next.run(req).await),
        _ => {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.to_string())
                .unwrap_or_else(|| "unknown".into());
            tracing::warn!(client = %peer, "authentication failure");
            Err(AppError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(digest("secret"), digest("secret"));
        assert_ne!(digest("secret"), digest("Secret"));
    }
}
