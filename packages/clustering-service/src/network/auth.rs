//! Shared-secret authentication for `/internal/*` routes.
//!
//! Mirrors the reference deployment's `verify_internal_token` dependency,
//! but compares in constant time so the handler's response latency does
//! not leak how many leading bytes of the token matched.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::AppState;

const TOKEN_HEADER: &str = "x-internal-token";

/// Rejects the request with 401 unless `X-Internal-Token` matches the
/// configured secret.
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if tokens_match(presented, &state.config.internal_token) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens_compare_equal() {
        assert!(tokens_match("secret", "secret"));
    }

    #[test]
    fn mismatched_tokens_compare_unequal() {
        assert!(!tokens_match("secret", "other"));
    }

    #[test]
    fn different_length_tokens_compare_unequal() {
        assert!(!tokens_match("short", "much-longer-secret"));
    }
}
