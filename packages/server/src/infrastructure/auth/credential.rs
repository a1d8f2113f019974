//! Locating the credential inside an upgrade request.

use crate::infrastructure::handshake::HandshakeRequest;

const TOKEN_QUERY_PARAM: &str = "token";
const BEARER_SCHEME: &str = "bearer";

/// Token from `?token=<jwt>` or, failing that, `Authorization: Bearer <jwt>`.
///
/// Empty values count as absent.
pub fn extract_token(request: &HandshakeRequest) -> Option<String> {
    if let Some(token) = request
        .query_param(TOKEN_QUERY_PARAM)
        .filter(|token| !token.is_empty())
    {
        return Some(token.to_string());
    }

    let authorization = request.header("Authorization")?;
    let (scheme, token) = authorization.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}
