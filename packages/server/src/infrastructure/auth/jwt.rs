//! HS256 JSON Web Token verification.
//!
//! Tokens are issued elsewhere in the application; the gateway only checks
//! the signature and expiry and reads the user id and role.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::Deserialize;

use crate::domain::{AuthError, AuthenticatedUser, Authenticator, UserId};
use pulse_shared::time::unix_seconds_to_datetime;

const DEFAULT_ROLE: &str = "user";

/// `sub` may be issued as a JSON number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Subject {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Subject,
    #[serde(default = "default_role")]
    role: String,
    exp: i64,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Verify tokens signed with `secret`; expiry is checked without leeway.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Tolerate `seconds` of clock skew when checking expiry.
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        let claims = data.claims;

        let user_id = match claims.sub {
            Subject::Number(id) => id,
            Subject::Text(text) => text
                .parse()
                .map_err(|_| AuthError::InvalidToken(format!("subject '{}' is not a user id", text)))?,
        };
        let expires_at = unix_seconds_to_datetime(claims.exp)
            .ok_or_else(|| AuthError::InvalidToken("expiry out of range".to_string()))?;

        Ok(AuthenticatedUser {
            user_id: UserId::new(user_id),
            role: claims.role,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &[u8] = b"test-secret-for-pulse-gateway-0123456789";

    fn sign(claims: serde_json::Value, secret: &[u8]) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_verify_valid_token_with_numeric_subject() {
        // テスト項目: 数値の sub を持つ有効なトークンが検証される
        // given (前提条件):
        let exp = future_exp();
        let token = sign(json!({"sub": 42, "role": "admin", "exp": exp}), SECRET);
        let authenticator = JwtAuthenticator::new(SECRET);

        // when (操作):
        let user = authenticator.verify(&token).await.unwrap();

        // then (期待する結果):
        assert_eq!(user.user_id, UserId::new(42));
        assert_eq!(user.role, "admin");
        assert_eq!(user.expires_at.timestamp(), exp);
    }

    #[tokio::test]
    async fn test_verify_string_subject_and_default_role() {
        // テスト項目: 文字列の sub も数値として解釈され、role の既定値は user
        // given (前提条件):
        let token = sign(json!({"sub": "7", "exp": future_exp()}), SECRET);
        let authenticator = JwtAuthenticator::new(SECRET);

        // when (操作):
        let user = authenticator.verify(&token).await.unwrap();

        // then (期待する結果):
        assert_eq!(user.user_id, UserId::new(7));
        assert_eq!(user.role, "user");
    }

    #[tokio::test]
    async fn test_verify_expired_token() {
        // テスト項目: 期限切れのトークンは Expired になる
        // given (前提条件):
        let exp = chrono::Utc::now().timestamp() - 60;
        let token = sign(json!({"sub": 1, "exp": exp}), SECRET);
        let authenticator = JwtAuthenticator::new(SECRET);

        // when (操作):
        let result = authenticator.verify(&token).await;

        // then (期待する結果):
        assert_eq!(result, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn test_verify_wrong_signature() {
        // テスト項目: 別の鍵で署名されたトークンは InvalidToken になる
        // given (前提条件):
        let token = sign(json!({"sub": 1, "exp": future_exp()}), b"another-secret");
        let authenticator = JwtAuthenticator::new(SECRET);

        // when (操作):
        let result = authenticator.verify(&token).await;

        // then (期待する結果):
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_verify_rejects_non_numeric_subject_and_garbage() {
        // テスト項目: 数値でない sub や不正な文字列は InvalidToken になる
        // given (前提条件):
        let non_numeric = sign(json!({"sub": "alice", "exp": future_exp()}), SECRET);
        let missing_exp = sign(json!({"sub": 1}), SECRET);
        let authenticator = JwtAuthenticator::new(SECRET);

        // when (操作) / then (期待する結果):
        for token in [non_numeric.as_str(), missing_exp.as_str(), "not-a-jwt"] {
            let result = authenticator.verify(token).await;
            assert!(
                matches!(result, Err(AuthError::InvalidToken(_))),
                "{} should be invalid",
                token
            );
        }
    }

    #[tokio::test]
    async fn test_leeway_accepts_recently_expired_token() {
        // テスト項目: leeway を設定すると直前に期限切れしたトークンも受け入れる
        // given (前提条件):
        let exp = chrono::Utc::now().timestamp() - 5;
        let token = sign(json!({"sub": 1, "exp": exp}), SECRET);
        let authenticator = JwtAuthenticator::new(SECRET).with_leeway(60);

        // when (操作):
        let result = authenticator.verify(&token).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }
}
