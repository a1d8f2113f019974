//! Credential extraction and the JWT-backed [`Authenticator`](crate::domain::Authenticator).

pub mod credential;
pub mod jwt;

pub use credential::extract_token;
pub use jwt::JwtAuthenticator;
