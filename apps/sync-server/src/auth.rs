//! JWT authentication.
//!
//! Every `/v1` route requires `Authorization: Bearer <access token>`.
//! The `sub` claim is the user id all task rows are scoped to.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// JWT ID
    pub jti: String,

    pub token_type: String,
}

/// Caller identity attached to the request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub token_id: String,
}

/// Issues and verifies HS256 access tokens.
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: &str, access_lifetime_secs: i64) -> Self {
        JwtManager {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_lifetime_secs,
        }
    }

    /// Generate an access token for `user_id`.
    pub fn generate_access_token(&self, user_id: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_lifetime_secs);

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign access token");
            ApiError::Internal
        })
    }

    /// Decode `token` and check it is an unexpired access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AuthenticatedUser, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| ApiError::unauthorized(format!("invalid token: {}", e)))?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(ApiError::unauthorized("expected an access token"));
        }
        if claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("token has no subject"));
        }

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            token_id: claims.jti,
        })
    }
}

/// Extract the bearer token from the `Authorization` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid authorization header"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| ApiError::unauthorized("invalid authorization header"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiError::unauthorized("authorization scheme must be Bearer"));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("missing bearer token"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test-secret", 3600);
        let token = manager.generate_access_token("user-7").unwrap();

        let user = manager.validate_access_token(&token).unwrap();
        assert_eq!(user.user_id, "user-7");
        assert!(!user.token_id.is_empty());
    }

    #[test]
    fn test_rejects_foreign_secret_and_expired_tokens() {
        let issuer = JwtManager::new("issuer-secret", 3600);
        let verifier = JwtManager::new("other-secret", 3600);
        let token = issuer.generate_access_token("user-7").unwrap();
        assert!(matches!(
            verifier.validate_access_token(&token),
            Err(ApiError::Unauthorized(_))
        ));

        // Past the default 60 s leeway.
        let stale = JwtManager::new("issuer-secret", -600);
        let token = stale.generate_access_token("user-7").unwrap();
        assert!(issuer.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_rejects_refresh_tokens() {
        let secret = "test-secret";
        let claims = Claims {
            sub: "user-7".into(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            jti: "j".into(),
            token_type: "refresh".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let manager = JwtManager::new(secret, 3600);
        assert!(manager.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert!(extract_bearer_token(&headers).is_err());
    }
}
