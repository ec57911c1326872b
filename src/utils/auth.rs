/// Session token helpers and the request extractor that authenticates
/// calendar endpoints. Token issuance (signin/signup) lives in the main
/// Jesko backend; this service only needs to verify the HS256 token it
/// shares a secret with.
use crate::error::AppError;
use crate::utils::time::current_timestamp_seconds;
use crate::AppState;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn create_jwt(
    user_id: i64,
    secret: &str,
    expires_in_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = current_timestamp_seconds();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + expires_in_seconds,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims)
}

/// Authenticated caller, resolved from a Bearer header or the `token`
/// cookie set at login
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.to_string());

        let token = match bearer {
            Some(token) => token,
            None => {
                let jar = CookieJar::from_headers(&parts.headers);
                jar.get("token")
                    .map(|c| c.value().to_string())
                    .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?
            }
        };

        let secret = {
            let config = state.config.read().await;
            config.jwt_secret.clone()
        };

        let claims = decode_jwt(&token, &secret)
            .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;

        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthenticatedUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_round_trip() {
        let token = create_jwt(42, "test-secret", 3600).unwrap();
        let claims = decode_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "42");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_jwt_rejects_wrong_secret() {
        let token = create_jwt(42, "test-secret", 3600).unwrap();
        assert!(decode_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn test_jwt_rejects_expired_token() {
        let token = create_jwt(42, "test-secret", -3600).unwrap();
        assert!(decode_jwt(&token, "test-secret").is_err());
    }
}
