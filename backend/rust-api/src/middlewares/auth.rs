use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::AppState;

/// Role carried by backend-to-backend tokens; the only role allowed on /admin.
pub const ADMIN_ROLE: &str = "service_role";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user_id
    #[serde(default)]
    pub role: String,
    pub aud: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    InvalidSignature,
    InvalidAudience,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token expired"),
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
            AuthError::InvalidAudience => write!(f, "Invalid token audience"),
        }
    }
}

impl std::error::Error for AuthError {}

/// HS256 tokens issued by the auth backend with the shared project secret.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
}

impl JwtService {
    pub fn new(secret: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            audience: audience.to_string(),
        }
    }

    pub fn generate_token(&self, claims: JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.as_str()]);

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Requires a valid bearer token and stores its [`JwtClaims`] in the request.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            tracing::debug!("{}", AuthError::MissingToken);
            StatusCode::UNAUTHORIZED
        })?;

    let jwt_service = JwtService::new(&state.config.jwt_secret, &state.config.jwt_audience);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated user: {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

pub async fn admin_guard_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let claims = request.extensions().get::<JwtClaims>();
    if let Some(claims) = claims {
        if claims.role == ADMIN_ROLE {
            return Ok(next.run(request).await);
        }
    }
    tracing::warn!("Access denied: {} role required", ADMIN_ROLE);
    Err(StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(aud: &str) -> JwtClaims {
        JwtClaims {
            sub: "user123".to_string(),
            role: "authenticated".to_string(),
            aud: aud.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            iat: chrono::Utc::now().timestamp() as usize,
        }
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret", "authenticated");

        let token = service.generate_token(claims("authenticated")).unwrap();
        let validated = service.validate_token(&token).unwrap();

        assert_eq!(validated.sub, "user123");
        assert_eq!(validated.role, "authenticated");
    }

    #[test]
    fn rejects_foreign_audience_and_secret() {
        let service = JwtService::new("test-secret", "authenticated");

        let token = service.generate_token(claims("anon")).unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidAudience)
        ));

        let other = JwtService::new("other-secret", "authenticated");
        let token = other.generate_token(claims("authenticated")).unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidSignature)
        ));
    }
}
