use std::sync::Arc;

use axum::{
    Extension, Json, async_trait,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::axum_http::error_responses::ErrorResponse;

pub const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Serialize, Deserialize)]
pub struct SupabaseClaims {
    pub sub: String,
    pub aud: String,
    pub email: Option<String>,
    pub exp: usize,
}

/// Caller identity taken from a verified Supabase access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug)]
pub struct AuthError(String);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            code: StatusCode::UNAUTHORIZED.as_u16(),
            message: format!("Unauthorized: {}", self.0),
        });
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// HS256 verifier for tokens issued by the hosted identity provider.
#[derive(Clone)]
pub struct SupabaseJwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SupabaseJwtVerifier {
    pub fn new(jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let token_data = decode::<SupabaseClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "auth: token rejected");
                AuthError(format!("JWT validation failed: {}", e))
            })?;

        let user_id = Uuid::parse_str(&token_data.claims.sub)
            .map_err(|_| AuthError("Invalid user ID in token".to_string()))?;

        Ok(AuthUser {
            user_id,
            email: token_data.claims.email,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(verifier) = Extension::<Arc<SupabaseJwtVerifier>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthError("Token verifier is not configured".to_string()))?;

        let auth_str = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AuthError("Missing Authorization header".to_string()))?
            .to_str()
            .map_err(|_| AuthError("Invalid Authorization header".to_string()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError("Invalid Authorization header format".to_string()))?;

        verifier.verify(token)
    }
}
