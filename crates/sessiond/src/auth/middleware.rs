//! Authentication middleware.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AuthConfig, AuthError, Claims};

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    secret: Option<Arc<str>>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create new auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn new(config: AuthConfig) -> Self {
        let secret: Option<Arc<str>> = match config.resolve_jwt_secret() {
            Ok(resolved) => resolved.map(Arc::from),
            Err(e) => {
                warn!("JWT secret could not be resolved: {}", e);
                None
            }
        };

        let decoding_key = secret
            .as_deref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            secret,
            decoding_key,
        }
    }

    /// Authorize a raw `Authorization` header value.
    pub fn authorize(&self, header_value: Option<&str>) -> Result<Claims, AuthError> {
        let header_value = header_value.ok_or(AuthError::MissingAuthHeader)?;
        let token = bearer_token_from_header(header_value)?;
        self.validate_token(token)
    }

    /// Validate a JWT: HS256 signature first, then the claim set.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate_token_at(token, Utc::now().timestamp())
    }

    /// Validate a JWT against an explicit clock.
    pub fn validate_token_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        // Expiry is checked by Claims::check without leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            debug!("JWT validation failed: {:?}", e);
            AuthError::InvalidToken(e.to_string())
        })?;

        token_data.claims.check(now)?;
        Ok(token_data.claims)
    }

    /// Mint a signed token for `subject`, expiring after `ttl` when given.
    pub fn generate_token(&self, subject: &str, ttl: Option<Duration>) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: ttl.map(|ttl| (now + ttl).timestamp()),
            iat: Some(now.timestamp()),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Verified claims.
    pub claims: Claims,
}

impl CurrentUser {
    /// Get the subject.
    pub fn id(&self) -> &str {
        &self.claims.sub
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Validates the `Authorization: Bearer <token>` header and injects
/// `CurrentUser` into request extensions. Every rejection is a 401.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let claims = auth.authorize(auth_header).inspect_err(|e| {
        debug!(path = %req.uri().path(), "rejected request: {}", e);
    })?;

    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}
