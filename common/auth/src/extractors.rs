use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::guards::ensure_permission;
use crate::verifier::JwtVerifier;

/// Extracts and verifies the bearer credential on the current request.
///
/// Extraction failures and verification failures both reject the request
/// before the handler body runs; the permission check is the handler's first
/// line via [`AuthContext::require`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    /// Demand a specific permission; errors propagate as 403 responses.
    pub fn require(&self, permission: &str) -> AuthResult<()> {
        ensure_permission(permission, &self.claims)
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);

        let header_value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?;

        let token = parse_bearer(header_value)?;
        let claims = verifier.verify(&token).await?;

        Ok(Self { claims, token })
    }
}

/// The header must hold exactly two whitespace-separated fields: the scheme
/// literal and the credential. Extra fields are rejected, not ignored.
fn parse_bearer(value: &axum::http::HeaderValue) -> AuthResult<String> {
    let raw = value.to_str().map_err(|_| AuthError::InvalidHeaderFormat)?;

    let mut fields = raw.split_whitespace();
    let (scheme, token) = match (fields.next(), fields.next(), fields.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        _ => return Err(AuthError::InvalidHeaderFormat),
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidHeaderScheme);
    }

    Ok(token.to_owned())
}
