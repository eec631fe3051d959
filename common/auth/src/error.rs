use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header is expected")]
    MissingHeader,
    #[error("authorization header must be exactly two fields")]
    InvalidHeaderFormat,
    #[error("authorization scheme must be Bearer")]
    InvalidHeaderScheme,
    #[error("malformed token header: {0}")]
    MalformedHeader(String),
    #[error("no signing key published for kid '{0}'")]
    UnknownSigningKey(String),
    #[error("signing key service unavailable: {0}")]
    KeyServiceUnavailable(String),
    #[error("missing required claim '{0}'")]
    MissingClaims(String),
    #[error("token expired")]
    TokenExpired,
    #[error("'iss' claim does not match expected issuer")]
    InvalidIssuer,
    #[error("'aud' claim does not match expected audience")]
    InvalidAudience,
    #[error("signature does not match")]
    InvalidSignature,
    #[error("token failed decoding: {0}")]
    DecodeError(String),
    #[error("no permissions in claims")]
    NoPermissionsInClaims,
    #[error("permission '{0}' not granted")]
    PermissionDenied(String),
}

impl AuthError {
    /// Stable machine-readable code surfaced in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::InvalidHeaderFormat => "invalid_header_format",
            AuthError::InvalidHeaderScheme => "invalid_header_scheme",
            AuthError::MalformedHeader(_) => "malformed_header",
            AuthError::UnknownSigningKey(_) => "unknown_signing_key",
            AuthError::KeyServiceUnavailable(_) => "key_service_unavailable",
            AuthError::MissingClaims(_) => "missing_claims",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::DecodeError(_) => "decode_error",
            AuthError::NoPermissionsInClaims => "no_permissions_in_claims",
            AuthError::PermissionDenied(_) => "permission_denied",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingHeader
            | AuthError::InvalidHeaderFormat
            | AuthError::InvalidHeaderScheme
            | AuthError::MalformedHeader(_)
            | AuthError::UnknownSigningKey(_)
            | AuthError::KeyServiceUnavailable(_)
            | AuthError::MissingClaims(_)
            | AuthError::TokenExpired
            | AuthError::InvalidIssuer
            | AuthError::InvalidAudience
            | AuthError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AuthError::DecodeError(_) => StatusCode::BAD_REQUEST,
            AuthError::NoPermissionsInClaims | AuthError::PermissionDenied(_) => {
                StatusCode::FORBIDDEN
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match value.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaims(claim.clone()),
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::DecodeError(value.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: u16,
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = ErrorBody {
            success: false,
            error: status.as_u16(),
            message: code,
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}
