use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common_auth::AuthError;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub error: u16,
    pub message: &'static str,
}

/// Unified error surface for resource handlers. Auth failures keep their own
/// status and code; resource failures use the fixed 404/422 pairings.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Unprocessable,
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Auth(err) => return err.into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "resource not found"),
            ApiError::Unprocessable => (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable"),
        };

        let body = ErrorBody {
            success: false,
            error: status.as_u16(),
            message,
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(message) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
