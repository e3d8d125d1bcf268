use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::secrets::SecretsError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    TooManyRequests { retry_after_secs: u32 },
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a resolution failure onto the HTTP surface.
    ///
    /// Missing entries and entries without a usable value both become
    /// "secret not found". Everything the caller cannot fix is a 502; with
    /// `expose_detail` off the message stays generic.
    pub fn from_secrets(err: &SecretsError, expose_detail: bool) -> Self {
        match err {
            SecretsError::InvalidInput { .. } => {
                ApiError::BadRequest("invalid secret name format".to_string())
            }
            SecretsError::SecretNotFound { .. } | SecretsError::NoValueExtractable { .. } => {
                ApiError::NotFound("secret not found".to_string())
            }
            SecretsError::AuthFailure { .. }
            | SecretsError::TransportFailure { .. }
            | SecretsError::UpstreamError { .. }
            | SecretsError::InvalidResponse { .. } => {
                if expose_detail {
                    ApiError::BadGateway(err.to_string())
                } else {
                    ApiError::BadGateway("upstream vault unavailable".to_string())
                }
            }
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn too_many_requests(retry_after_secs: u32) -> Self {
        ApiError::TooManyRequests { retry_after_secs }
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        ApiError::Internal(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let error_kind = match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::TooManyRequests { .. } => "too_many_requests",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::Internal(_) => "internal_error",
        };

        let (message, retry_after) = match self {
            ApiError::TooManyRequests { retry_after_secs } => {
                ("too many requests, please slow down".to_string(), Some(retry_after_secs))
            }
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadGateway(msg)
            | ApiError::Internal(msg) => (msg, None),
        };

        let mut response = (status, Json(ErrorBody { error: error_kind, message })).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
