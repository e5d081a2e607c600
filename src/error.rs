use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Application-level error type
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing field, unknown enum value, bad URL
    Validation(String),
    /// No bearer token on a protected route
    AuthRequired,
    /// Bad signature, expired token, or a token that decoded but is unusable
    AuthInvalid(String),
    /// Same client-id presented from a different origin
    IdentityMismatch(String),
    /// Valid session with the wrong caller role
    Forbidden(String),
    /// Agent or resource unknown
    NotFound(String),
    /// Per-consumer feedback rate limit exceeded
    RateLimited,
    /// Production-only spam block for a consumer/agent pair
    BlockedSpam(String),
    /// Request-scoped deadline exceeded
    Timeout,
    /// Database error
    Database(sqlx::Error),
    /// Internal server error
    Internal(String),
}

/// Error bodies are `{"error": "<message>"}`.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::AuthRequired => write!(f, "Authorization required"),
            Self::AuthInvalid(msg) => write!(f, "{msg}"),
            Self::IdentityMismatch(msg) => write!(f, "{msg}"),
            Self::Forbidden(msg) => write!(f, "{msg}"),
            Self::NotFound(msg) => write!(f, "{msg}"),
            Self::RateLimited => write!(f, "Rate limit exceeded: too many feedbacks"),
            Self::BlockedSpam(msg) => write!(f, "{msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Self::Validation(_) | Self::BlockedSpam(_) => StatusCode::BAD_REQUEST,
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::AuthInvalid(_) | Self::IdentityMismatch(_) | Self::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Infrastructure failures are logged with detail and surfaced generically.
        let message = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "database failure");
                "Internal server error".to_string()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse { error: message })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn status_codes_follow_the_contract() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::AuthRequired, StatusCode::UNAUTHORIZED),
            (AppError::AuthInvalid("bad".into()), StatusCode::FORBIDDEN),
            (
                AppError::IdentityMismatch("spoof".into()),
                StatusCode::FORBIDDEN,
            ),
            (AppError::Forbidden("role".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("agent".into()), StatusCode::NOT_FOUND),
            (AppError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (
                AppError::BlockedSpam("spam".into()),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                AppError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[actix_rt::test]
    async fn internal_detail_is_not_leaked() {
        let resp = AppError::Internal("connection string with password".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The body is built from the generic message only.
        let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Internal server error"));
        assert!(!text.contains("password"));
    }
}
