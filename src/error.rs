use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Error kinds surfaced by the service, mapped onto the HTTP status table.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Monthly plan quota exhausted. Distinct from the token-bucket denial.
    #[error("monthly quota exceeded: {resource}")]
    QuotaExceeded { resource: String, current: i64, limit: i64 },
    /// Token-bucket denial. Carries the state needed for rate-limit headers.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_at: i64,
        retry_after_secs: u64,
    },
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
    timestamp: String,
    #[serde(rename = "requestId")]
    request_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QuotaExceeded { .. } | ApiError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Unavailable(_) => "UPSTREAM_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::QuotaExceeded {
                resource,
                current,
                limit,
            } => Some(serde_json::json!({
                "resource": resource,
                "current": current,
                "limit": limit,
            })),
            ApiError::RateLimited {
                limit,
                retry_after_secs,
                ..
            } => Some(serde_json::json!({
                "limit": limit,
                "retryAfterSecs": retry_after_secs,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 5xx details stay in the logs, not the wire.
        let message = match &self {
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                "internal server error".to_string()
            }
            ApiError::Unavailable(msg) => {
                error!(error = %msg, "upstream unavailable");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let envelope = ErrorEnvelope {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                details: self.details(),
            },
            timestamp: Utc::now().to_rfc3339(),
            request_id: Uuid::new_v4().to_string(),
        };

        let mut response = (status, Json(envelope)).into_response();

        if let ApiError::RateLimited {
            limit,
            remaining,
            reset_at,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            if let Ok(v) = header::HeaderValue::from_str(&limit.to_string()) {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = header::HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = header::HeaderValue::from_str(&reset_at.to_string()) {
                headers.insert("x-ratelimit-reset", v);
            }
            if let Ok(v) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, v);
            }
        }

        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("record not found".to_string()),
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ApiError::Unavailable("database unreachable".to_string())
            }
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                ApiError::Conflict(format!("constraint violation: {}", db.constraint().unwrap()))
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
            ApiError::Unavailable("score store unreachable".to_string())
        } else {
            ApiError::Internal(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_table() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn quota_and_rate_limit_share_status_but_not_code() {
        let quota = ApiError::QuotaExceeded {
            resource: "requests".into(),
            current: 10_000,
            limit: 10_000,
        };
        let rate = ApiError::RateLimited {
            limit: 10,
            remaining: 0,
            reset_at: 0,
            retry_after_secs: 1,
        };
        assert_eq!(quota.status(), rate.status());
        assert_ne!(quota.code(), rate.code());
    }

    #[test]
    fn row_not_found_translates_to_not_found() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
