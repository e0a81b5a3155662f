//! The HTTP error envelope.
//!
//! Every error response carries `{success: false, error: {code, message,
//! ...extras}, requestId, timestamp}`. Operational errors keep their own
//! status and code; unknown errors are logged in full and returned as a
//! generic 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{Value, json};
use synthd_core::Error as EngineError;

/// Non-standard status used when a job unwinds through cancellation
/// (nginx's "client closed request").
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    extras: Value,
    request_id: Option<u64>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
            extras: Value::Null,
            request_id: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "missing or invalid API key".to_string(),
            extras: Value::Null,
            request_id: None,
        }
    }

    pub fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN",
            message: "client address is not allowed".to_string(),
            extras: Value::Null,
            request_id: None,
        }
    }

    pub fn aborted(external_job_id: Option<&str>) -> Self {
        Self {
            status: client_closed_request(),
            code: "JOB_ABORTED",
            message: "Job stopped by user".to_string(),
            extras: match external_job_id {
                Some(id) => json!({ "jobId": id }),
                None => Value::Null,
            },
            request_id: None,
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "GENERATION_ERROR",
            message: message.into(),
            extras: json!({ "stage": "generation" }),
            request_id: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: "no such route".to_string(),
            extras: Value::Null,
            request_id: None,
        }
    }

    pub fn internal(detail: impl core::fmt::Display) -> Self {
        // Full detail goes to the log, never to the client.
        tracing::error!(%detail, "internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "GENERATION_ERROR",
            message: "internal error".to_string(),
            extras: Value::Null,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = extras;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Maps an engine error onto the envelope, carrying the external job id
    /// for cancellations.
    pub fn from_engine(error: EngineError, external_job_id: Option<&str>) -> Self {
        match error {
            EngineError::Cancelled => Self::aborted(external_job_id),
            EngineError::InvalidSchema { reason } | EngineError::InvalidRequest { reason } => {
                Self::validation(reason)
            }
            EngineError::Generation { reason } => Self::generation(reason),
            EngineError::ChannelError { context } => Self::generation(context),
            EngineError::ServiceShutdown => Self::generation("service is shutting down"),
            other => Self::internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let (Some(error), Value::Object(extras)) = (error.as_object_mut(), self.extras) {
            for (key, value) in extras {
                error.insert(key, value);
            }
        }
        let body = json!({
            "success": false,
            "error": error,
            "requestId": self.request_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_cancellation_maps_to_499_with_job_id() {
        let err = ApiError::from_engine(EngineError::Cancelled, Some("job-9"));
        assert_eq!(err.status().as_u16(), 499);
        assert_eq!(err.code(), "JOB_ABORTED");
    }

    #[test]
    fn invalid_schema_maps_to_400() {
        let err = ApiError::from_engine(
            EngineError::InvalidSchema {
                reason: "bad".to_string(),
            },
            None,
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
