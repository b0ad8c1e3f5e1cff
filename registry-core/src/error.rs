use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Status used when the caller went away before the work finished.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Unprocessable(anyhow::Error),

    #[error("{0}")]
    BadRequest(anyhow::Error),

    #[error("{0}")]
    NotFound(anyhow::Error),

    #[error("{0}")]
    Conflict(anyhow::Error),

    #[error("{0}")]
    NotImplemented(anyhow::Error),

    #[error("{0}")]
    InternalError(#[from] anyhow::Error),

    #[error("{0}")]
    BadGateway(String),

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("request canceled")]
    Canceled,

    #[error("{0}")]
    DatabaseError(anyhow::Error),

    #[error("{0}")]
    StorageError(anyhow::Error),

    #[error("{0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::Unprocessable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AppError::Canceled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::StorageError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Wire shape of every failed request: `{"code": 404, "message": "Not Found - module not found"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = ?self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let prefix = status.canonical_reason().unwrap_or(match status.as_u16() {
            CLIENT_CLOSED_REQUEST => "Client Closed Request",
            _ => "Error",
        });

        // Backend detail stays in the log line above.
        let detail = match &self {
            AppError::ValidationError(errors) => validation_summary(errors),
            AppError::DatabaseError(_) => "database error".to_string(),
            AppError::StorageError(_) => "storage error".to_string(),
            AppError::ConfigError(_) => "configuration error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            message: format!("{} - {}", prefix, detail),
        };

        (status, Json(body)).into_response()
    }
}

fn validation_summary(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    messages.sort();
    messages.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Payload {
        #[validate(length(min = 1, message = "name is required"))]
        name: String,
    }

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_found_uses_prefixed_message() {
        let (status, body) =
            body_of(AppError::NotFound(anyhow::anyhow!("module not found"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
        assert_eq!(body["message"], "Not Found - module not found");
    }

    #[tokio::test]
    async fn validation_errors_surface_field_messages() {
        let err = Payload {
            name: String::new(),
        }
        .validate()
        .unwrap_err();
        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "Unprocessable Entity - name is required");
    }

    #[tokio::test]
    async fn database_detail_is_not_echoed() {
        let (status, body) = body_of(AppError::DatabaseError(anyhow::anyhow!(
            "connection refused at 10.0.0.3:5432"
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal Server Error - database error");
    }

    #[tokio::test]
    async fn canceled_maps_to_client_closed_request() {
        let (status, body) = body_of(AppError::Canceled).await;
        assert_eq!(status.as_u16(), 499);
        assert_eq!(body["message"], "Client Closed Request - request canceled");
    }

    #[tokio::test]
    async fn deadline_maps_to_gateway_timeout() {
        let (status, _) = body_of(AppError::DeadlineExceeded).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
