use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::conversion::ConversionError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Conversion(e) => match e {
                ConversionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ConversionError::UnsupportedFormat(_) | ConversionError::ParseFailure(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ConversionError::PackagingFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_input",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Conversion(e) => e.kind(),
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            AppError::BadRequest(msg) | AppError::PayloadTooLarge(msg) => msg,
            AppError::Conversion(ConversionError::PackagingFailure(msg)) => {
                tracing::error!("Packaging failed: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::Conversion(e) => {
                tracing::warn!("Conversion rejected: {}", e);
                e.to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal Server Error".to_string()
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_errors_map_to_statuses() {
        let cases = [
            (
                ConversionError::InvalidInput("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ConversionError::UnsupportedFormat("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ConversionError::ParseFailure("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ConversionError::PackagingFailure("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        use http_body_util::BodyExt;

        let response = AppError::Internal("db at /var/secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "internal");
        assert_eq!(body["error"], "Internal Server Error");
    }

    #[test]
    fn test_payload_too_large() {
        let response = AppError::PayloadTooLarge("big".into()).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
