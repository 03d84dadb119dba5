//! HTTP mapping for [`StoreError`] and extractors that reject with it.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::StoreError;

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::EmptyCart | Self::InvalidAmount | Self::InvalidTransition(_) | Self::InvalidSignature(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let message = match &self {
            Self::Storage(_) | Self::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for StoreError {
    fn from(rejection: JsonRejection) -> Self { Self::Validation(rejection.body_text()) }
}

impl From<PathRejection> for StoreError {
    fn from(rejection: PathRejection) -> Self { Self::Validation(rejection.body_text()) }
}

impl From<QueryRejection> for StoreError {
    fn from(rejection: QueryRejection) -> Self { Self::Validation(rejection.body_text()) }
}

/// `axum::Json` that rejects malformed bodies with a 400 `{"error"}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(StoreError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(StoreError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(StoreError))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(StoreError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(StoreError::InvalidSignature("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(StoreError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(StoreError::Upstream("timeout".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(StoreError::PaymentsDisabled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(StoreError::Storage(sqlx::Error::PoolTimedOut).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_storage_details_are_hidden() {
        let response = StoreError::Storage(sqlx::Error::PoolTimedOut).into_response();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }
}
