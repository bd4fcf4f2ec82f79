use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use photodrop_common::ErrorBody;
use thiserror::Error;

use crate::storage::StorageError;

pub const NO_PHOTO_UPLOADED: &str = "No photo uploaded";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn no_photo() -> Self {
        Self::Validation(NO_PHOTO_UPLOADED.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => {
                tracing::debug!(error = %self, "rejected upload");
                (StatusCode::BAD_REQUEST, message.clone())
            }
            ApiError::Multipart(e) => {
                tracing::warn!(error = %e, "failed to read multipart body");
                (e.status(), self.to_string())
            }
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "failed to store photo");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to store photo".to_string(),
                )
            }
        };

        (status, Json(ErrorBody::new(message))).into_response()
    }
}
