use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] kinema_core::Error),

    #[error("{0}")]
    Internal(String),
}

// No structured error schema; anything that goes wrong is a generic 500
// carrying the error's display text.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("request failed: {self}");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
