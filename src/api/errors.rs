use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{
    sensors::{InvalidRange, ReaderError},
    startup_time::StoreError,
};

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.error);
        if self.status.is_server_error() {
            error!(status = %self.status, error = %message, "Request failed");
        }
        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        let error = e.into();
        let status = status_for(&error);
        Self { status, error }
    }
}

fn status_for(error: &anyhow::Error) -> StatusCode {
    if error.is::<InvalidRange>() {
        return StatusCode::BAD_REQUEST;
    }
    match error.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound) => return StatusCode::NOT_FOUND,
        Some(_) => return StatusCode::INTERNAL_SERVER_ERROR,
        None => {}
    }
    match error.downcast_ref::<ReaderError>() {
        Some(ReaderError::Cancelled) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
