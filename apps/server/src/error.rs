use std::io::Error as IoError;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use probewatch::database::QueryError;
use serde::Serialize;
use thiserror::Error;

/// Startup failures
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

/// Per-request failures
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error("storage error")]
    Store(#[source] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Store(e) = self {
            tracing::error!(error = %format!("{e:#}"), "Record query failed");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody { error: self.to_string() })
    }
}
