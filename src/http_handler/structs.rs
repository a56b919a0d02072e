use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::RootedAccess;
use crate::config::Config;
use crate::error::RelayError;
use crate::pack::PackRelay;

/// Shared by every request; read-only.
#[derive(Debug, Clone)]
pub struct HttpState {
    pub relay: Arc<PackRelay>,
    pub repos: RootedAccess,
    pub body_timeout: Duration,
}

impl HttpState {
    pub fn new(relay: Arc<PackRelay>, repos: RootedAccess, body_timeout: Duration) -> Self {
        Self {
            relay,
            repos,
            body_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(config.relay()),
            RootedAccess::new(&config.repo_root),
            config.body_timeout(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("repository not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("pack exchange timed out")]
    Timeout,
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            HttpError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            HttpError::Relay(RelayError::InvalidService(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            HttpError::Relay(err) if err.is_invocation() => {
                tracing::error!(error = %err, "pack backend could not be started");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "pack backend unavailable".to_string(),
                )
            }
            HttpError::Relay(err) => {
                tracing::warn!(error = %err, "pack relay failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "pack backend failed".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
