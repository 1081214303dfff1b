// SPDX-License-Identifier: Apache-2.0, MIT

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the core business-logic components.
///
/// Repository failures are wrapped in [`GatewayError::Repo`] so callers never
/// see the storage engine's own error type; see the repository-abstraction
/// design note for why that boundary matters.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("no available nodes")]
    NoAvailableNodes,
}

/// Errors from the repository layer, kept free of any particular storage
/// engine's type vocabulary (see `DESIGN.md`).
#[derive(Debug, thiserror::Error, Clone)]
pub enum RepoError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("not found")]
    NotFound,
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Backend(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Repo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NotWhitelisted(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidToken => StatusCode::UNAUTHORIZED,
            GatewayError::NoAvailableNodes => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
