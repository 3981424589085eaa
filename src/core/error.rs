// Centralized error handling for seedhub

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use reqwest::header::HeaderMap;
use serde::Serialize;
use thiserror::Error;

use crate::transport::http::ResponseBody;

/// A non-success HTTP reply, kept whole so adapters can inspect it
#[derive(Debug, Clone)]
pub struct HttpError {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} {}", self.status, self.status_text)
    }
}

impl std::error::Error for HttpError {}

/// Errors raised by the HTTP transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Http(HttpError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// HTTP status of the reply, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http(e) => Some(e.status),
            _ => None,
        }
    }
}

/// Errors surfaced by torrent client adapters
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("RPC fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid server configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }

    /// HTTP status of an underlying transport failure
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// Errors raised by the credential vault
///
/// Every cryptographic failure collapses into `InvalidPassword` so callers
/// cannot tell a wrong passphrase from a damaged record.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault is not initialized")]
    NotInitialized,

    #[error("Vault is already initialized")]
    AlreadyInitialized,

    #[error("Vault is locked")]
    Locked,

    #[error("Invalid password or corrupted data")]
    InvalidPassword,

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("Vault storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Failed to serialize vault contents: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store contents are not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors raised while applying a patch list
#[derive(Error, Debug, PartialEq)]
pub enum PatchError {
    #[error("Invalid patch path: {0}")]
    InvalidPath(String),

    #[error("Patch index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Unknown task field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {path}: {reason}")]
    InvalidValue { path: String, reason: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Errors returned by the HTTP read API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unknown server: {0}")]
    ServerNotFound(String),

    #[error("No snapshot yet for server: {0}")]
    NoSnapshot(String),

    #[error("Unknown endpoint: {0}")]
    UnknownRoute(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::ServerNotFound(_) | ApiError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ApiError::NoSnapshot(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
