use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Short label used for the failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Grammar(_) => "grammar",
            BridgeError::Decode(_) => "decode",
            BridgeError::Transport(_) => "transport",
            BridgeError::Serialization(_) => "serialization",
            BridgeError::Config(_) => "config",
            BridgeError::Credential(_) => "credential",
            BridgeError::NotFound(_) => "not_found",
            BridgeError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<prometheus::Error> for BridgeError {
    fn from(err: prometheus::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match self {
            BridgeError::Grammar(_) | BridgeError::Config(_) => StatusCode::BAD_REQUEST,
            BridgeError::Decode(_) | BridgeError::Transport(_) => StatusCode::BAD_GATEWAY,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Serialization(_)
            | BridgeError::Credential(_)
            | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
