//! Error types for the backlog gateway.

use thiserror::Error;

/// Errors that can occur when talking to the read or write model.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The server answered with a non-success status.
    #[error("remote call failed with status {status}: {body}")]
    RemoteCallFailed { status: u16, body: String },

    /// The request never produced a status (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A request or response body could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// HTTP status of a failed remote call, if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::RemoteCallFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
