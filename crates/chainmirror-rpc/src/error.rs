//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure (refused, reset, TLS).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status other than 429.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Provider answered 429 or the local bucket stayed empty.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Transient failures worth an immediate retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The node's error object, if the failure came from the node.
    pub fn rpc_error(&self) -> Option<&JsonRpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(TransportError::Timeout { ms: 30_000 }.is_retryable());
        assert!(TransportError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!TransportError::Rpc(JsonRpcError::new(-32000, "execution reverted")).is_retryable());
    }
}
