//! Error types for the chainmirror pipeline.

use thiserror::Error;

/// Errors that can occur while mirroring chain state.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Token {contract}#{token_id} does not exist on chain")]
    TokenNotFound { contract: String, token_id: String },

    #[error("Transaction {tx_hash} is not visible yet")]
    TransactionNotVisible { tx_hash: String },

    #[error("Order {order_id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        order_id: u64,
        from: String,
        to: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Returns `true` if the failed event should be retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Storage(_) | Self::TransactionNotVisible { .. } | Self::TokenNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_failures_are_retryable() {
        let err = MirrorError::TokenNotFound {
            contract: "0xabc".into(),
            token_id: "7".into(),
        };
        assert!(err.is_retryable());
        assert!(MirrorError::Rpc("timeout".into()).is_retryable());
        assert!(!MirrorError::Config("missing rpc url".into()).is_retryable());
    }

    #[test]
    fn transition_error_message() {
        let err = MirrorError::IllegalTransition {
            order_id: 3,
            from: "fulfilled".into(),
            to: "active".into(),
        };
        assert_eq!(
            err.to_string(),
            "Order 3: illegal status transition fulfilled -> active"
        );
    }
}
