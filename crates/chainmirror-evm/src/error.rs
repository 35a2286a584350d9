//! Decode errors for logs and calldata.

use chainmirror_core::MirrorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// topic0 is not one of the mirrored transfer events.
    #[error("Unrecognized event with topic0 {topic0}")]
    UnrecognizedEvent { topic0: String },

    #[error("Missing topic {index}")]
    MissingTopic { index: usize },

    #[error("Invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("ABI decode failed: {reason}")]
    AbiDecodeFailed { reason: String },

    #[error("Batch length mismatch: {ids} ids, {values} values")]
    BatchLengthMismatch { ids: usize, values: usize },

    /// Calldata selector is not an exchange fulfillment function.
    #[error("Unknown function selector 0x{selector}")]
    UnknownSelector { selector: String },
}

impl From<DecodeError> for MirrorError {
    fn from(e: DecodeError) -> Self {
        MirrorError::Decode(e.to_string())
    }
}
