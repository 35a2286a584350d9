//! Raw EVM logs as returned by `eth_getFilterLogs` and receipts.

use std::str::FromStr;

use chainmirror_core::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn block_number_u64(&self) -> u64 {
        self.block_number.as_deref().and_then(parse_hex_u64).unwrap_or(0)
    }

    pub fn log_index_u32(&self) -> u32 {
        self.log_index.as_deref().and_then(parse_hex_u64).unwrap_or(0) as u32
    }

    /// Sort key inside a block range.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number_u64(), self.log_index_u32())
    }

    pub fn emitter(&self) -> Result<Address, DecodeError> {
        Address::from_str(&self.address).map_err(|e| DecodeError::InvalidHex {
            field: "address",
            reason: e.to_string(),
        })
    }

    pub fn topic(&self, index: usize) -> Result<B256, DecodeError> {
        let raw = self
            .topics
            .get(index)
            .ok_or(DecodeError::MissingTopic { index })?;
        B256::from_str(raw).map_err(|e| DecodeError::InvalidHex {
            field: "topic",
            reason: e.to_string(),
        })
    }

    /// An indexed address argument stored in topic `index`.
    pub fn topic_address(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(Address::from_word(self.topic(index)?))
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        decode_hex(&self.data, "data")
    }

    pub fn transaction_hash(&self) -> Result<B256, DecodeError> {
        let raw = self.tx_hash.as_deref().unwrap_or_default();
        B256::from_str(raw).map_err(|e| DecodeError::InvalidHex {
            field: "transactionHash",
            reason: e.to_string(),
        })
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

pub fn decode_hex(s: &str, field: &'static str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| DecodeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_filter_log() {
        let log: RawLog = serde_json::from_str(
            r#"{
                "address": "0x1111111111111111111111111111111111111111",
                "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                           "0x0000000000000000000000002222222222222222222222222222222222222222"],
                "data": "0x",
                "blockNumber": "0x1b4",
                "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
                "logIndex": "0x3",
                "removed": false
            }"#,
        )
        .unwrap();
        assert_eq!(log.position(), (436, 3));
        assert_eq!(log.topic_address(1).unwrap(), Address::repeat_byte(0x22));
        assert!(log.data_bytes().unwrap().is_empty());
        assert_eq!(log.transaction_hash().unwrap(), B256::repeat_byte(1));
        assert!(matches!(log.topic(2), Err(DecodeError::MissingTopic { index: 2 })));
    }

    #[test]
    fn hex_quantities() {
        assert_eq!(parse_hex_u64("0x2a"), Some(42));
        assert_eq!(parse_hex_u64("0x"), Some(0));
        assert_eq!(parse_hex_u64("zz"), None);
    }
}
