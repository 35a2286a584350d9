//! Provider profiles and "range too large" hint parsing.
//!
//! Log queries over wide block ranges are rejected by hosted providers with an
//! error that names a narrower range that would succeed. The format is
//! provider-specific, so parsing sits behind [`RangeHint`].

use serde::{Deserialize, Serialize};

use crate::http::HttpConfig;
use crate::policy::{RateLimitConfig, RetryConfig};
use crate::request::JsonRpcError;

/// Extracts the suggested end block from a "range too large" error.
pub trait RangeHint: Send + Sync {
    /// `Some(end)` if `error` is a range rejection naming `end` as the last
    /// block a narrower query may cover.
    fn suggested_end(&self, error: &JsonRpcError) -> Option<u64>;
}

/// Alchemy's format: `"... this block range should work: [0x1, 0x2a]"`.
///
/// Takes the text after the first `[`, splits it on `,`, keeps the second
/// element, drops its final character (the `]`) and trims whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlchemyRangeHint;

impl RangeHint for AlchemyRangeHint {
    fn suggested_end(&self, error: &JsonRpcError) -> Option<u64> {
        let after_bracket = error.message.split('[').nth(1)?;
        let second = after_bracket.split(',').nth(1)?;
        let mut chars = second.chars();
        chars.next_back()?;
        parse_block_number(chars.as_str().trim())
    }
}

/// For providers that never suggest a range.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRangeHint;

impl RangeHint for NoRangeHint {
    fn suggested_end(&self, _error: &JsonRpcError) -> Option<u64> {
        None
    }
}

fn parse_block_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Named provider presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderProfile {
    #[default]
    Alchemy,
    Generic,
}

/// Alchemy free tier throughput, in compute units per second.
pub const ALCHEMY_FREE_TIER_CU_PER_SEC: f64 = 300.0;

/// Compute units charged for an `eth_getLogs`-class call.
const ALCHEMY_LOGS_CU: f64 = 75.0;

impl ProviderProfile {
    pub fn range_hint(self) -> Box<dyn RangeHint> {
        match self {
            Self::Alchemy => Box::new(AlchemyRangeHint),
            Self::Generic => Box::new(NoRangeHint),
        }
    }

    /// Transport defaults tuned for the provider.
    pub fn http_config(self) -> HttpConfig {
        match self {
            Self::Alchemy => HttpConfig {
                retry: RetryConfig {
                    max_retries: 3,
                    initial_backoff_ms: 200,
                    max_backoff_ms: 5_000,
                    jitter: true,
                },
                rate_limit: RateLimitConfig {
                    capacity: ALCHEMY_FREE_TIER_CU_PER_SEC / ALCHEMY_LOGS_CU * 4.0,
                    refill_per_sec: ALCHEMY_FREE_TIER_CU_PER_SEC / ALCHEMY_LOGS_CU * 4.0,
                },
                request_timeout_ms: 30_000,
            },
            Self::Generic => HttpConfig::default(),
        }
    }
}

/// Alchemy HTTP endpoint for a chain id.
pub fn alchemy_url(api_key: &str, chain_id: u64) -> String {
    let network = match chain_id {
        1 => "eth-mainnet",
        5 => "eth-goerli",
        11155111 => "eth-sepolia",
        10 => "opt-mainnet",
        420 => "opt-goerli",
        11155420 => "opt-sepolia",
        8453 => "base-mainnet",
        _ => "eth-mainnet",
    };
    format!("https://{network}.g.alchemy.com/v2/{api_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(message: &str) -> JsonRpcError {
        JsonRpcError::new(-32602, message)
    }

    #[test]
    fn alchemy_hint_hex() {
        let e = err("Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range and no limit on the response size, or you can request any block range with a cap of 10K logs in the response. Based on your parameters, this block range should work: [0x1, 0x2a]");
        assert_eq!(AlchemyRangeHint.suggested_end(&e), Some(0x2a));
    }

    #[test]
    fn alchemy_hint_decimal_and_spacing() {
        assert_eq!(AlchemyRangeHint.suggested_end(&err("try [100,  250]")), Some(250));
    }

    #[test]
    fn alchemy_hint_absent() {
        assert_eq!(AlchemyRangeHint.suggested_end(&err("execution reverted")), None);
        assert_eq!(AlchemyRangeHint.suggested_end(&err("range [0x1]")), None);
        assert_eq!(NoRangeHint.suggested_end(&err("should work: [0x1, 0x2a]")), None);
    }

    #[test]
    fn profiles() {
        assert_eq!(
            alchemy_url("key", 10),
            "https://opt-mainnet.g.alchemy.com/v2/key"
        );
        let cfg = ProviderProfile::Alchemy.http_config();
        assert!(cfg.rate_limit.capacity > 1.0);
        let parsed: ProviderProfile = serde_json::from_str("\"generic\"").unwrap();
        assert_eq!(parsed, ProviderProfile::Generic);
    }
}
