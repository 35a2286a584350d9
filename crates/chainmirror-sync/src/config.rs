//! Mirror and stream configuration.
//!
//! Loaded from JSON by the CLI or assembled with
//! [`StreamBuilder`](crate::builder::StreamBuilder). Every field except the
//! stream identity has a default.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use chainmirror_core::{Address, MirrorError, TokenStandard};
use chainmirror_evm::EventSignature;
use chainmirror_rpc::{HttpConfig, ProviderProfile};

/// How a scan window's events are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One event at a time, in block order.
    #[default]
    Inline,
    /// Events are grouped by token; groups run concurrently, each in block
    /// order. The window completes when every group has finished.
    Queued { workers: usize },
}

/// Marketplace settlement contracts on a stream's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// The exchange itself (orders are validated against it).
    #[serde(default)]
    pub exchange: Option<Address>,
    /// Wrapper that forwards fulfillments and holds tokens in transit.
    #[serde(default)]
    pub reward_wrapper: Option<Address>,
    /// Third-party router whose settlements are matched via `OrderFulfilled` logs.
    #[serde(default)]
    pub aggregator: Option<Address>,
}

impl ExchangeConfig {
    /// Whether a transaction sent to `to` may settle a marketplace order.
    pub fn is_settlement_target(&self, to: Address) -> bool {
        [self.exchange, self.reward_wrapper, self.aggregator].contains(&Some(to))
    }

    pub fn is_aggregator(&self, to: Address) -> bool {
        self.aggregator == Some(to)
    }
}

/// Origin-side bridge settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Tokens sent here are in transit to the destination chain.
    #[serde(default)]
    pub boundary: Option<Address>,
}

/// Configuration of one logical event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Cursor key, e.g. `"optimism-erc721"`.
    pub id: String,
    /// Chain slug; approved contracts on this chain are scanned.
    pub chain: String,
    pub rpc_url: String,
    #[serde(default)]
    pub provider: ProviderProfile,
    /// Transport override; defaults to the provider profile's settings.
    #[serde(default)]
    pub http: Option<HttpConfig>,
    /// Restrict the stream to one token standard (`None` scans both).
    #[serde(default)]
    pub standard: Option<TokenStandard>,
    #[serde(default)]
    pub start_block: u64,
    /// Blocks per scan window.
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    /// Blocks behind head before a block is scanned.
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_narrowing_steps")]
    pub max_narrowing_steps: u32,
    /// Delay before the single retry of a transaction the node has not seen.
    #[serde(default = "default_tx_retry_delay_ms")]
    pub tx_retry_delay_ms: u64,
    /// Failed passes after which an event is skipped.
    #[serde(default = "default_max_event_attempts")]
    pub max_event_attempts: u32,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

fn default_window_size() -> u64 { 2_000 }
fn default_poll_interval_ms() -> u64 { 5_000 }
fn default_max_narrowing_steps() -> u32 { chainmirror_evm::scanner::DEFAULT_MAX_NARROWING_STEPS }
fn default_tx_retry_delay_ms() -> u64 { 2_000 }
fn default_max_event_attempts() -> u32 { 5 }

impl StreamConfig {
    /// A stream with default tuning.
    pub fn new(id: impl Into<String>, chain: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chain: chain.into(),
            rpc_url: rpc_url.into(),
            provider: ProviderProfile::default(),
            http: None,
            standard: None,
            start_block: 0,
            window_size: default_window_size(),
            confirmations: 0,
            poll_interval_ms: default_poll_interval_ms(),
            max_narrowing_steps: default_max_narrowing_steps(),
            tx_retry_delay_ms: default_tx_retry_delay_ms(),
            max_event_attempts: default_max_event_attempts(),
            execution: ExecutionMode::default(),
            exchange: ExchangeConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }

    /// topic0 values the stream filters on.
    pub fn topics(&self) -> Vec<chainmirror_core::B256> {
        EventSignature::for_standard(self.standard)
            .into_iter()
            .map(EventSignature::topic)
            .collect()
    }

    pub fn http_config(&self) -> HttpConfig {
        self.http.clone().unwrap_or_else(|| self.provider.http_config())
    }
}

/// Background order refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub interval_ms: u64,
    /// Every n-th sweep verifies orders against the chain.
    #[serde(default = "default_full_refresh_every")]
    pub full_refresh_every: u64,
}

fn default_refresh_interval_ms() -> u64 { 60_000 }
fn default_full_refresh_every() -> u64 { 10 }

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_refresh_interval_ms(),
            full_refresh_every: default_full_refresh_every(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Broadcast capacity of the downstream event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize { 1_024 }

impl MirrorConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reject configurations the mirror cannot run.
    pub fn validate(&self) -> Result<(), MirrorError> {
        if self.streams.is_empty() {
            return Err(MirrorError::Config("no streams configured".into()));
        }
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.id.as_str()) {
                return Err(MirrorError::Config(format!("duplicate stream id {}", stream.id)));
            }
            if stream.window_size == 0 {
                return Err(MirrorError::Config(format!("stream {}: window_size must be positive", stream.id)));
            }
            if stream.execution == (ExecutionMode::Queued { workers: 0 }) {
                return Err(MirrorError::Config(format!("stream {}: queued mode needs workers", stream.id)));
            }
        }
        Ok(())
    }
}
