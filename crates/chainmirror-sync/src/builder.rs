//! Fluent builder for [`StreamConfig`].
//!
//! ```rust
//! use chainmirror_sync::{ExecutionMode, StreamBuilder};
//!
//! let config = StreamBuilder::new("optimism-erc721", "optimism", "https://opt-mainnet.example/v2/key")
//!     .start_block(110_000_000)
//!     .window_size(500)
//!     .execution(ExecutionMode::Queued { workers: 8 })
//!     .build_config();
//! assert_eq!(config.window_size, 500);
//! ```

use chainmirror_core::{Address, TokenStandard};
use chainmirror_rpc::{HttpConfig, ProviderProfile};

use crate::config::{ExecutionMode, StreamConfig};

pub struct StreamBuilder {
    config: StreamConfig,
}

impl StreamBuilder {
    pub fn new(id: impl Into<String>, chain: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            config: StreamConfig::new(id, chain, rpc_url),
        }
    }

    pub fn provider(mut self, provider: ProviderProfile) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn http(mut self, http: HttpConfig) -> Self {
        self.config.http = Some(http);
        self
    }

    /// Only scan contracts of this standard.
    pub fn standard(mut self, standard: TokenStandard) -> Self {
        self.config.standard = Some(standard);
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn window_size(mut self, blocks: u64) -> Self {
        self.config.window_size = blocks;
        self
    }

    pub fn confirmations(mut self, blocks: u64) -> Self {
        self.config.confirmations = blocks;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_narrowing_steps(mut self, steps: u32) -> Self {
        self.config.max_narrowing_steps = steps;
        self
    }

    pub fn tx_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.tx_retry_delay_ms = ms;
        self
    }

    pub fn max_event_attempts(mut self, attempts: u32) -> Self {
        self.config.max_event_attempts = attempts;
        self
    }

    pub fn execution(mut self, mode: ExecutionMode) -> Self {
        self.config.execution = mode;
        self
    }

    pub fn exchange(mut self, exchange: Address) -> Self {
        self.config.exchange.exchange = Some(exchange);
        self
    }

    pub fn reward_wrapper(mut self, wrapper: Address) -> Self {
        self.config.exchange.reward_wrapper = Some(wrapper);
        self
    }

    pub fn aggregator(mut self, aggregator: Address) -> Self {
        self.config.exchange.aggregator = Some(aggregator);
        self
    }

    /// Address that holds tokens in transit to the destination chain.
    pub fn bridge_boundary(mut self, boundary: Address) -> Self {
        self.config.bridge.boundary = Some(boundary);
        self
    }

    pub fn build_config(self) -> StreamConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = StreamBuilder::new("s", "optimism", "http://localhost:8545").build_config();
        assert_eq!(cfg.window_size, 2_000);
        assert_eq!(cfg.max_event_attempts, 5);
        assert_eq!(cfg.provider, ProviderProfile::Alchemy);
        assert!(cfg.exchange.exchange.is_none());
    }

    #[test]
    fn builder_custom() {
        let exchange = Address::repeat_byte(0xee);
        let cfg = StreamBuilder::new("s", "optimism", "http://localhost:8545")
            .standard(TokenStandard::Erc1155)
            .start_block(100)
            .confirmations(3)
            .exchange(exchange)
            .bridge_boundary(Address::repeat_byte(0xbb))
            .execution(ExecutionMode::Queued { workers: 2 })
            .build_config();
        assert_eq!(cfg.start_block, 100);
        assert_eq!(cfg.confirmations, 3);
        assert_eq!(cfg.standard, Some(TokenStandard::Erc1155));
        assert!(cfg.exchange.is_settlement_target(exchange));
        assert_eq!(cfg.bridge.boundary, Some(Address::repeat_byte(0xbb)));
        assert_eq!(cfg.execution, ExecutionMode::Queued { workers: 2 });
    }
}
