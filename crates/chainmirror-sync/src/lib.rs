//! chainmirror-sync — the reconciliation engine.
//!
//! Turns decoded transfers into marketplace state: tokens, profiles, order
//! fills, order status, derived listing fields, activities and bridge state.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainmirror_storage::{InMemoryMarketStore, MemoryCursorStore};
//! use chainmirror_sync::{Mirror, MirrorConfig, StreamBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = StreamBuilder::new("op-721", "optimism", "https://opt-mainnet.example/v2/key")
//!     .start_block(110_000_000)
//!     .build_config();
//! let config = MirrorConfig { streams: vec![stream], refresh: Default::default(), event_capacity: 1024 };
//!
//! let (stop, shutdown) = tokio::sync::watch::channel(false);
//! let mirror = Mirror::new(config, Arc::new(InMemoryMarketStore::new()), Arc::new(MemoryCursorStore::new()));
//! let mut events = mirror.subscribe();
//! let handle = mirror.start(shutdown)?;
//! # let _ = (&mut events, stop);
//! handle.join().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod builder;
pub mod config;
pub mod ledger;
pub mod matcher;
pub mod mirror;
pub mod pipeline;
pub mod reconciler;
pub mod resolver;
pub mod sweep;
pub mod sync_loop;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::BridgeTracker;
pub use builder::StreamBuilder;
pub use config::{BridgeConfig, ExchangeConfig, ExecutionMode, MirrorConfig, RefreshConfig, StreamConfig};
pub use ledger::ActivityLedger;
pub use matcher::{OrderMatch, OrderMatcher};
pub use mirror::{Mirror, MirrorHandle};
pub use pipeline::{ApplyOutcome, EventPipeline, MirrorContext};
pub use reconciler::{derive_fields, Reconciler, RefreshDepth, RefreshScope};
pub use resolver::EntityResolver;
pub use sweep::{RefreshSweeper, SweepReport, MAX_QUEUED_ATTEMPTS};
pub use sync_loop::{SyncLoop, WindowReport};
