//! `Mirror`: runs every configured stream plus one refresh sweeper per chain.
//!
//! All streams share one store, one set of entity locks and one event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use chainmirror_core::{CursorStore, MarketStore, MirrorError, MirrorEvent, TokenKey};
use chainmirror_evm::{ChainReader, LogScanner, RpcChainReader};
use chainmirror_rpc::{HttpTransport, RpcTransport};

use crate::config::MirrorConfig;
use crate::pipeline::{EventPipeline, MirrorContext};
use crate::sweep::RefreshSweeper;
use crate::sync_loop::SyncLoop;

pub struct Mirror {
    config: MirrorConfig,
    ctx: MirrorContext,
    cursors: Arc<dyn CursorStore>,
    transports: HashMap<String, Arc<dyn RpcTransport>>,
}

/// Running mirror tasks.
pub struct MirrorHandle {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl MirrorHandle {
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Wait for every task to stop.
    pub async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = %name, error = %e, "mirror task panicked");
            }
        }
    }
}

impl Mirror {
    pub fn new(config: MirrorConfig, store: Arc<dyn MarketStore>, cursors: Arc<dyn CursorStore>) -> Self {
        let events = chainmirror_core::EventBus::new(config.event_capacity);
        Self {
            ctx: MirrorContext::new(store).with_events(events),
            config,
            cursors,
            transports: HashMap::new(),
        }
    }

    /// Use `transport` for a stream instead of building an HTTP client from
    /// its `rpc_url`.
    pub fn with_transport(mut self, stream_id: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        self.transports.insert(stream_id.into(), transport);
        self
    }

    pub fn context(&self) -> &MirrorContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.ctx.events.subscribe()
    }

    /// Build every stream and spawn its task. Nothing is spawned if any
    /// stream fails to build.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Result<MirrorHandle, MirrorError> {
        self.config.validate()?;

        let mut loops = Vec::new();
        let mut sweepers = Vec::new();
        let mut queues: HashMap<String, mpsc::UnboundedSender<TokenKey>> = HashMap::new();

        for stream in &self.config.streams {
            let transport: Arc<dyn RpcTransport> = match self.transports.get(&stream.id) {
                Some(transport) => transport.clone(),
                None => Arc::new(
                    HttpTransport::new(stream.rpc_url.clone(), stream.http_config())
                        .map_err(|e| MirrorError::Config(format!("stream {}: {e}", stream.id)))?,
                ),
            };
            let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::new(transport.clone()));
            let pipeline = EventPipeline::new(&self.ctx, chain, stream);

            let queue = match queues.get(&stream.chain) {
                Some(tx) => tx.clone(),
                None => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let sweeper = RefreshSweeper::new(
                        stream.chain.clone(),
                        self.ctx.store.clone(),
                        pipeline.reconciler(),
                        &self.config.refresh,
                    )
                    .with_queue(rx);
                    sweepers.push((stream.chain.clone(), sweeper));
                    queues.insert(stream.chain.clone(), tx.clone());
                    tx
                }
            };

            let scanner = LogScanner::new(transport, stream.provider.range_hint())
                .with_max_narrowing_steps(stream.max_narrowing_steps);
            loops.push(SyncLoop::new(
                stream.clone(),
                scanner,
                Arc::new(pipeline.with_refresh_queue(queue)),
                self.ctx.store.clone(),
                self.cursors.clone(),
            ));
        }

        let interval = Duration::from_millis(self.config.refresh.interval_ms);
        let mut tasks = Vec::with_capacity(loops.len() + sweepers.len());
        for sync in loops {
            let name = format!("stream:{}", sync.stream_id());
            tasks.push((name, tokio::spawn(sync.run(shutdown.clone()))));
        }
        for (chain, sweeper) in sweepers {
            tasks.push((format!("sweeper:{chain}"), tokio::spawn(sweeper.run(interval, shutdown.clone()))));
        }
        info!(tasks = tasks.len(), "mirror started");
        Ok(MirrorHandle { tasks })
    }
}
