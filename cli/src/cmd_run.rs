//! `chainmirror run`: load a config file and mirror until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};

use chainmirror_core::{BridgeLink, ContractInfo, CursorStore, MarketStore};
use chainmirror_storage::{InMemoryMarketStore, MemoryCursorStore};
use chainmirror_sync::{Mirror, MirrorConfig};

use crate::logging::{init_tracing, LogConfig};

/// Prefix of the per-stream RPC URL override, e.g. `CHAINMIRROR_RPC_OPTIMISM_721`.
const RPC_ENV_PREFIX: &str = "CHAINMIRROR_RPC_";

/// Contents of a run config file.
#[derive(Debug, Deserialize)]
pub struct RunFile {
    #[serde(flatten)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Contracts registered with the market store before streams start.
    #[serde(default)]
    pub contracts: Vec<ContractInfo>,
    #[serde(default)]
    pub bridge_links: Vec<BridgeLink>,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config file '{}'", path.display()))
    }

    /// Replace stream RPC URLs from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut overridden = Vec::new();
        for stream in &mut self.mirror.streams {
            let var = rpc_env_var(&stream.id);
            if let Some(url) = lookup(&var) {
                stream.rpc_url = url;
                overridden.push(stream.id.clone());
            }
        }
        overridden
    }
}

pub fn rpc_env_var(stream_id: &str) -> String {
    let suffix: String = stream_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{RPC_ENV_PREFIX}{suffix}")
}

pub async fn run(config: &Path, db: Option<&str>, verbose: bool, print_events: bool) -> Result<()> {
    let mut file = RunFile::load(config)?;
    if verbose {
        file.log.level = "debug".into();
    }
    init_tracing(&file.log);

    let overridden = file.apply_env(|var| std::env::var(var).ok());
    for stream in &overridden {
        info!(stream = %stream, "rpc url taken from environment");
    }
    file.mirror.validate()?;

    let store = Arc::new(InMemoryMarketStore::new());
    for contract in file.contracts {
        debug!(contract = %contract.address, chain = %contract.chain, "contract registered");
        store.upsert_contract(contract).await?;
    }
    for link in file.bridge_links {
        store.add_bridge_link(link).await?;
    }

    let cursors = open_cursors(db).await?;
    let mirror = Mirror::new(file.mirror, store, cursors);

    if print_events {
        let mut events = mirror.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = mirror.start(shutdown_rx)?;
    info!(tasks = ?handle.task_names(), "mirror running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("listen for Ctrl-C")?;
    info!("shutdown requested, finishing current windows");
    shutdown_tx.send(true).ok();
    handle.join().await;
    info!("mirror stopped");
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_cursors(db: Option<&str>) -> Result<Arc<dyn CursorStore>> {
    match db {
        Some(path) => {
            let store = chainmirror_storage::SqliteCursorStore::open(path)
                .await
                .with_context(|| format!("open cursor database '{path}'"))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryCursorStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
async fn open_cursors(db: Option<&str>) -> Result<Arc<dyn CursorStore>> {
    if db.is_some() {
        anyhow::bail!("--db requires building with the `sqlite` feature");
    }
    Ok(Arc::new(MemoryCursorStore::new()))
}
