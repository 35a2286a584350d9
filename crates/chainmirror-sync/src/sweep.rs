//! Background order refresh.
//!
//! Transfers only refresh the orders of the tokens they touch. The sweeper
//! covers what time alone changes: orders that expired and dutch auctions
//! whose price moved. Every `full_refresh_every` sweeps it also verifies all
//! open orders (active or inactive) against the exchange, and it drains the
//! queue of tokens the resolver discovered. A queued token whose refresh fails
//! stays queued for up to `MAX_QUEUED_ATTEMPTS` sweeps.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use chainmirror_core::{Address, MarketStore, MirrorError, OrderKind, TokenKey};

use crate::config::RefreshConfig;
use crate::reconciler::{Reconciler, RefreshDepth};

/// Sweeps a queued token is retried on before it is left to full sweeps.
pub const MAX_QUEUED_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub full: bool,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct RefreshSweeper {
    chain: String,
    store: Arc<dyn MarketStore>,
    reconciler: Arc<Reconciler>,
    queue: Option<mpsc::UnboundedReceiver<TokenKey>>,
    /// Queued tokens whose refresh failed, with their failed attempts.
    requeued: HashMap<TokenKey, u32>,
    full_refresh_every: u64,
    sweeps: u64,
}

impl RefreshSweeper {
    pub fn new(
        chain: impl Into<String>,
        store: Arc<dyn MarketStore>,
        reconciler: Arc<Reconciler>,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            chain: chain.into(),
            store,
            reconciler,
            queue: None,
            requeued: HashMap::new(),
            full_refresh_every: config.full_refresh_every.max(1),
            sweeps: 0,
        }
    }

    /// Tokens received here get a full refresh on the next sweep.
    pub fn with_queue(mut self, queue: mpsc::UnboundedReceiver<TokenKey>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(chain = %self.chain, interval_ms = interval.as_millis() as u64, "refresh sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            match self.sweep(Utc::now()).await {
                Ok(report) if report.refreshed > 0 || report.failed > 0 => {
                    info!(chain = %self.chain, full = report.full, refreshed = report.refreshed, failed = report.failed, "sweep complete");
                }
                Ok(_) => {}
                Err(e) => warn!(chain = %self.chain, error = %e, "sweep failed"),
            }
        }
        info!(chain = %self.chain, "refresh sweeper stopped");
    }

    /// Run one sweep at time `now`.
    pub async fn sweep(&mut self, now: DateTime<Utc>) -> Result<SweepReport, MirrorError> {
        self.sweeps += 1;
        let full = self.sweeps % self.full_refresh_every == 0;
        let mut report = SweepReport { full, ..SweepReport::default() };

        let mut queued: BTreeSet<TokenKey> = self.requeued.keys().copied().collect();
        if let Some(queue) = &mut self.queue {
            while let Ok(key) = queue.try_recv() {
                queued.insert(key);
            }
        }

        let mut on_chain: HashMap<Address, bool> = HashMap::new();
        let mut due = BTreeSet::new();
        for order in self.store.open_orders().await? {
            let contract = order.token.contract;
            let ours = match on_chain.get(&contract) {
                Some(ours) => *ours,
                None => {
                    let ours = self
                        .store
                        .contract(contract)
                        .await?
                        .is_some_and(|c| c.chain == self.chain);
                    on_chain.insert(contract, ours);
                    ours
                }
            };
            if !ours {
                continue;
            }
            let time_sensitive = order.status.is_active()
                && (order.is_expired(now) || order.kind == OrderKind::DutchAuction);
            if full || time_sensitive {
                due.insert(order.token);
            }
        }

        for key in queued {
            due.remove(&key);
            if self.refresh(key, RefreshDepth::Full, now, &mut report).await {
                self.requeued.remove(&key);
                continue;
            }
            let attempts = self.requeued.entry(key).or_default();
            *attempts += 1;
            if *attempts >= MAX_QUEUED_ATTEMPTS {
                warn!(token = %key, attempts = *attempts, "dropping queued token, left to full sweeps");
                self.requeued.remove(&key);
            }
        }
        let depth = if full { RefreshDepth::Full } else { RefreshDepth::Soft };
        for key in due {
            self.refresh(key, depth, now, &mut report).await;
        }
        Ok(report)
    }

    async fn refresh(&self, key: TokenKey, depth: RefreshDepth, now: DateTime<Utc>, report: &mut SweepReport) -> bool {
        match self.reconciler.refresh_token(key, depth, now).await {
            Ok(()) => {
                debug!(token = %key, ?depth, "token swept");
                report.refreshed += 1;
                true
            }
            Err(e) => {
                warn!(token = %key, error = %e, "token refresh failed");
                report.failed += 1;
                false
            }
        }
    }

    /// Queued tokens waiting for another attempt.
    pub fn pending_retries(&self) -> usize {
        self.requeued.len()
    }
}
