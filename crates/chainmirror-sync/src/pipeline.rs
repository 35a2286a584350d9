//! The per-event pipeline.
//!
//! ```text
//! TransferEvent
//!   → registry check → transaction fetch (one delayed retry)
//!   → reward-wrapper sender remap → timestamp (L1 first)
//!   → resolve profiles + token
//!   → match settlement to order          [order lock]
//!   → ownership, order status, derived   [token lock]
//!   → activity ledger
//!   → bridge propagation                 [counterpart token lock]
//! ```
//!
//! Every step is idempotent, so a window can be re-applied after a partial
//! failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chainmirror_core::{
    ActivityKey, Address, ClassificationInput, EntityLocks, EventBus, MarketStore, MirrorError,
    TokenKey, TokenStandard, TransferEvent,
};
use chainmirror_evm::{decode, ChainReader, TransactionInfo};

use crate::bridge::BridgeTracker;
use crate::config::{ExchangeConfig, StreamConfig};
use crate::ledger::ActivityLedger;
use crate::matcher::OrderMatcher;
use crate::reconciler::{Reconciler, RefreshDepth, RefreshScope};
use crate::resolver::EntityResolver;

/// State shared by every stream of one mirror.
#[derive(Clone)]
pub struct MirrorContext {
    pub store: Arc<dyn MarketStore>,
    pub locks: Arc<EntityLocks>,
    pub events: EventBus,
}

impl MirrorContext {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self {
            store,
            locks: Arc::new(EntityLocks::new()),
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { activity_created: bool },
    Skipped { reason: &'static str },
    /// The transaction is not visible yet; apply again on a later pass.
    Deferred,
}

pub struct EventPipeline {
    store: Arc<dyn MarketStore>,
    chain: Arc<dyn ChainReader>,
    locks: Arc<EntityLocks>,
    resolver: EntityResolver,
    matcher: OrderMatcher,
    reconciler: Arc<Reconciler>,
    ledger: ActivityLedger,
    bridge: BridgeTracker,
    exchange: ExchangeConfig,
    tx_retry_delay: Duration,
}

impl EventPipeline {
    pub fn new(ctx: &MirrorContext, chain: Arc<dyn ChainReader>, config: &StreamConfig) -> Self {
        let store = ctx.store.clone();
        let locks = ctx.locks.clone();
        Self {
            resolver: EntityResolver::new(store.clone(), chain.clone()),
            matcher: OrderMatcher::new(store.clone(), chain.clone(), locks.clone(), config.exchange.clone()),
            reconciler: Arc::new(Reconciler::new(
                store.clone(),
                chain.clone(),
                locks.clone(),
                ctx.events.clone(),
                config.exchange.exchange,
            )),
            ledger: ActivityLedger::new(store.clone(), ctx.events.clone()),
            bridge: BridgeTracker::new(store.clone(), locks.clone(), config.bridge.boundary),
            exchange: config.exchange.clone(),
            tx_retry_delay: Duration::from_millis(config.tx_retry_delay_ms),
            store,
            chain,
            locks,
        }
    }

    /// Queue newly discovered tokens for a full refresh.
    pub fn with_refresh_queue(mut self, tx: mpsc::UnboundedSender<TokenKey>) -> Self {
        self.resolver = self.resolver.with_refresh_queue(tx);
        self
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    /// Apply one transfer.
    pub async fn apply(&self, event: &TransferEvent) -> Result<ApplyOutcome, MirrorError> {
        match self.store.contract(event.contract).await? {
            Some(info) if info.approved => {}
            Some(_) => return Ok(ApplyOutcome::Skipped { reason: "contract not approved" }),
            None => return Ok(ApplyOutcome::Skipped { reason: "unknown contract" }),
        }
        if self.exchange.reward_wrapper == Some(event.to) {
            return Ok(ApplyOutcome::Skipped { reason: "transfer into reward wrapper" });
        }

        let Some(tx) = self.fetch_transaction(event).await? else {
            return Ok(ApplyOutcome::Deferred);
        };

        let mut event = event.clone();
        if self.exchange.reward_wrapper == Some(event.from) {
            event.from = self.unwrapped_sender(&tx, &event).await?;
        }
        let timestamp = self.timestamp(&tx, event.block.number).await?;

        for address in [event.from, event.to] {
            if address != Address::ZERO {
                self.resolver.resolve_profile(address).await?;
            }
        }
        let key = event.token_key();
        match self.resolver.resolve_token(key, event.standard).await {
            Ok(_) => {}
            Err(MirrorError::TokenNotFound { .. }) if event.is_burn() => {
                return Ok(ApplyOutcome::Skipped { reason: "token burned before it was mirrored" });
            }
            Err(e) => return Err(e),
        }

        let matched = if self.matcher.is_settlement(&tx) {
            self.matcher.match_fulfillment(&tx, &event, timestamp).await?
        } else {
            None
        };

        let is_airdrop = tx.from != event.to;
        self.apply_token_state(&event, is_airdrop).await?;

        let input = ClassificationInput {
            from: event.from,
            to: event.to,
            has_order: matched.is_some(),
            contract_bridged: self.store.bridge_link_for(event.contract).await?.is_some(),
            is_airdrop,
            to_bridge_boundary: self.bridge.is_boundary(event.to),
        };
        let activity_key = ActivityKey {
            txn_id: tx.hash,
            token: key,
            quantity: event.quantity,
            from: event.from,
            to: event.to,
            timestamp,
        };
        let (_, created) = self
            .ledger
            .record(activity_key, &input, matched.map(|m| m.order))
            .await?;

        self.bridge.propagate(&event).await?;
        Ok(ApplyOutcome::Applied { activity_created: created })
    }

    /// Ownership, order status and derived fields, under the token lock.
    async fn apply_token_state(&self, event: &TransferEvent, is_airdrop: bool) -> Result<(), MirrorError> {
        let key = event.token_key();
        let _guard = self.locks.tokens.lock(&key).await;
        let mut token = self.store.token(&key).await?.ok_or_else(|| MirrorError::TokenNotFound {
            contract: key.contract.to_checksum(None),
            token_id: key.token_id.to_string(),
        })?;

        self.reconciler.sync_ownership(&mut token, event).await?;
        let scope = match token.standard {
            TokenStandard::Erc721 => {
                token.is_airdrop = is_airdrop;
                RefreshScope::All
            }
            TokenStandard::Erc1155 => RefreshScope::Transfer {
                from: event.from,
                to: event.to,
            },
        };

        let now = Utc::now();
        self.reconciler
            .refresh_orders(&token, scope, RefreshDepth::Soft, now)
            .await?;
        let derived_changed = self.reconciler.recompute_derived(&mut token, now).await?;
        self.reconciler.commit(&token, derived_changed).await
    }

    async fn fetch_transaction(&self, event: &TransferEvent) -> Result<Option<TransactionInfo>, MirrorError> {
        if let Some(tx) = self.chain.transaction(event.tx_hash).await? {
            return Ok(Some(tx));
        }
        debug!(tx = %event.tx_hash, delay_ms = self.tx_retry_delay.as_millis() as u64, "transaction not visible, retrying");
        tokio::time::sleep(self.tx_retry_delay).await;

        let tx = self.chain.transaction(event.tx_hash).await?;
        if tx.is_none() {
            warn!(tx = %event.tx_hash, block = event.block.number, "transaction still not visible, deferring");
        }
        Ok(tx)
    }

    /// The address that sent the token into the reward wrapper in this
    /// transaction.
    async fn unwrapped_sender(&self, tx: &TransactionInfo, event: &TransferEvent) -> Result<Address, MirrorError> {
        let wrapper = event.from;
        for log in self.chain.receipt_logs(tx.hash).await? {
            let Ok(decoded) = decode(&log) else {
                continue;
            };
            let sender = decoded.into_events().into_iter().find(|inner| {
                inner.standard == TokenStandard::Erc721
                    && inner.contract == event.contract
                    && inner.token_id == event.token_id
                    && inner.to == wrapper
            });
            if let Some(inner) = sender {
                debug!(tx = %tx.hash, from = %inner.from, "reward wrapper sender remapped");
                return Ok(inner.from);
            }
        }
        warn!(tx = %tx.hash, token = %event.token_key(), "no deposit into reward wrapper found in receipt");
        Ok(wrapper)
    }

    async fn timestamp(&self, tx: &TransactionInfo, block: u64) -> Result<DateTime<Utc>, MirrorError> {
        let secs = match tx.l1_timestamp {
            Some(ts) => ts,
            None => self
                .chain
                .block_timestamp(block)
                .await?
                .ok_or_else(|| MirrorError::Rpc(format!("block {block} has no timestamp")))?,
        };
        DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| MirrorError::Decode(format!("timestamp {secs} out of range")))
    }
}
