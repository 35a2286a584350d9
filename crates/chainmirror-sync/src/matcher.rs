//! Order matching: which marketplace order did a settlement transaction fill?
//!
//! Exchange and reward-wrapper calls carry the order signatures in calldata.
//! Aggregator settlements are matched through the exchange's
//! `OrderFulfilled` logs in the receipt, whose first data word is the order
//! hash. A token routed through the aggregator moves twice in the same
//! transaction. Only the hop leaving the seller is matched; the
//! hop out of the aggregator is an ordinary transfer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chainmirror_core::{
    EntityLocks, MarketStore, MirrorError, Order, OrderId, OrderKind, OrderRef, TransferEvent, B256,
};
use chainmirror_evm::{decode_exchange_call, ChainReader, TransactionInfo, ORDER_FULFILLED_TOPIC};

use crate::config::ExchangeConfig;

/// Candidate kinds in the order they are tried.
const KIND_PRIORITY: [OrderKind; 3] = [OrderKind::Sell, OrderKind::Buy, OrderKind::DutchAuction];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderMatch {
    pub order: OrderRef,
    /// `false` when this transaction had already been recorded as the fill.
    pub newly_fulfilled: bool,
}

pub struct OrderMatcher {
    store: Arc<dyn MarketStore>,
    chain: Arc<dyn ChainReader>,
    locks: Arc<EntityLocks>,
    exchange: ExchangeConfig,
}

impl OrderMatcher {
    pub fn new(
        store: Arc<dyn MarketStore>,
        chain: Arc<dyn ChainReader>,
        locks: Arc<EntityLocks>,
        exchange: ExchangeConfig,
    ) -> Self {
        Self {
            store,
            chain,
            locks,
            exchange,
        }
    }

    /// Whether `tx` was sent to a marketplace settlement contract.
    pub fn is_settlement(&self, tx: &TransactionInfo) -> bool {
        tx.to.is_some_and(|to| self.exchange.is_settlement_target(to))
    }

    /// Find the order `tx` fulfilled for the token `event` moved and record
    /// the fill.
    pub async fn match_fulfillment(
        &self,
        tx: &TransactionInfo,
        event: &TransferEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<OrderMatch>, MirrorError> {
        let Some(to) = tx.to else {
            return Ok(None);
        };
        if !self.exchange.is_settlement_target(to) {
            return Ok(None);
        }
        if self.exchange.is_aggregator(event.from) {
            debug!(tx = %tx.hash, "hop out of the aggregator, not a fill");
            return Ok(None);
        }

        let token = &event.token_key();
        let candidates = if self.exchange.is_aggregator(to) {
            self.aggregator_candidates(tx).await?
        } else {
            self.calldata_candidates(tx).await?
        };

        for kind in KIND_PRIORITY {
            for order in candidates.iter().filter(|o| o.kind == kind && o.token == *token) {
                if let Some(found) = self.fulfill(order.id, tx, at).await? {
                    return Ok(Some(found));
                }
            }
        }

        debug!(tx = %tx.hash, token = %token, "no order matched settlement");
        Ok(None)
    }

    async fn calldata_candidates(&self, tx: &TransactionInfo) -> Result<Vec<Order>, MirrorError> {
        let call = match decode_exchange_call(&tx.input) {
            Ok(call) => call,
            Err(e) => {
                debug!(tx = %tx.hash, error = %e, "settlement calldata not decodable");
                return Ok(vec![]);
            }
        };
        let mut orders = Vec::with_capacity(call.signatures.len());
        for signature in &call.signatures {
            if let Some(order) = self.store.order_by_signature(signature).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn aggregator_candidates(&self, tx: &TransactionInfo) -> Result<Vec<Order>, MirrorError> {
        let mut orders = Vec::new();
        for log in self.chain.receipt_logs(tx.hash).await? {
            if log.topic(0).ok() != Some(ORDER_FULFILLED_TOPIC) {
                continue;
            }
            let data = match log.data_bytes() {
                Ok(data) if data.len() >= 32 => data,
                _ => {
                    warn!(tx = %tx.hash, "OrderFulfilled log without an order hash");
                    continue;
                }
            };
            let order_hash = B256::from_slice(&data[..32]);
            if let Some(order) = self.store.order_by_hash(order_hash).await? {
                if order.kind == OrderKind::Sell {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }

    /// Apply the fill under the order's lock. `None` if another transaction
    /// already filled the order.
    async fn fulfill(
        &self,
        id: OrderId,
        tx: &TransactionInfo,
        at: DateTime<Utc>,
    ) -> Result<Option<OrderMatch>, MirrorError> {
        let _guard = self.locks.orders.lock(&id).await;
        let Some(mut order) = self.store.order(id).await? else {
            return Ok(None);
        };

        if order.status.is_fulfilled() {
            if order.txn_id == Some(tx.hash) {
                return Ok(Some(OrderMatch {
                    order: order.reference(),
                    newly_fulfilled: false,
                }));
            }
            debug!(order = %id, tx = %tx.hash, "order already filled by another transaction");
            return Ok(None);
        }

        order.fulfill(tx.hash, tx.from, at)?;
        self.store.update_order(&order).await?;
        info!(
            order = %id,
            kind = %order.kind,
            tx = %tx.hash,
            price = order.sale_price(),
            "order fulfilled"
        );
        Ok(Some(OrderMatch {
            order: order.reference(),
            newly_fulfilled: true,
        }))
    }
}
