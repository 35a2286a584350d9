//! State reconciliation for one token.
//!
//! Every method that mutates a token expects the caller to hold that token's
//! lock; [`Reconciler::refresh_token`] takes the lock itself. Order statuses
//! are written with a compare-and-set so a concurrent fill recorded by the
//! matcher is never overwritten.
//!
//! | Refresh | Conditions for `Active` |
//! |---------|-------------------------|
//! | soft | not expired, maker still holds the token (listings), not cancelled or filled |
//! | full | soft, plus exchange status, operator approval (listings), payment allowance and balance (offers) |

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use chainmirror_core::{
    Address, DerivedFields, EntityLocks, EventBus, MarketStore, MirrorError, MirrorEvent, Order,
    OrderKind, OrderRef, OrderStatus, Token, TokenKey, TokenStandard, TransferEvent, U256,
};
use chainmirror_evm::ChainReader;

/// Which orders of a token a refresh looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    /// An ERC-1155 transfer only affects listings by the sender and offers
    /// by the recipient.
    Transfer { from: Address, to: Address },
}

impl RefreshScope {
    fn includes(&self, order: &Order) -> bool {
        match self {
            Self::All => true,
            Self::Transfer { from, to } => match order.kind {
                OrderKind::Sell | OrderKind::DutchAuction => order.maker == *from,
                OrderKind::Buy => order.maker == *to,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDepth {
    Soft,
    Full,
}

pub struct Reconciler {
    store: Arc<dyn MarketStore>,
    chain: Arc<dyn ChainReader>,
    locks: Arc<EntityLocks>,
    events: EventBus,
    exchange: Option<Address>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MarketStore>,
        chain: Arc<dyn ChainReader>,
        locks: Arc<EntityLocks>,
        events: EventBus,
        exchange: Option<Address>,
    ) -> Self {
        Self {
            store,
            chain,
            locks,
            events,
            exchange,
        }
    }

    // ─── Ownership ──────────────────────────────────────────────────────────

    /// Re-read ownership of the transferred token from the chain.
    pub async fn sync_ownership(
        &self,
        token: &mut Token,
        event: &TransferEvent,
    ) -> Result<(), MirrorError> {
        let key = token.key;
        match token.standard {
            TokenStandard::Erc721 => {
                let owner = self
                    .chain
                    .owner_of(key.contract, key.token_id)
                    .await?
                    .unwrap_or(Address::ZERO);
                token.owner = Some(owner);
                token.quantity = if owner == Address::ZERO {
                    U256::ZERO
                } else {
                    U256::from(1u64)
                };
            }
            TokenStandard::Erc1155 => {
                for holder in [event.from, event.to] {
                    if holder == Address::ZERO {
                        continue;
                    }
                    let balance = self
                        .chain
                        .balance_of(key.contract, holder, key.token_id)
                        .await?;
                    self.store.set_owner_quantity(&key, holder, balance).await?;
                }
                token.quantity = self
                    .store
                    .owner_quantities(&key)
                    .await?
                    .into_iter()
                    .fold(U256::ZERO, |sum, (_, q)| sum.saturating_add(q));
            }
        }
        Ok(())
    }

    // ─── Order status ───────────────────────────────────────────────────────

    /// Recompute the status of the token's open orders. Returns the number of
    /// orders whose status changed.
    pub async fn refresh_orders(
        &self,
        token: &Token,
        scope: RefreshScope,
        depth: RefreshDepth,
        now: DateTime<Utc>,
    ) -> Result<usize, MirrorError> {
        let holdings: HashMap<Address, U256> = match token.standard {
            TokenStandard::Erc721 => token
                .owner
                .filter(|o| *o != Address::ZERO)
                .map(|o| (o, U256::from(1u64)))
                .into_iter()
                .collect(),
            TokenStandard::Erc1155 => self.store.owner_quantities(&token.key).await?.into_iter().collect(),
        };

        let mut changed = 0;
        for order in self.store.orders_for_token(&token.key).await? {
            if order.status.is_terminal() || !scope.includes(&order) {
                continue;
            }
            let next = self.evaluate(token, &order, &holdings, depth, now).await?;
            if next == order.status {
                continue;
            }
            if self.store.set_order_status(order.id, order.status, next).await? {
                debug!(order = %order.id, from = %order.status, to = %next, "order status changed");
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn evaluate(
        &self,
        token: &Token,
        order: &Order,
        holdings: &HashMap<Address, U256>,
        depth: RefreshDepth,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, MirrorError> {
        let mut live = !order.is_expired(now);
        if order.kind.is_listing() {
            let held = holdings.get(&order.maker).copied().unwrap_or(U256::ZERO);
            live &= held > U256::ZERO && held >= order.quantity;
        }
        if depth == RefreshDepth::Soft {
            return Ok(status_for(live));
        }

        let Some(exchange) = self.exchange else {
            return Ok(status_for(live));
        };
        if let Some(hash) = order.order_hash {
            if let Some(onchain) = self.chain.order_status(exchange, hash).await? {
                if !onchain.is_live() {
                    return Ok(OrderStatus::Cancelled);
                }
            }
        }
        if !live {
            return Ok(OrderStatus::Inactive);
        }

        let funded = match order.kind {
            OrderKind::Sell | OrderKind::DutchAuction => {
                self.chain
                    .is_approved_for_all(token.key.contract, order.maker, exchange)
                    .await?
            }
            OrderKind::Buy => match order.payment_token {
                Some(payment) => {
                    let price = U256::from(order.price);
                    self.chain.erc20_allowance(payment, order.maker, exchange).await? >= price
                        && self.chain.erc20_balance(payment, order.maker).await? >= price
                }
                None => true,
            },
        };
        Ok(status_for(funded))
    }

    // ─── Derived fields ─────────────────────────────────────────────────────

    /// Recompute listing, best offer and last sale. Returns `true` if they
    /// changed.
    pub async fn recompute_derived(&self, token: &mut Token, now: DateTime<Utc>) -> Result<bool, MirrorError> {
        let orders = self.store.orders_for_token(&token.key).await?;
        let derived = derive_fields(&orders, now);
        if derived == token.derived {
            return Ok(false);
        }
        token.derived = derived;
        Ok(true)
    }

    /// Persist a token and announce derived-field changes.
    pub async fn commit(&self, token: &Token, derived_changed: bool) -> Result<(), MirrorError> {
        self.store.update_token(token).await?;
        if derived_changed {
            self.events.publish(MirrorEvent::TokenChanged {
                token: token.key,
                derived: token.derived.clone(),
            });
        }
        Ok(())
    }

    /// Refresh a token's orders and derived fields under its lock.
    pub async fn refresh_token(
        &self,
        key: TokenKey,
        depth: RefreshDepth,
        now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        let _guard = self.locks.tokens.lock(&key).await;
        let Some(mut token) = self.store.token(&key).await? else {
            debug!(token = %key, "refresh of unknown token skipped");
            return Ok(());
        };
        let changed = self.refresh_orders(&token, RefreshScope::All, depth, now).await?;
        let derived_changed = self.recompute_derived(&mut token, now).await?;
        if changed > 0 || derived_changed {
            info!(token = %key, ?depth, orders = changed, "token refreshed");
        }
        self.commit(&token, derived_changed).await
    }
}

fn status_for(live: bool) -> OrderStatus {
    if live {
        OrderStatus::Active
    } else {
        OrderStatus::Inactive
    }
}

/// Derived token fields from its orders.
///
/// The listing is the cheapest active sell or dutch auction (dutch priced at
/// `now`), the best offer the richest active buy. Ties go to the earliest
/// order. The last sale is the most recently sold fulfilled order.
pub fn derive_fields(orders: &[Order], now: DateTime<Utc>) -> DerivedFields {
    let mut sorted: Vec<&Order> = orders.iter().collect();
    sorted.sort_by_key(|o| o.id);

    let mut listing: Option<(u128, OrderRef)> = None;
    let mut offer: Option<u128> = None;
    let mut last_sale: Option<(DateTime<Utc>, u128)> = None;

    for order in sorted {
        match order.status {
            OrderStatus::Active if order.kind.is_listing() => {
                let price = order.price_at(now);
                if listing.map_or(true, |(best, _)| price < best) {
                    listing = Some((price, order.reference()));
                }
            }
            OrderStatus::Active => {
                if offer.map_or(true, |best| order.price > best) {
                    offer = Some(order.price);
                }
            }
            OrderStatus::Fulfilled => {
                let sold_at = order.time_sold.unwrap_or(order.start_time);
                if last_sale.map_or(true, |(at, _)| sold_at > at) {
                    last_sale = Some((sold_at, order.sale_price()));
                }
            }
            OrderStatus::Inactive | OrderStatus::Cancelled => {}
        }
    }

    DerivedFields {
        for_sale: listing.is_some(),
        price: listing.map(|(p, _)| p),
        listing: listing.map(|(_, r)| r),
        highest_offer: offer,
        last_sale_price: last_sale.map(|(_, p)| p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmirror_core::{Bytes, OrderId};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn order(id: u64, kind: OrderKind, price: u128, status: OrderStatus) -> Order {
        Order {
            id: OrderId(id),
            kind,
            token: TokenKey::new(Address::repeat_byte(0xaa), U256::from(1u64)),
            maker: Address::repeat_byte(1),
            counterparty: None,
            price,
            end_price: None,
            sold_price: None,
            quantity: U256::from(1u64),
            payment_token: None,
            start_time: t(0),
            end_time: t(1_000),
            signature: Bytes::from(vec![id as u8]),
            order_hash: None,
            status,
            txn_id: None,
            time_sold: None,
        }
    }

    #[test]
    fn cheapest_listing_ties_go_to_earliest_order() {
        let orders = vec![
            order(1, OrderKind::Sell, 5, OrderStatus::Active),
            order(2, OrderKind::Sell, 3, OrderStatus::Active),
            order(3, OrderKind::Sell, 3, OrderStatus::Active),
        ];
        let derived = derive_fields(&orders, t(10));
        assert!(derived.for_sale);
        assert_eq!(derived.price, Some(3));
        assert_eq!(derived.listing.unwrap().id, OrderId(2));
    }

    #[test]
    fn dutch_listing_is_priced_now() {
        let mut dutch = order(1, OrderKind::DutchAuction, 100, OrderStatus::Active);
        dutch.end_price = Some(0);
        dutch.end_time = t(100);
        let fixed = order(2, OrderKind::Sell, 50, OrderStatus::Active);
        let orders = vec![dutch, fixed];

        assert_eq!(derive_fields(&orders, t(25)).listing.unwrap().id, OrderId(2));
        let later = derive_fields(&orders, t(75));
        assert_eq!(later.listing.unwrap().id, OrderId(1));
        assert_eq!(later.price, Some(25));
    }

    #[test]
    fn offers_and_last_sale() {
        let mut early = order(4, OrderKind::Sell, 7, OrderStatus::Fulfilled);
        early.time_sold = Some(t(10));
        let mut late = order(5, OrderKind::DutchAuction, 90, OrderStatus::Fulfilled);
        late.sold_price = Some(60);
        late.time_sold = Some(t(20));
        let orders = vec![
            order(1, OrderKind::Buy, 4, OrderStatus::Active),
            order(2, OrderKind::Buy, 9, OrderStatus::Active),
            order(3, OrderKind::Buy, 12, OrderStatus::Inactive),
            late,
            early,
        ];
        let derived = derive_fields(&orders, t(30));
        assert!(!derived.for_sale);
        assert_eq!(derived.highest_offer, Some(9));
        assert_eq!(derived.last_sale_price, Some(60));
    }

    #[test]
    fn transfer_scope_splits_listings_and_offers() {
        let seller = Address::repeat_byte(1);
        let buyer = Address::repeat_byte(2);
        let scope = RefreshScope::Transfer { from: seller, to: buyer };
        let listing = order(1, OrderKind::Sell, 1, OrderStatus::Active);
        let mut offer = order(2, OrderKind::Buy, 1, OrderStatus::Active);
        assert!(scope.includes(&listing));
        assert!(!scope.includes(&offer));
        offer.maker = buyer;
        assert!(scope.includes(&offer));
    }
}
