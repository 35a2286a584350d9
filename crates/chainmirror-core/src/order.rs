//! Marketplace orders and their status machine.
//!
//! Sell orders, buy offers and dutch auctions share one [`Order`] struct and
//! are told apart by [`OrderKind`]. Status moves through four states ranked by
//! finality:
//!
//! ```text
//! Active ⇄ Inactive   (rank 0, recomputed on every refresh)
//!    │         │
//!    └──► Cancelled   (rank 1)
//!             │
//!             └──► Fulfilled (rank 2)
//! ```
//!
//! A transition never lowers the rank, so an order that has been cancelled or
//! fulfilled is never active again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::pricing::dutch_price;
use crate::types::{Address, Bytes, TokenKey, B256, U256};

/// Store-assigned order identifier. Ids grow with insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Sell,
    Buy,
    DutchAuction,
}

impl OrderKind {
    /// Sell orders and dutch auctions are made by the token holder.
    pub fn is_listing(self) -> bool {
        matches!(self, Self::Sell | Self::DutchAuction)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sell => write!(f, "sell"),
            Self::Buy => write!(f, "buy"),
            Self::DutchAuction => write!(f, "dutch_auction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Inactive,
    Cancelled,
    Fulfilled,
}

impl OrderStatus {
    fn finality(self) -> u8 {
        match self {
            Self::Active | Self::Inactive => 0,
            Self::Cancelled => 1,
            Self::Fulfilled => 2,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }

    pub fn is_fulfilled(self) -> bool {
        self == Self::Fulfilled
    }

    /// Cancelled and fulfilled orders never become active again.
    pub fn is_terminal(self) -> bool {
        self.finality() > 0
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        next.finality() >= self.finality()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Fulfilled => write!(f, "fulfilled"),
        }
    }
}

/// Lightweight reference to an order, stored on tokens and activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: OrderId,
    pub kind: OrderKind,
}

/// An order as created by the marketplace, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub kind: OrderKind,
    pub token: TokenKey,
    /// Seller for listings, buyer for offers.
    pub maker: Address,
    /// Fixed price, or the start price of a dutch auction.
    pub price: u128,
    /// End price of a dutch auction.
    pub end_price: Option<u128>,
    pub quantity: U256,
    /// ERC-20 used to pay for offers.
    pub payment_token: Option<Address>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Globally unique; the idempotency key for order creation.
    pub signature: Bytes,
    pub order_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub kind: OrderKind,
    pub token: TokenKey,
    pub maker: Address,
    /// Buyer of a filled listing, or seller who accepted an offer.
    pub counterparty: Option<Address>,
    pub price: u128,
    pub end_price: Option<u128>,
    /// Price actually paid, stamped at fulfillment.
    pub sold_price: Option<u128>,
    pub quantity: U256,
    pub payment_token: Option<Address>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub signature: Bytes,
    pub order_hash: Option<B256>,
    pub status: OrderStatus,
    pub txn_id: Option<B256>,
    pub time_sold: Option<DateTime<Utc>>,
}

impl Order {
    pub fn from_new(id: OrderId, new: NewOrder) -> Self {
        Self {
            id,
            kind: new.kind,
            token: new.token,
            maker: new.maker,
            counterparty: None,
            price: new.price,
            end_price: new.end_price,
            sold_price: None,
            quantity: new.quantity,
            payment_token: new.payment_token,
            start_time: new.start_time,
            end_time: new.end_time,
            signature: new.signature,
            order_hash: new.order_hash,
            status: OrderStatus::Active,
            txn_id: None,
            time_sold: None,
        }
    }

    pub fn reference(&self) -> OrderRef {
        OrderRef {
            id: self.id,
            kind: self.kind,
        }
    }

    /// Price asked (or offered) at time `at`.
    pub fn price_at(&self, at: DateTime<Utc>) -> u128 {
        match (self.kind, self.end_price) {
            (OrderKind::DutchAuction, Some(end)) => {
                dutch_price(self.price, end, self.start_time, self.end_time, at)
            }
            _ => self.price,
        }
    }

    /// Price recorded for a completed sale.
    pub fn sale_price(&self) -> u128 {
        self.sold_price.unwrap_or(self.price)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Move to `next`, refusing transitions that lower finality.
    ///
    /// Returns `Ok(true)` when the status changed.
    pub fn transition(&mut self, next: OrderStatus) -> Result<bool, MirrorError> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(MirrorError::IllegalTransition {
                order_id: self.id.0,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(true)
    }

    /// Record the settlement of this order by `txn_id`.
    pub fn fulfill(
        &mut self,
        txn_id: B256,
        counterparty: Address,
        at: DateTime<Utc>,
    ) -> Result<bool, MirrorError> {
        let changed = self.transition(OrderStatus::Fulfilled)?;
        if changed {
            self.sold_price = Some(self.price_at(at));
            self.txn_id = Some(txn_id);
            self.time_sold = Some(at);
            self.counterparty = Some(counterparty);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn order(kind: OrderKind) -> Order {
        let start = Utc.timestamp_opt(1_000, 0).unwrap();
        Order::from_new(
            OrderId(1),
            NewOrder {
                kind,
                token: TokenKey::new(Address::repeat_byte(1), U256::from(1u64)),
                maker: Address::repeat_byte(2),
                price: 100,
                end_price: (kind == OrderKind::DutchAuction).then_some(0),
                quantity: U256::from(1u64),
                payment_token: None,
                start_time: start,
                end_time: start + chrono::Duration::seconds(100),
                signature: Bytes::from(vec![0xaa]),
                order_hash: None,
            },
        )
    }

    #[test]
    fn status_never_leaves_terminal_states() {
        let mut o = order(OrderKind::Sell);
        assert!(o.transition(OrderStatus::Inactive).unwrap());
        assert!(o.transition(OrderStatus::Active).unwrap());
        assert!(o.transition(OrderStatus::Cancelled).unwrap());
        assert!(o.transition(OrderStatus::Active).is_err());
        assert!(o.transition(OrderStatus::Inactive).is_err());
        // A settlement observed after a cancellation still wins.
        assert!(o.transition(OrderStatus::Fulfilled).unwrap());
        assert!(o.transition(OrderStatus::Cancelled).is_err());
        assert!(!o.transition(OrderStatus::Fulfilled).unwrap());
    }

    #[test]
    fn fulfilled_and_active_are_exclusive() {
        let mut o = order(OrderKind::Sell);
        o.fulfill(B256::repeat_byte(7), Address::repeat_byte(3), o.start_time)
            .unwrap();
        assert!(o.status.is_fulfilled());
        assert!(!o.status.is_active());
        assert!(!o.status.is_cancelled());
    }

    #[test]
    fn dutch_fulfillment_stamps_current_price() {
        let mut o = order(OrderKind::DutchAuction);
        let at = o.start_time + chrono::Duration::seconds(25);
        assert!(o.fulfill(B256::repeat_byte(7), Address::repeat_byte(3), at).unwrap());
        assert_eq!(o.sold_price, Some(75));
        assert_eq!(o.sale_price(), 75);
        assert_eq!(o.counterparty, Some(Address::repeat_byte(3)));

        // Second settlement is a no-op and keeps the first stamp.
        let later = o.start_time + chrono::Duration::seconds(50);
        assert!(!o.fulfill(B256::repeat_byte(8), Address::repeat_byte(4), later).unwrap());
        assert_eq!(o.sold_price, Some(75));
        assert_eq!(o.txn_id, Some(B256::repeat_byte(7)));
    }
}
