//! The `MarketStore` trait, the persistence seam for mirrored marketplace state.
//!
//! Every create operation is get-or-create on a natural key and returns
//! `(row, created)`, so concurrent writers racing on the same key converge on
//! a single row without a transaction spanning the caller's work.

use async_trait::async_trait;

use crate::activity::{Activity, ActivityKey, ActivityKind};
use crate::error::MirrorError;
use crate::order::{NewOrder, Order, OrderId, OrderRef, OrderStatus};
use crate::types::{Address, BridgeLink, ContractInfo, Profile, Token, TokenKey, B256, U256};

#[async_trait]
pub trait MarketStore: Send + Sync {
    // ─── Contracts and bridge links ──────────────────────────────────────────

    async fn upsert_contract(&self, info: ContractInfo) -> Result<(), MirrorError>;

    async fn contract(&self, address: Address) -> Result<Option<ContractInfo>, MirrorError>;

    /// Approved contracts on `chain`, ordered by address.
    async fn approved_contracts(&self, chain: &str) -> Result<Vec<ContractInfo>, MirrorError>;

    async fn add_bridge_link(&self, link: BridgeLink) -> Result<(), MirrorError>;

    /// The link whose destination mirror is `to_contract`, if any.
    async fn bridge_link_for(&self, to_contract: Address)
        -> Result<Option<BridgeLink>, MirrorError>;

    // ─── Profiles ────────────────────────────────────────────────────────────

    async fn get_or_create_profile(&self, address: Address)
        -> Result<(Profile, bool), MirrorError>;

    // ─── Tokens ──────────────────────────────────────────────────────────────

    async fn token(&self, key: &TokenKey) -> Result<Option<Token>, MirrorError>;

    /// Insert `token`, or return the row already stored under its key.
    async fn insert_token(&self, token: Token) -> Result<(Token, bool), MirrorError>;

    async fn update_token(&self, token: &Token) -> Result<(), MirrorError>;

    /// Per-owner quantities of a multi-owner token.
    async fn owner_quantities(&self, key: &TokenKey) -> Result<Vec<(Address, U256)>, MirrorError>;

    /// Set an owner's quantity; zero removes the owner row.
    async fn set_owner_quantity(
        &self,
        key: &TokenKey,
        owner: Address,
        quantity: U256,
    ) -> Result<(), MirrorError>;

    // ─── Orders ──────────────────────────────────────────────────────────────

    /// Insert an order, or return the order already stored under its signature.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), MirrorError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, MirrorError>;

    async fn order_by_signature(&self, signature: &[u8]) -> Result<Option<Order>, MirrorError>;

    async fn order_by_hash(&self, order_hash: B256) -> Result<Option<Order>, MirrorError>;

    /// All orders of a token in insertion order.
    async fn orders_for_token(&self, key: &TokenKey) -> Result<Vec<Order>, MirrorError>;

    /// Orders that are neither cancelled nor fulfilled, in insertion order.
    async fn open_orders(&self) -> Result<Vec<Order>, MirrorError>;

    async fn update_order(&self, order: &Order) -> Result<(), MirrorError>;

    /// Set an order's status only if it is still `expected`.
    ///
    /// Returns `false` when another writer changed the status first.
    async fn set_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, MirrorError>;

    // ─── Activities ──────────────────────────────────────────────────────────

    async fn get_or_create_activity(
        &self,
        key: ActivityKey,
        kind: ActivityKind,
        order: Option<OrderRef>,
    ) -> Result<(Activity, bool), MirrorError>;

    async fn update_activity(&self, activity: &Activity) -> Result<(), MirrorError>;

    async fn activities_for_token(&self, key: &TokenKey) -> Result<Vec<Activity>, MirrorError>;
}
