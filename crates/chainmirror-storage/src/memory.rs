//! In-memory backends.
//!
//! Suitable for tests and for embedding the mirror in a process that keeps
//! its own persistence. All natural-key uniqueness rules of the
//! [`MarketStore`] contract are enforced under a single mutex, so concurrent
//! get-or-create calls converge on one row.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use chainmirror_core::{
    Activity, ActivityId, ActivityKey, ActivityKind, Address, BridgeLink, ContractInfo,
    Cursor, CursorStore, MarketStore, MirrorError, NewOrder, Order, OrderId, OrderRef, OrderStatus,
    Profile,
    Token, TokenKey, B256, U256,
};

#[derive(Default)]
struct MarketState {
    contracts: BTreeMap<Address, ContractInfo>,
    /// Keyed by the destination mirror contract.
    bridge_links: HashMap<Address, BridgeLink>,
    profiles: HashMap<Address, Profile>,
    tokens: HashMap<TokenKey, Token>,
    owners: HashMap<TokenKey, BTreeMap<Address, U256>>,
    orders: BTreeMap<OrderId, Order>,
    orders_by_signature: HashMap<Vec<u8>, OrderId>,
    next_order_id: u64,
    activities: BTreeMap<ActivityId, Activity>,
    activities_by_key: HashMap<ActivityKey, ActivityId>,
    next_activity_id: u64,
}

/// In-memory [`MarketStore`].
#[derive(Default)]
pub struct InMemoryMarketStore {
    state: Mutex<MarketState>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MarketState>, MirrorError> {
        self.state
            .lock()
            .map_err(|_| MirrorError::Storage("market state lock poisoned".into()))
    }

    /// Number of activity rows (for inspection).
    pub fn activity_count(&self) -> usize {
        self.state().map(|s| s.activities.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn upsert_contract(&self, info: ContractInfo) -> Result<(), MirrorError> {
        self.state()?.contracts.insert(info.address, info);
        Ok(())
    }

    async fn contract(&self, address: Address) -> Result<Option<ContractInfo>, MirrorError> {
        Ok(self.state()?.contracts.get(&address).cloned())
    }

    async fn approved_contracts(&self, chain: &str) -> Result<Vec<ContractInfo>, MirrorError> {
        Ok(self
            .state()?
            .contracts
            .values()
            .filter(|c| c.approved && c.chain == chain)
            .cloned()
            .collect())
    }

    async fn add_bridge_link(&self, link: BridgeLink) -> Result<(), MirrorError> {
        self.state()?.bridge_links.insert(link.to_contract, link);
        Ok(())
    }

    async fn bridge_link_for(&self, to_contract: Address) -> Result<Option<BridgeLink>, MirrorError> {
        Ok(self.state()?.bridge_links.get(&to_contract).copied())
    }

    async fn get_or_create_profile(&self, address: Address) -> Result<(Profile, bool), MirrorError> {
        let mut state = self.state()?;
        if let Some(existing) = state.profiles.get(&address) {
            return Ok((existing.clone(), false));
        }
        let profile = Profile::new(address);
        state.profiles.insert(address, profile.clone());
        Ok((profile, true))
    }

    async fn token(&self, key: &TokenKey) -> Result<Option<Token>, MirrorError> {
        Ok(self.state()?.tokens.get(key).cloned())
    }

    async fn insert_token(&self, token: Token) -> Result<(Token, bool), MirrorError> {
        let mut state = self.state()?;
        if let Some(existing) = state.tokens.get(&token.key) {
            return Ok((existing.clone(), false));
        }
        state.tokens.insert(token.key, token.clone());
        Ok((token, true))
    }

    async fn update_token(&self, token: &Token) -> Result<(), MirrorError> {
        let mut state = self.state()?;
        match state.tokens.get_mut(&token.key) {
            Some(slot) => {
                *slot = token.clone();
                Ok(())
            }
            None => Err(MirrorError::Storage(format!("token {} not found", token.key))),
        }
    }

    async fn owner_quantities(&self, key: &TokenKey) -> Result<Vec<(Address, U256)>, MirrorError> {
        Ok(self
            .state()?
            .owners
            .get(key)
            .map(|owners| owners.iter().map(|(a, q)| (*a, *q)).collect())
            .unwrap_or_default())
    }

    async fn set_owner_quantity(
        &self,
        key: &TokenKey,
        owner: Address,
        quantity: U256,
    ) -> Result<(), MirrorError> {
        let mut state = self.state()?;
        let owners = state.owners.entry(*key).or_default();
        if quantity.is_zero() {
            owners.remove(&owner);
        } else {
            owners.insert(owner, quantity);
        }
        Ok(())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), MirrorError> {
        let mut state = self.state()?;
        if let Some(id) = state.orders_by_signature.get(order.signature.as_ref()).copied() {
            if let Some(existing) = state.orders.get(&id) {
                return Ok((existing.clone(), false));
            }
        }
        state.next_order_id += 1;
        let id = OrderId(state.next_order_id);
        let order = Order::from_new(id, order);
        state.orders_by_signature.insert(order.signature.to_vec(), id);
        state.orders.insert(id, order.clone());
        Ok((order, true))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, MirrorError> {
        Ok(self.state()?.orders.get(&id).cloned())
    }

    async fn order_by_signature(&self, signature: &[u8]) -> Result<Option<Order>, MirrorError> {
        let state = self.state()?;
        Ok(state
            .orders_by_signature
            .get(signature)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn order_by_hash(&self, order_hash: B256) -> Result<Option<Order>, MirrorError> {
        Ok(self
            .state()?
            .orders
            .values()
            .find(|o| o.order_hash == Some(order_hash))
            .cloned())
    }

    async fn orders_for_token(&self, key: &TokenKey) -> Result<Vec<Order>, MirrorError> {
        Ok(self
            .state()?
            .orders
            .values()
            .filter(|o| o.token == *key)
            .cloned()
            .collect())
    }

    async fn open_orders(&self) -> Result<Vec<Order>, MirrorError> {
        Ok(self
            .state()?
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update_order(&self, order: &Order) -> Result<(), MirrorError> {
        let mut state = self.state()?;
        match state.orders.get_mut(&order.id) {
            Some(slot) if slot.signature == order.signature => {
                *slot = order.clone();
                Ok(())
            }
            Some(_) => Err(MirrorError::Storage(format!(
                "order {} signature is immutable",
                order.id
            ))),
            None => Err(MirrorError::Storage(format!("order {} not found", order.id))),
        }
    }

    async fn set_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, MirrorError> {
        let mut state = self.state()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| MirrorError::Storage(format!("order {id} not found")))?;
        if order.status != expected {
            return Ok(false);
        }
        order.transition(next)?;
        Ok(true)
    }

    async fn get_or_create_activity(
        &self,
        key: ActivityKey,
        kind: ActivityKind,
        order: Option<OrderRef>,
    ) -> Result<(Activity, bool), MirrorError> {
        let mut state = self.state()?;
        if let Some(id) = state.activities_by_key.get(&key).copied() {
            if let Some(existing) = state.activities.get(&id) {
                return Ok((existing.clone(), false));
            }
        }
        state.next_activity_id += 1;
        let activity = Activity {
            id: ActivityId(state.next_activity_id),
            key: key.clone(),
            kind,
            order,
        };
        state.activities_by_key.insert(key, activity.id);
        state.activities.insert(activity.id, activity.clone());
        Ok((activity, true))
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), MirrorError> {
        let mut state = self.state()?;
        match state.activities.get_mut(&activity.id) {
            Some(slot) if slot.key == activity.key => {
                *slot = activity.clone();
                Ok(())
            }
            Some(_) => Err(MirrorError::Storage(format!(
                "activity {} key is immutable",
                activity.id.0
            ))),
            None => Err(MirrorError::Storage(format!("activity {} not found", activity.id.0))),
        }
    }

    async fn activities_for_token(&self, key: &TokenKey) -> Result<Vec<Activity>, MirrorError> {
        Ok(self
            .state()?
            .activities
            .values()
            .filter(|a| a.key.token == *key)
            .cloned()
            .collect())
    }
}

// ─── Cursors ─────────────────────────────────────────────────────────────────

/// In-memory [`CursorStore`].
#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursors(&self) -> Result<MutexGuard<'_, HashMap<String, Cursor>>, MirrorError> {
        self.cursors
            .lock()
            .map_err(|_| MirrorError::Storage("cursor lock poisoned".into()))
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, stream_id: &str) -> Result<Option<Cursor>, MirrorError> {
        Ok(self.cursors()?.get(stream_id).cloned())
    }

    async fn save(&self, cursor: &Cursor) -> Result<(), MirrorError> {
        self.cursors()?.insert(cursor.stream_id.clone(), cursor.clone());
        Ok(())
    }

    async fn delete(&self, stream_id: &str) -> Result<(), MirrorError> {
        self.cursors()?.remove(stream_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmirror_core::{Bytes, OrderKind, TokenStandard};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn key(id: u64) -> TokenKey {
        TokenKey::new(Address::repeat_byte(0xcc), U256::from(id))
    }

    fn new_order(sig: u8, token: TokenKey) -> NewOrder {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        NewOrder {
            kind: OrderKind::Sell,
            token,
            maker: Address::repeat_byte(1),
            price: 10,
            end_price: None,
            quantity: U256::from(1u64),
            payment_token: None,
            start_time: start,
            end_time: start + chrono::Duration::days(1),
            signature: Bytes::from(vec![sig]),
            order_hash: Some(B256::repeat_byte(sig)),
        }
    }

    #[tokio::test]
    async fn concurrent_profile_creation_converges() {
        let store = Arc::new(InMemoryMarketStore::new());
        let addr = Address::repeat_byte(7);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_create_profile(addr).await.unwrap().1
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn token_insert_returns_existing_row() {
        let store = InMemoryMarketStore::new();
        let mut first = Token::new(key(1), TokenStandard::Erc721);
        first.owner = Some(Address::repeat_byte(2));
        assert!(store.insert_token(first.clone()).await.unwrap().1);

        let (row, created) = store
            .insert_token(Token::new(key(1), TokenStandard::Erc721))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(row.owner, Some(Address::repeat_byte(2)));
    }

    #[tokio::test]
    async fn orders_are_unique_by_signature_and_keep_insertion_order() {
        let store = InMemoryMarketStore::new();
        let (a, created_a) = store.insert_order(new_order(1, key(1))).await.unwrap();
        let (b, _) = store.insert_order(new_order(2, key(1))).await.unwrap();
        let (again, created_again) = store.insert_order(new_order(1, key(1))).await.unwrap();
        assert!(created_a);
        assert!(!created_again);
        assert_eq!(again.id, a.id);
        assert!(a.id < b.id);

        let ids: Vec<OrderId> = store.orders_for_token(&key(1)).await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(store.order_by_hash(B256::repeat_byte(2)).await.unwrap().unwrap().id, b.id);
        assert_eq!(store.order_by_signature(&[2]).await.unwrap().unwrap().id, b.id);

        let mut done = b.clone();
        done.status = OrderStatus::Fulfilled;
        store.update_order(&done).await.unwrap();
        let open: Vec<OrderId> = store.open_orders().await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(open, vec![a.id]);
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = InMemoryMarketStore::new();
        let (order, _) = store.insert_order(new_order(3, key(2))).await.unwrap();
        assert!(store
            .set_order_status(order.id, OrderStatus::Active, OrderStatus::Inactive)
            .await
            .unwrap());
        // A stale writer still expecting Active loses.
        assert!(!store
            .set_order_status(order.id, OrderStatus::Active, OrderStatus::Cancelled)
            .await
            .unwrap());
        assert_eq!(store.order(order.id).await.unwrap().unwrap().status, OrderStatus::Inactive);
    }

    #[tokio::test]
    async fn owner_rows_are_removed_at_zero() {
        let store = InMemoryMarketStore::new();
        let owner = Address::repeat_byte(3);
        store.set_owner_quantity(&key(5), owner, U256::from(4u64)).await.unwrap();
        assert_eq!(store.owner_quantities(&key(5)).await.unwrap(), vec![(owner, U256::from(4u64))]);
        store.set_owner_quantity(&key(5), owner, U256::ZERO).await.unwrap();
        assert!(store.owner_quantities(&key(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activities_are_get_or_create() {
        let store = InMemoryMarketStore::new();
        let k = ActivityKey {
            txn_id: B256::repeat_byte(9),
            token: key(1),
            quantity: U256::from(1u64),
            from: Address::ZERO,
            to: Address::repeat_byte(4),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let (a, created) = store.get_or_create_activity(k.clone(), ActivityKind::Mint, None).await.unwrap();
        let (b, created_again) = store.get_or_create_activity(k, ActivityKind::Transfer, None).await.unwrap();
        assert!(created);
        assert!(!created_again);
        assert_eq!(a, b);
        assert_eq!(store.activity_count(), 1);
    }

    #[tokio::test]
    async fn cursor_roundtrip() {
        let store = MemoryCursorStore::new();
        assert!(store.load("optimism").await.unwrap().is_none());
        let mut c = Cursor::starting_at("optimism", 100);
        c.advance(150);
        store.save(&c).await.unwrap();
        assert_eq!(store.load("optimism").await.unwrap().unwrap().next_block, 151);
        store.delete("optimism").await.unwrap();
        assert!(store.load("optimism").await.unwrap().is_none());
    }
}
